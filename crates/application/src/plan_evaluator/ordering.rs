use std::collections::{BTreeSet, HashSet};

use super::*;

/// One integration plan with the plans it waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ScheduledPlan {
    pub(super) index: usize,
    pub(super) integration: String,
    /// Indexes of plans that must run first.
    pub(super) after: Vec<usize>,
    /// Required applications no plan in the project touches.
    pub(super) missing: Vec<String>,
}

impl PlanEvaluator {
    /// Orders integration plans so required applications are provisioned first.
    ///
    /// A cycle between plans is an error; nothing is executed in that case.
    pub(super) async fn execution_order(&self, project: &Project) -> AppResult<Vec<ScheduledPlan>> {
        let mut scheduled = Vec::with_capacity(project.plans.len());
        for (index, plan) in project.plans.iter().enumerate() {
            let required = match &self.dependency_evaluator {
                Some(evaluator) => evaluator.required_applications(plan).await?,
                None => Vec::new(),
            };

            let mut after = BTreeSet::new();
            let mut missing = Vec::new();
            for application in required {
                let providers: Vec<usize> = project
                    .plans
                    .iter()
                    .enumerate()
                    .filter(|(other, candidate)| {
                        *other != index
                            && candidate
                                .requests
                                .iter()
                                .any(|request| request.application == application)
                    })
                    .map(|(other, _)| other)
                    .collect();
                let touches_itself = plan
                    .requests
                    .iter()
                    .any(|request| request.application == application);
                if providers.is_empty() && !touches_itself {
                    missing.push(application);
                }
                after.extend(providers);
            }

            scheduled.push(ScheduledPlan {
                index,
                integration: plan.target_integration.clone().unwrap_or_default(),
                after: after.into_iter().collect(),
                missing,
            });
        }
        topological_order(scheduled)
    }
}

/// Kahn's algorithm, taking ready plans in their original order.
pub(super) fn topological_order(plans: Vec<ScheduledPlan>) -> AppResult<Vec<ScheduledPlan>> {
    let mut done: HashSet<usize> = HashSet::new();
    let mut remaining = plans;
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|plan| plan.after.iter().all(|index| done.contains(index)));
        if ready.is_empty() {
            let names: Vec<&str> = blocked.iter().map(|plan| plan.integration.as_str()).collect();
            return Err(AppError::Dependency(format!(
                "dependency cycle between integration plans: {}",
                names.join(", ")
            )));
        }
        done.extend(ready.iter().map(|plan| plan.index));
        ordered.extend(ready);
        remaining = blocked;
    }
    Ok(ordered)
}

/// Result forced on a plan by the outcome of the plans it depends on.
///
/// A failed dependency fails the plan, one waiting for a retry makes it wait
/// too. A required application without a plan is fine when the identity
/// already holds an account there.
pub(super) fn blocking_result(
    project: &Project,
    scheduled: &ScheduledPlan,
    context: &ExecutionContext,
) -> Option<ProvisioningResult> {
    for application in &scheduled.missing {
        let linked = context
            .identity
            .as_ref()
            .is_some_and(|identity| identity.has_link_on(application.as_str()));
        if !linked {
            return Some(ProvisioningResult::failed(format!(
                "no account on required application '{application}'"
            )));
        }
    }

    let statuses = scheduled
        .after
        .iter()
        .filter_map(|index| project.plans.get(*index))
        .filter_map(plan_status);
    match worst_status(statuses) {
        Some(ProvisioningStatus::Failed) => Some(ProvisioningResult::failed(
            "a required integration failed",
        )),
        Some(ProvisioningStatus::Retry) => Some(ProvisioningResult::retry(
            "waiting for a required integration",
        )),
        _ => None,
    }
}
