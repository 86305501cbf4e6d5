use super::*;

/// Returns when retried work should run again.
///
/// Outside a maintenance window the regular retry interval applies; a
/// permanent window is checked again a day later.
#[must_use]
pub fn retry_date(
    maintenance: MaintenanceWindow,
    now: DateTime<Utc>,
    retry_interval: Duration,
) -> DateTime<Utc> {
    maintenance.retry_date(now, retry_interval)
}

/// Reduces an executed plan to the work that still needs a retry.
///
/// Generic requests stay when their effective result is absent or asks for
/// a retry. A creation that partly succeeded becomes a modification so the
/// retry cannot create the account twice. Returns `None` when nothing is
/// left to retry.
#[must_use]
pub fn build_retry_plan(plan: &Plan) -> Option<Plan> {
    let mut requests = Vec::new();
    for request in &plan.requests {
        let request_status = plan.effective_result(request, None).map(|result| result.status);
        let mut reduced = request.empty_copy();
        let mut partly_done = request
            .result
            .as_ref()
            .is_some_and(|result| result.status.is_submitted());

        for kind in GENERIC_KINDS {
            for generic in request.generic_requests(kind) {
                let status = plan
                    .effective_result(request, Some(generic))
                    .map(|result| result.status);
                match status {
                    None | Some(ProvisioningStatus::Retry) => {
                        let mut pending = generic.clone();
                        pending.result = None;
                        reduced.generic_requests_mut(kind).push(pending);
                    }
                    Some(status) => partly_done |= status.is_submitted(),
                }
            }
        }

        let retry_request = request_status == Some(ProvisioningStatus::Retry);
        if !retry_request && reduced.has_no_children() {
            continue;
        }
        reduced.native_identity.clone_from(&request.native_identity);
        reduced.result = None;
        if reduced.is_create() && partly_done {
            reduced.operation = Some(AccountOperation::Modify);
        }
        requests.push(reduced);
    }

    if requests.is_empty() {
        return None;
    }
    let mut retry = plan.clone();
    retry.requests = requests;
    retry.result = None;
    Some(retry)
}

/// Latest retry time any result of the plan asks for.
pub(super) fn requested_retry_at(plan: &Plan) -> Option<DateTime<Utc>> {
    let request_dates = plan.requests.iter().flat_map(|request| {
        request
            .result
            .iter()
            .chain(
                request
                    .all_generic_requests()
                    .filter_map(|(_, generic)| generic.result.as_ref()),
            )
            .filter_map(|result| result.retry_at)
    });
    plan.result
        .iter()
        .filter_map(|result| result.retry_at)
        .chain(request_dates)
        .max()
}

/// Turns every retry result of a plan into a terminal failure.
pub(super) fn fail_retries(plan: &mut Plan, message: &str) {
    let fail = |result: &mut Option<ProvisioningResult>| {
        if let Some(result) = result.as_mut().filter(|result| result.needs_retry()) {
            result.status = ProvisioningStatus::Failed;
            result.errors.push(message.to_owned());
        }
    };
    fail(&mut plan.result);
    for request in &mut plan.requests {
        fail(&mut request.result);
        for kind in GENERIC_KINDS {
            for generic in request.generic_requests_mut(kind) {
                fail(&mut generic.result);
            }
        }
    }
}

impl PlanEvaluator {
    /// Queues the unresolved part of every plan that asked for a retry.
    ///
    /// Work past the attempt limit is failed instead.
    pub(super) async fn schedule_retries(
        &self,
        project: &mut Project,
        context: &ExecutionContext,
    ) -> AppResult<()> {
        if context.options.is_enabled(CompilerOption::DisableRetryRequest) {
            return Ok(());
        }

        let identity_name = project.identity_name.clone();
        for plan in &mut project.plans {
            if !needs_retry(plan) {
                continue;
            }
            let Some(retry_plan) = build_retry_plan(plan) else {
                continue;
            };
            let integration = plan.target_integration.clone().unwrap_or_default();

            if context.attempt >= self.settings.max_retry_attempts {
                warn!(
                    identity = %identity_name,
                    integration = %integration,
                    attempt = context.attempt,
                    "retry attempts exhausted"
                );
                fail_retries(plan, "retry attempts exhausted");
                continue;
            }

            let not_before = requested_retry_at(plan)
                .filter(|retry_at| *retry_at > context.now)
                .unwrap_or(context.now + self.settings.retry_interval);
            let mut task = RetryTask::new(
                identity_name.as_str(),
                integration.as_str(),
                retry_plan,
                context.options.clone(),
                not_before,
            );
            task.attempt = context.attempt + 1;

            info!(
                identity = %identity_name,
                integration = %integration,
                task_id = %task.id,
                not_before = %not_before,
                attempt = task.attempt,
                "scheduling retry"
            );
            self.retry_scheduler.schedule(task).await?;
        }
        Ok(())
    }
}
