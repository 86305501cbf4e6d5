use std::collections::HashSet;

use super::*;

impl PlanCompiler {
    /// Adds account creations for applications that new accounts depend on.
    ///
    /// A required application is skipped when the identity already holds an
    /// account there or the plan already creates one.
    pub(super) async fn expand_dependencies(
        &self,
        project: &mut Project,
        context: &mut CompileContext,
    ) -> AppResult<()> {
        let mut pending: Vec<String> = created_applications(project);
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(application) = pending.pop() {
            if !visited.insert(application.clone()) {
                continue;
            }
            let Some(definition) = self.application(context, application.as_str()).await? else {
                continue;
            };

            for dependency in &definition.dependencies {
                if context.identity.has_link_on(dependency.as_str())
                    || created_applications(project).contains(dependency)
                {
                    continue;
                }
                if self.application(context, dependency.as_str()).await?.is_none() {
                    warn!(
                        application = %application,
                        dependency = %dependency,
                        "ignoring dependency on unknown application"
                    );
                    continue;
                }

                debug!(
                    identity = %project.identity_name,
                    application = %application,
                    dependency = %dependency,
                    "adding account for required application"
                );
                let request = AbstractRequest::account(dependency.as_str())?
                    .with_operation(AccountOperation::Create);
                project.add_expansion_item(ExpansionItem {
                    application: dependency.clone(),
                    instance: None,
                    native_identity: None,
                    kind: GenericRequestKind::Attribute,
                    name: String::new(),
                    value: None,
                    operation: AttributeOperation::Add,
                    cause: ExpansionCause::Dependency,
                    source_info: application.clone(),
                });

                let matcher = self.matcher(context, dependency.as_str()).await?;
                let target = context.target_for(dependency.as_str());
                assimilate_into(project, &target, &request, matcher);
                pending.push(dependency.clone());
            }
        }
        Ok(())
    }

    /// Replaces requests on composite applications with one per tier.
    ///
    /// A tier request targets the single existing tier account, or creates
    /// one when the identity has none.
    pub(super) async fn expand_composites(
        &self,
        project: &mut Project,
        context: &mut CompileContext,
    ) -> AppResult<()> {
        let mut applications: Vec<String> = project
            .plans
            .iter()
            .chain(project.unmanaged_plan.iter())
            .flat_map(|plan| plan.requests.iter().map(|request| request.application.clone()))
            .collect();
        applications.sort();
        applications.dedup();
        for application in &applications {
            self.application(context, application.as_str()).await?;
        }

        let mut composites = Vec::new();
        for plan in backend_plans_mut(project) {
            let (extracted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut plan.requests)
                .into_iter()
                .partition(|request| context.is_composite(request.application.as_str()));
            plan.requests = kept;
            composites.extend(extracted);
        }

        for request in composites {
            let tiers = self
                .application(context, request.application.as_str())
                .await?
                .map(|definition| definition.tier_applications)
                .unwrap_or_default();

            for tier in tiers {
                let mut tier_request = request.clone();
                tier_request.application.clone_from(&tier);
                let links = context.identity.links_on(tier.as_str(), request.instance.as_deref());
                match links.as_slice() {
                    [link] => tier_request.native_identity = Some(link.native_identity.clone()),
                    [] => {
                        tier_request.native_identity = None;
                        tier_request.operation = Some(AccountOperation::Create);
                    }
                    _ => {}
                }

                debug!(
                    identity = %project.identity_name,
                    composite = %request.application,
                    tier = %tier,
                    "expanding composite request"
                );
                let matcher = self.matcher(context, tier.as_str()).await?;
                let target = context.target_for(tier.as_str());
                assimilate_into(project, &target, &tier_request, matcher);
            }
        }
        Ok(())
    }
}

fn created_applications(project: &Project) -> Vec<String> {
    project
        .plans
        .iter()
        .chain(project.unmanaged_plan.iter())
        .flat_map(|plan| plan.requests.iter())
        .filter(|request| request.is_create())
        .map(|request| request.application.clone())
        .collect()
}
