use provisio_domain::AttributeSyncTarget;

use super::accounts::{AccountChoice, AccountQuery, resolve_account};
use super::*;

impl PlanCompiler {
    /// Pushes identity attribute changes to the account attributes that mirror them.
    ///
    /// A transform script that fails drops only its own target.
    pub(super) async fn expand_attribute_sync(
        &self,
        project: &mut Project,
        context: &mut CompileContext,
    ) -> AppResult<()> {
        let changes: Vec<GenericRequest> = project
            .identity_plan
            .as_ref()
            .and_then(Plan::identity_request)
            .map(|request| {
                request
                    .attribute_requests
                    .iter()
                    .filter(|generic| !is_reserved_attribute(generic.name.as_str()))
                    .filter(|generic| !generic.is_deferred())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for change in changes {
            for target in self
                .application_catalog
                .list_sync_targets(change.name.as_str())
                .await?
            {
                if self
                    .application(context, target.application.as_str())
                    .await?
                    .is_none()
                {
                    warn!(
                        attribute = %change.name,
                        application = %target.application,
                        "ignoring sync target on unknown application"
                    );
                    continue;
                }

                let value = match target.transform_script.as_deref() {
                    Some(script) => {
                        let mut arguments = Map::new();
                        arguments.insert(
                            "value".to_owned(),
                            change.value.clone().unwrap_or(Value::Null),
                        );
                        arguments.insert(
                            "identity".to_owned(),
                            Value::String(project.identity_name.clone()),
                        );
                        arguments.insert("attribute".to_owned(), Value::String(change.name.clone()));

                        match self.run_script(script, arguments).await {
                            Ok(value) => Some(value).filter(|value| !value.is_null()),
                            Err(error) => {
                                warn!(
                                    attribute = %change.name,
                                    application = %target.application,
                                    error = %error,
                                    "sync transform failed"
                                );
                                continue;
                            }
                        }
                    }
                    None => change.value.clone(),
                };

                let matcher = self.matcher(context, target.application.as_str()).await?;
                for (native_identity, create) in sync_accounts(project, context, &target) {
                    let mut generic =
                        GenericRequest::new(target.account_attribute.as_str(), change.operation, value.clone());
                    generic.tracking_ids = change.tracking_ids.clone();

                    let mut request = AbstractRequest::account(target.application.as_str())?
                        .with_attribute(generic);
                    request.native_identity = native_identity;
                    if create {
                        request.operation = Some(AccountOperation::Create);
                    }

                    record_expansion(
                        project,
                        &request,
                        ExpansionCause::AttributeSync,
                        target.identity_attribute.as_str(),
                    );
                    let plan_target = context.target_for(target.application.as_str());
                    assimilate_into(project, &plan_target, &request, matcher);
                }
            }
        }
        Ok(())
    }
}

/// Accounts a synced value goes to, flagged when the account is still being created.
fn sync_accounts(
    project: &mut Project,
    context: &CompileContext,
    target: &AttributeSyncTarget,
) -> Vec<(Option<String>, bool)> {
    let links = context.identity.links_on(target.application.as_str(), None);
    if links.is_empty() {
        let created = project
            .plans
            .iter()
            .flat_map(|plan| plan.requests.iter())
            .any(|request| request.application == target.application && request.is_create());
        return if created { vec![(None, true)] } else { Vec::new() };
    }
    if target.all_accounts || links.len() == 1 {
        return links
            .iter()
            .map(|link| (Some(link.native_identity.clone()), false))
            .collect();
    }

    let query = AccountQuery::new(
        target.application.as_str(),
        format!("sync:{}", target.identity_attribute),
    );
    match resolve_account(project, context, query) {
        AccountChoice::Existing(native_identities) => native_identities
            .into_iter()
            .map(|native_identity| (Some(native_identity), false))
            .collect(),
        AccountChoice::Pending => vec![(None, false)],
        AccountChoice::Create | AccountChoice::Nothing => Vec::new(),
    }
}
