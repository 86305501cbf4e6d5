use super::accounts::{AccountChoice, AccountQuery, request_signature, resolve_account};
use super::*;

impl PlanCompiler {
    /// Merges every identity request of the master plan into one identity request.
    ///
    /// Role list changes are split to one role per request so each role can
    /// carry its own assignment id.
    pub(super) fn partition_identity_plan(&self, project: &mut Project, master: &Plan) {
        let identity_name = project.identity_name.clone();

        for request in master
            .account_requests()
            .filter(|request| is_identity_application(request.application.as_str()))
        {
            let mut request = request.clone();
            request.native_identity = Some(identity_name.clone());
            request.instance = None;
            request.attribute_requests = request
                .attribute_requests
                .into_iter()
                .flat_map(split_role_values)
                .collect();

            assimilate_into(project, &PlanTarget::Identity, &request, ValueMatcher::exact());
        }
    }

    /// Routes every backend request of the master plan to its target plan.
    ///
    /// Requests for unknown applications are dropped with a warning so the
    /// rest of the plan still compiles.
    pub(super) async fn partition(
        &self,
        project: &mut Project,
        master: &Plan,
        context: &mut CompileContext,
    ) -> AppResult<()> {
        for request in &master.requests {
            if is_identity_application(request.application.as_str()) {
                continue;
            }
            if self
                .application(context, request.application.as_str())
                .await?
                .is_none()
            {
                warn!(
                    identity = %project.identity_name,
                    application = %request.application,
                    "dropping request for unknown application"
                );
                continue;
            }
            let matcher = self.matcher(context, request.application.as_str()).await?;

            for mut resolved in resolve_native_identity(project, context, request.clone()) {
                record_deferred(project, &mut resolved);

                let (managed, edit) = split_link_edits(resolved);
                if let Some(edit) = edit {
                    assimilate_into(project, &PlanTarget::Unmanaged, &edit, matcher);
                }
                let Some(managed) = managed else {
                    continue;
                };

                let target = context.target_for(managed.application.as_str());
                let (managed, manual) = match &target {
                    PlanTarget::Integration(name)
                        if context
                            .integration(name)
                            .is_some_and(|integration| integration.no_permissions) =>
                    {
                        split_permissions(managed)
                    }
                    _ => (managed, None),
                };

                assimilate_into(project, &target, &managed, matcher);
                if let Some(manual) = manual {
                    assimilate_into(project, &PlanTarget::Unmanaged, &manual, matcher);
                }
            }
        }
        Ok(())
    }
}

/// Fills in the account a request targets when the master plan left it open.
///
/// Several selected accounts clone the request once per account. A request
/// that cannot be placed yet keeps an empty native identity until its
/// account selection is answered.
pub(super) fn resolve_native_identity(
    project: &mut Project,
    context: &CompileContext,
    request: AbstractRequest,
) -> Vec<AbstractRequest> {
    if request.kind != RequestKind::Account
        || request.native_identity.is_some()
        || request.is_create()
    {
        return vec![request];
    }

    let discriminator = request
        .assignment_ids
        .first()
        .cloned()
        .unwrap_or_else(|| request_signature(&request));
    let mut query = AccountQuery::new(request.application.as_str(), discriminator);
    query.instance = request.instance.as_deref();
    query.assignment_id = request.assignment_ids.first().map(String::as_str);
    query.allow_create = request.effective_operation() == AccountOperation::Modify;
    query.hint = Some(&request);

    match resolve_account(project, context, query) {
        AccountChoice::Existing(native_identities) => native_identities
            .into_iter()
            .map(|native_identity| {
                let mut copy = request.clone();
                copy.native_identity = Some(native_identity);
                copy
            })
            .collect(),
        AccountChoice::Create => {
            let mut copy = request.clone();
            copy.operation = Some(AccountOperation::Create);
            vec![copy]
        }
        AccountChoice::Pending => vec![request],
        AccountChoice::Nothing => {
            warn!(
                identity = %project.identity_name,
                application = %request.application,
                operation = request.effective_operation().as_str(),
                "dropping request without an account to act on"
            );
            Vec::new()
        }
    }
}

/// Separates edits of the cached account copy from changes for the backend.
///
/// A request flagged as a link edit moves as a whole; otherwise only its
/// flagged attribute and permission changes move. Link edits always run as
/// `Modify`.
pub(super) fn split_link_edits(
    request: AbstractRequest,
) -> (Option<AbstractRequest>, Option<AbstractRequest>) {
    if request.flag(arguments::LINK_EDIT) {
        let mut edit = request;
        edit.operation = Some(AccountOperation::Modify);
        return (None, Some(edit));
    }

    let mut managed = request;
    let mut edit = managed.empty_copy();
    edit.operation = Some(AccountOperation::Modify);
    edit.arguments
        .insert(arguments::LINK_EDIT.to_owned(), Value::Bool(true));

    for kind in GENERIC_KINDS {
        let (edits, kept): (Vec<_>, Vec<_>) = std::mem::take(managed.generic_requests_mut(kind))
            .into_iter()
            .partition(|generic| generic.flag(arguments::LINK_EDIT));
        *managed.generic_requests_mut(kind) = kept;
        *edit.generic_requests_mut(kind) = edits;
    }

    if edit.has_no_children() {
        return (Some(managed), None);
    }
    if managed.has_no_children() && managed.effective_operation() == AccountOperation::Modify {
        return (None, Some(edit));
    }
    (Some(managed), Some(edit))
}

/// Moves permission changes out of a request for manual handling.
fn split_permissions(mut request: AbstractRequest) -> (AbstractRequest, Option<AbstractRequest>) {
    if request.permission_requests.is_empty() {
        return (request, None);
    }

    let mut manual = request.empty_copy();
    manual.operation = None;
    manual.permission_requests = std::mem::take(&mut request.permission_requests);
    (request, Some(manual))
}

fn split_role_values(generic: GenericRequest) -> Vec<GenericRequest> {
    if !ROLE_ATTRIBUTES.contains(&generic.name.as_str())
        || generic.operation == AttributeOperation::Set
    {
        return vec![generic];
    }

    let values = to_list(generic.value.as_ref());
    if values.len() < 2 {
        return vec![generic];
    }

    values
        .into_iter()
        .map(|value| {
            let mut single = generic.clone();
            single.value = Some(value);
            single
        })
        .collect()
}

/// Moves dated backend changes out of the request for the event scheduler.
fn record_deferred(project: &mut Project, request: &mut AbstractRequest) {
    let key = request.key();
    for (kind, generic) in request.all_generic_requests() {
        if generic.is_deferred() {
            debug!(
                identity = %project.identity_name,
                application = %request.application,
                attribute = %generic.name,
                "deferring dated change"
            );
            project
                .deferred_requests
                .push(DeferredRequest::new(&key, kind, generic.clone()));
        }
    }
    for kind in GENERIC_KINDS {
        request
            .generic_requests_mut(kind)
            .retain(|generic| !generic.is_deferred());
    }
}
