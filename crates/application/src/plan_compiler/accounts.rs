use super::*;

/// How the target account of a request was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum AccountChoice {
    /// Existing accounts, by native identity.
    Existing(Vec<String>),
    /// A new account is created.
    Create,
    /// Waiting for an account selection answer.
    Pending,
    /// No account to target.
    Nothing,
}

/// Inputs for choosing the account a request targets.
pub(super) struct AccountQuery<'a> {
    pub(super) application: &'a str,
    pub(super) instance: Option<&'a str>,
    pub(super) discriminator: String,
    pub(super) role_name: Option<&'a str>,
    pub(super) assignment_id: Option<&'a str>,
    pub(super) allow_create: bool,
    pub(super) hint: Option<&'a AbstractRequest>,
}

impl<'a> AccountQuery<'a> {
    pub(super) fn new(application: &'a str, discriminator: impl Into<String>) -> Self {
        Self {
            application,
            instance: None,
            discriminator: discriminator.into(),
            role_name: None,
            assignment_id: None,
            allow_create: false,
            hint: None,
        }
    }
}

/// Chooses the accounts a request targets.
///
/// Accounts already recorded on the role assignment win, then a single
/// link, then a link inferred from the request values. Anything still
/// ambiguous becomes an account selection question whose earlier answer
/// is reused on recompilation.
pub(super) fn resolve_account(
    project: &mut Project,
    context: &CompileContext,
    query: AccountQuery<'_>,
) -> AccountChoice {
    if let Some(assignment) = query
        .assignment_id
        .and_then(|assignment_id| context.identity.role_assignments.get(assignment_id))
    {
        let targets: Vec<String> = assignment
            .targets
            .iter()
            .filter(|target| {
                target.application == query.application
                    && target.instance.as_deref() == query.instance
            })
            .map(|target| target.native_identity.clone())
            .collect();
        if !targets.is_empty() {
            return AccountChoice::Existing(targets);
        }
    }

    let links = context.identity.links_on(query.application, query.instance);
    match links.as_slice() {
        [] if query.allow_create => return AccountChoice::Create,
        [] => return AccountChoice::Nothing,
        [link] => return AccountChoice::Existing(vec![link.native_identity.clone()]),
        _ => {}
    }

    if let Some(native_identity) = query
        .hint
        .and_then(|hint| infer_account(hint, links.as_slice(), context.matcher(query.application)))
    {
        return AccountChoice::Existing(vec![native_identity]);
    }

    if project
        .options
        .is_enabled(CompilerOption::ChooseFirstAmbiguousAccount)
    {
        return AccountChoice::Existing(vec![links[0].native_identity.clone()]);
    }

    let candidates = links
        .iter()
        .map(|link| link.native_identity.clone())
        .collect();
    let mut selection = AccountSelection::new(
        query.application,
        query.instance.map(ToOwned::to_owned),
        query.discriminator.as_str(),
        candidates,
    );
    if let Some(role_name) = query.role_name {
        selection = selection.with_role(role_name, query.assignment_id.map(ToOwned::to_owned));
    }
    if query.allow_create {
        selection = selection.allowing_create();
    }

    let id = selection.id.clone();
    project.add_question(Question::AccountSelection(selection));
    match project
        .find_question(id.as_str())
        .and_then(Question::as_account_selection)
    {
        Some(answer) if answer.answered && answer.do_create => AccountChoice::Create,
        Some(answer) if answer.answered => AccountChoice::Existing(answer.selected.clone()),
        _ => AccountChoice::Pending,
    }
}

/// Picks the one link holding a value the request takes away.
fn infer_account(hint: &AbstractRequest, links: &[&Link], matcher: ValueMatcher) -> Option<String> {
    let holders: Vec<&&Link> = links
        .iter()
        .filter(|link| {
            hint.all_generic_requests().any(|(_, generic)| {
                generic.operation.is_subtractive()
                    && !matcher
                        .intersection(generic.value.as_ref(), link.attribute(generic.name.as_str()))
                        .is_empty()
            })
        })
        .collect();

    match holders.as_slice() {
        [link] => Some(link.native_identity.clone()),
        _ => None,
    }
}

/// Builds a stable discriminator from the attribute changes of a request.
pub(super) fn request_signature(request: &AbstractRequest) -> String {
    let mut parts: Vec<String> = request
        .all_generic_requests()
        .map(|(kind, generic)| {
            format!(
                "{}:{}:{}:{}",
                kind.as_str(),
                generic.name,
                generic.operation.as_str(),
                generic.value.as_ref().map(Value::to_string).unwrap_or_default()
            )
        })
        .collect();
    parts.sort();
    parts.join(";")
}
