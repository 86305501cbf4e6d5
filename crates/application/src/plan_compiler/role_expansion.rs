use std::collections::HashSet;

use provisio_domain::EntitlementProfile;

use super::accounts::{AccountChoice, AccountQuery, resolve_account};
use super::*;

/// One role named by the identity plan or implied by current assignments.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct RoleChange {
    pub(super) role_name: String,
    pub(super) assignment_id: Option<String>,
    pub(super) negative: bool,
    pub(super) tracking_ids: TrackingIds,
}

impl RoleChange {
    fn new(role_name: impl Into<String>, assignment_id: Option<String>) -> Self {
        Self {
            role_name: role_name.into(),
            assignment_id,
            negative: false,
            tracking_ids: TrackingIds::new(),
        }
    }

    /// Question discriminator, stable across recompilations.
    fn discriminator(&self) -> &str {
        match self.assignment_id.as_deref() {
            Some(assignment_id) if !is_temporary_assignment_id(assignment_id) => assignment_id,
            _ => self.role_name.as_str(),
        }
    }
}

/// Role changes of one compilation, grouped by effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct RoleChanges {
    pub(super) removed: Vec<RoleChange>,
    pub(super) added: Vec<RoleChange>,
    pub(super) retained: Vec<RoleChange>,
}

impl RoleChanges {
    fn is_removed(&self, role_name: &str) -> bool {
        self.removed
            .iter()
            .any(|change| change.role_name == role_name)
    }

    fn mentions(&self, role_name: &str) -> bool {
        self.removed
            .iter()
            .chain(&self.added)
            .chain(&self.retained)
            .any(|change| change.role_name == role_name)
    }
}

impl PlanCompiler {
    /// Collects the role changes of the identity plan.
    ///
    /// Dated role changes are left alone. Role adds without an assignment
    /// id get the first existing assignment of the role or a temporary id,
    /// written back onto the identity request.
    pub(super) fn analyze_role_operations(
        &self,
        project: &mut Project,
        context: &CompileContext,
    ) -> RoleChanges {
        let now = context.now;
        let identity = &context.identity;
        let mut changes = RoleChanges::default();

        if let Some(plan) = project.identity_plan.as_mut() {
            for request in &mut plan.requests {
                for generic in &mut request.attribute_requests {
                    if !ROLE_ATTRIBUTES.contains(&generic.name.as_str()) || generic.is_deferred() {
                        continue;
                    }
                    let detected = generic.name == DETECTED_ROLES;
                    let roles = values_as_text(generic.value.as_ref());
                    let operation = generic.operation;

                    match operation {
                        AttributeOperation::Add | AttributeOperation::Set => {
                            for role_name in &roles {
                                let assignment_id = if detected {
                                    None
                                } else {
                                    Some(assign_id(generic, identity, role_name, roles.len()))
                                };
                                let mut change = RoleChange::new(role_name, assignment_id);
                                change.tracking_ids = generic.tracking_ids.clone();
                                changes.added.push(change);
                            }

                            if operation == AttributeOperation::Set && !detected {
                                for role_name in identity.assigned_roles(now) {
                                    if roles.contains(&role_name) {
                                        continue;
                                    }
                                    let assignment_id = identity
                                        .role_assignments
                                        .first_for_role(role_name.as_str())
                                        .map(|assignment| assignment.assignment_id.clone());
                                    changes.removed.push(RoleChange::new(role_name, assignment_id));
                                }
                            }
                        }
                        AttributeOperation::Remove | AttributeOperation::Revoke => {
                            let negative = operation == AttributeOperation::Revoke
                                || generic.flag(arguments::NEGATIVE_ASSIGNMENT);
                            for role_name in &roles {
                                let mut change =
                                    RoleChange::new(role_name, generic.assignment_id.clone());
                                change.negative = negative;
                                change.tracking_ids = generic.tracking_ids.clone();
                                changes.removed.push(change);
                            }
                        }
                        AttributeOperation::Retain => {
                            for role_name in &roles {
                                changes
                                    .retained
                                    .push(RoleChange::new(role_name, generic.assignment_id.clone()));
                            }
                        }
                    }
                }
            }
        }

        let options = &project.options;
        if !options.is_enabled(CompilerOption::IgnoreCurrentRoles) {
            let mut current: Vec<RoleChange> = Vec::new();
            for assignment in identity.role_assignments.iter() {
                if !assignment.is_active(now) || changes.mentions(assignment.role_name.as_str()) {
                    continue;
                }
                current.push(RoleChange::new(
                    assignment.role_name.as_str(),
                    Some(assignment.assignment_id.clone()),
                ));
                if options.is_enabled(CompilerOption::RetainPermittedRoles) {
                    current.extend(
                        assignment
                            .permitted_roles
                            .iter()
                            .map(|role_name| RoleChange::new(role_name.as_str(), None)),
                    );
                }
            }
            current.sort_by(|left, right| left.role_name.cmp(&right.role_name));
            changes.retained.extend(current);
        }

        let removed: HashSet<String> = changes
            .removed
            .iter()
            .map(|change| change.role_name.clone())
            .collect();
        changes
            .retained
            .retain(|change| !removed.contains(&change.role_name));

        let preserve_detected = options.is_enabled(CompilerOption::PreserveDetectedRoles);
        for role_name in identity.detected_role_names() {
            let was_removed = removed.contains(role_name);
            if (was_removed && !preserve_detected) || (!was_removed && changes.mentions(role_name)) {
                continue;
            }
            changes.retained.push(RoleChange::new(role_name, None));
        }

        debug!(
            identity = %project.identity_name,
            added = changes.added.len(),
            removed = changes.removed.len(),
            retained = changes.retained.len(),
            "analyzed role operations"
        );
        changes
    }

    /// Turns role removals into entitlement removals.
    ///
    /// Entitlements still required by a role that stays, is added or is
    /// retained are never removed.
    pub(super) async fn expand_role_removes(
        &self,
        project: &mut Project,
        context: &mut CompileContext,
        roles: &RoleChanges,
    ) -> AppResult<()> {
        if roles.removed.is_empty() {
            return Ok(());
        }

        let include_inherited = !project
            .options
            .is_enabled(CompilerOption::NoInheritedRoleDeprovisioning);

        let mut keepers: Vec<String> = roles
            .added
            .iter()
            .chain(&roles.retained)
            .map(|change| change.role_name.clone())
            .collect();
        keepers.extend(
            context
                .identity
                .assigned_roles(context.now)
                .into_iter()
                .filter(|role_name| !roles.is_removed(role_name)),
        );
        keepers.sort();
        keepers.dedup();

        let mut protected = Vec::new();
        for role_name in &keepers {
            protected.extend(self.role_entitlements(context, role_name, true).await?);
        }

        for change in &roles.removed {
            let operation = if change.negative {
                AttributeOperation::Revoke
            } else {
                AttributeOperation::Remove
            };

            for profile in self
                .role_entitlements(context, change.role_name.as_str(), include_inherited)
                .await?
            {
                let matcher = self.matcher(context, profile.application.as_str()).await?;
                let (kept, removable): (Vec<Value>, Vec<Value>) =
                    profile.values.iter().cloned().partition(|value| {
                        protected.iter().any(|other| {
                            other.application == profile.application
                                && other.kind == profile.kind
                                && matcher.names_match(other.name.as_str(), profile.name.as_str())
                                && matcher.contains(other.values.as_slice(), value)
                        })
                    });

                let accounts = role_accounts(context, change, profile.application.as_str());
                for native_identity in accounts {
                    let key = RequestKey {
                        kind: RequestKind::Account,
                        application: profile.application.clone(),
                        instance: None,
                        native_identity: Some(native_identity.clone()),
                    };
                    if !kept.is_empty() {
                        let probe = GenericRequest::new(profile.name.as_str(), operation, None);
                        project.log_filtered([FilteredValue::new(
                            &key,
                            profile.kind,
                            &probe,
                            kept.clone(),
                            FilterReason::Dependency,
                        )]);
                    }
                    if removable.is_empty() {
                        continue;
                    }

                    let mut generic = GenericRequest::new(
                        profile.name.as_str(),
                        operation,
                        Some(Value::Array(removable.clone())),
                    );
                    generic.assignment_id.clone_from(&change.assignment_id);
                    generic.tracking_ids = change.tracking_ids.clone();

                    let request = entitlement_request(&profile, Some(native_identity), change, generic)?;
                    record_expansion(
                        project,
                        &request,
                        ExpansionCause::RoleExpansion,
                        change.role_name.as_str(),
                    );
                    let target = context.target_for(profile.application.as_str());
                    assimilate_into(project, &target, &request, matcher);
                }
            }
        }
        Ok(())
    }

    /// Turns role adds into entitlement adds and kept roles into retains.
    pub(super) async fn expand_role_adds(
        &self,
        project: &mut Project,
        context: &mut CompileContext,
        roles: &RoleChanges,
    ) -> AppResult<()> {
        for change in &roles.added {
            let profiles = self
                .role_entitlements(context, change.role_name.as_str(), true)
                .await?;

            let mut applications: Vec<String> = profiles
                .iter()
                .map(|profile| profile.application.clone())
                .collect();
            applications.sort();
            applications.dedup();

            for application in applications {
                let matcher = self.matcher(context, application.as_str()).await?;
                let mut query = AccountQuery::new(application.as_str(), change.discriminator());
                query.role_name = Some(change.role_name.as_str());
                query.assignment_id = change.assignment_id.as_deref();
                query.allow_create = true;

                let (native_identities, create) = match resolve_account(project, context, query) {
                    AccountChoice::Existing(native_identities) => (
                        native_identities.into_iter().map(Some).collect::<Vec<_>>(),
                        false,
                    ),
                    AccountChoice::Create => (vec![None], true),
                    AccountChoice::Pending => (vec![None], false),
                    AccountChoice::Nothing => (Vec::new(), false),
                };

                for native_identity in native_identities {
                    for profile in profiles
                        .iter()
                        .filter(|profile| profile.application == application)
                    {
                        let mut generic = GenericRequest::new(
                            profile.name.as_str(),
                            AttributeOperation::Add,
                            Some(Value::Array(profile.values.clone())),
                        );
                        generic.assignment_id.clone_from(&change.assignment_id);
                        generic.tracking_ids = change.tracking_ids.clone();

                        let mut request =
                            entitlement_request(profile, native_identity.clone(), change, generic)?;
                        if create {
                            request.operation = Some(AccountOperation::Create);
                        }
                        record_expansion(
                            project,
                            &request,
                            ExpansionCause::RoleExpansion,
                            change.role_name.as_str(),
                        );
                        let target = context.target_for(application.as_str());
                        assimilate_into(project, &target, &request, matcher);
                    }
                }
            }
        }

        for change in &roles.retained {
            for profile in self
                .role_entitlements(context, change.role_name.as_str(), true)
                .await?
            {
                let matcher = self.matcher(context, profile.application.as_str()).await?;
                for native_identity in role_accounts(context, change, profile.application.as_str()) {
                    let generic = GenericRequest::new(
                        profile.name.as_str(),
                        AttributeOperation::Retain,
                        Some(Value::Array(profile.values.clone())),
                    );
                    let request = entitlement_request(&profile, Some(native_identity), change, generic)?;
                    let target = context.target_for(profile.application.as_str());
                    assimilate_into(project, &target, &request, matcher);
                }
            }
        }
        Ok(())
    }

    /// Collects the entitlement profiles of a role and its required roles.
    ///
    /// Inherited roles are followed when asked. Unknown and disabled roles
    /// contribute nothing.
    async fn role_entitlements(
        &self,
        context: &mut CompileContext,
        role_name: &str,
        include_inherited: bool,
    ) -> AppResult<Vec<EntitlementProfile>> {
        let mut profiles = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![role_name.to_owned()];

        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(role) = self.role(context, name.as_str()).await? else {
                warn!(role = %name, "ignoring unknown role");
                continue;
            };
            if role.disabled {
                debug!(role = %name, "ignoring disabled role");
                continue;
            }

            profiles.extend(role.profiles.iter().cloned());
            pending.extend(role.required_roles.iter().cloned());
            if include_inherited {
                pending.extend(role.inherited_roles.iter().cloned());
            }
        }
        Ok(profiles)
    }
}

/// Picks the assignment id for a role add and records it on the request.
fn assign_id(
    generic: &mut GenericRequest,
    identity: &Identity,
    role_name: &str,
    role_count: usize,
) -> String {
    if let Some(assignment_id) = generic.assignment_id.clone() {
        return assignment_id;
    }

    let (assignment_id, used_first) = match identity.role_assignments.first_for_role(role_name) {
        Some(assignment) => (assignment.assignment_id.clone(), true),
        None => (AssignmentId::temporary(role_name).to_string(), false),
    };
    if role_count == 1 {
        generic.assignment_id = Some(assignment_id.clone());
        if used_first {
            generic
                .arguments
                .insert(arguments::USED_FIRST_ASSIGNMENT.to_owned(), Value::Bool(true));
        }
    }
    assignment_id
}

/// Accounts an existing role assignment covers on one application.
fn role_accounts(context: &CompileContext, change: &RoleChange, application: &str) -> Vec<String> {
    let targets: Vec<String> = change
        .assignment_id
        .as_deref()
        .and_then(|assignment_id| context.identity.role_assignments.get(assignment_id))
        .map(|assignment| {
            assignment
                .targets
                .iter()
                .filter(|target| target.application == application)
                .map(|target| target.native_identity.clone())
                .collect()
        })
        .unwrap_or_default();
    if !targets.is_empty() {
        return targets;
    }

    context
        .identity
        .links
        .iter()
        .filter(|link| link.application == application)
        .map(|link| link.native_identity.clone())
        .collect()
}

fn entitlement_request(
    profile: &EntitlementProfile,
    native_identity: Option<String>,
    change: &RoleChange,
    generic: GenericRequest,
) -> AppResult<AbstractRequest> {
    let mut request = AbstractRequest::account(profile.application.as_str())?;
    request.native_identity = native_identity;
    request.tracking_ids = change.tracking_ids.clone();
    if let Some(assignment_id) = change.assignment_id.as_deref() {
        request.add_assignment_id(assignment_id);
    }
    request.generic_requests_mut(profile.kind).push(generic);
    Ok(request)
}
