use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use provisio_core::{AppError, AppResult, AssignmentId, Requester};
use provisio_domain::identity_attributes::{
    ACTIVITY_CONFIG, ARCHIVES, ASSIGNED_ROLES, CAPABILITIES, CONTROLLED_SCOPES,
    CONTROLS_ASSIGNED_SCOPE, DETECTED_ROLES, EVENTS, FORWARD, FORWARD_END_DATE,
    FORWARD_START_DATE, LINKS, MANAGER, NEEDS_REFRESH, PASSWORD, PROTECTED, PROVISIONING_REQUESTS,
    ROLE_ATTRIBUTES, SCOPE, SNAPSHOTS, TYPE, USE_BY, WORKGROUPS,
};
use provisio_domain::{
    AccountOperation, AssignmentSource, AssignmentUpdate, AttributeOperation, CompilerOption,
    CompilerOptions, DeferredRequest, GenericRequest, GenericRequestKind, Identity, Plan,
    Project, ProvisioningResult, RequestKey, RoleAssignment, RoleDetection, ValueMatcher,
    arguments, is_empty_value, to_list, value_as_text, values_as_text,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::provisioning_ports::{
    AccountPlanApplier, EntitlementCorrelator, IdentityLock, IdentityStore,
    PasswordHistoryHasher, ProvisioningAuditEvent, ProvisioningAuditKind, ProvisioningAuditSink,
    RoleEventGenerator, SecretCipher,
};

mod handlers;
mod roles;

/// Password hash to record on one account's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPasswordChange {
    /// Application of the account.
    pub application: String,
    /// Application instance.
    pub instance: Option<String>,
    /// Native identity of the account.
    pub native_identity: String,
    /// Hash of the new password.
    pub password_hash: String,
}

/// Terminal state of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityOutcome {
    /// The identity was updated and committed.
    Committed(Identity),
    /// The identity was deleted by the plan.
    Deleted,
    /// The identity disappeared before it could be locked.
    Evaporated,
}

type AttributeHandler = fn(&mut ReconcileContext<'_>, &GenericRequest) -> AppResult<()>;

/// State of one reconciliation pass.
struct ReconcileContext<'a> {
    identity: Identity,
    requester: &'a Requester,
    now: DateTime<Utc>,
    audits: Vec<ProvisioningAuditEvent>,
    roles_changed: bool,
    secret_cipher: Option<&'a dyn SecretCipher>,
    password_hasher: Option<&'a dyn PasswordHistoryHasher>,
    password_history_length: usize,
}

impl ReconcileContext<'_> {
    fn audit(&mut self, event: ProvisioningAuditEvent) {
        self.audits.push(event);
    }
}

/// Applies identity plan changes to the local identity record.
///
/// Attribute changes are routed through a handler table keyed by attribute
/// name; names without a handler are stored as extended attributes.
#[derive(Clone)]
pub struct IdentityReconciler {
    identity_store: Arc<dyn IdentityStore>,
    audit_sink: Arc<dyn ProvisioningAuditSink>,
    correlator: Option<Arc<dyn EntitlementCorrelator>>,
    event_generator: Option<Arc<dyn RoleEventGenerator>>,
    plan_applier: Option<Arc<dyn AccountPlanApplier>>,
    secret_cipher: Option<Arc<dyn SecretCipher>>,
    password_hasher: Option<Arc<dyn PasswordHistoryHasher>>,
    password_history_length: usize,
    handlers: HashMap<&'static str, AttributeHandler>,
}

impl IdentityReconciler {
    /// Creates a reconciler over an identity store.
    #[must_use]
    pub fn new(
        identity_store: Arc<dyn IdentityStore>,
        audit_sink: Arc<dyn ProvisioningAuditSink>,
    ) -> Self {
        Self {
            identity_store,
            audit_sink,
            correlator: None,
            event_generator: None,
            plan_applier: None,
            secret_cipher: None,
            password_hasher: None,
            password_history_length: 5,
            handlers: handler_table(),
        }
    }

    /// Adds role re-detection after assignment changes.
    #[must_use]
    pub fn with_correlator(mut self, correlator: Arc<dyn EntitlementCorrelator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    /// Adds scheduling of sunrise and sunset events.
    #[must_use]
    pub fn with_event_generator(mut self, event_generator: Arc<dyn RoleEventGenerator>) -> Self {
        self.event_generator = Some(event_generator);
        self
    }

    /// Adds mirroring of committed account changes onto links.
    #[must_use]
    pub fn with_plan_applier(mut self, plan_applier: Arc<dyn AccountPlanApplier>) -> Self {
        self.plan_applier = Some(plan_applier);
        self
    }

    /// Adds password encryption and history checks.
    #[must_use]
    pub fn with_password_protection(
        mut self,
        secret_cipher: Arc<dyn SecretCipher>,
        password_hasher: Arc<dyn PasswordHistoryHasher>,
        password_history_length: usize,
    ) -> Self {
        self.secret_cipher = Some(secret_cipher);
        self.password_hasher = Some(password_hasher);
        self.password_history_length = password_history_length;
        self
    }

    /// Applies the identity plan of an executed project.
    ///
    /// The identity is locked unless it is being created, the run is
    /// simulated or locking is disabled. Any failure after the lock releases
    /// it without saving.
    pub async fn provision(
        &self,
        project: &mut Project,
        requester: &Requester,
        link_passwords: Vec<LinkPasswordChange>,
    ) -> AppResult<IdentityOutcome> {
        let identity_name = project.identity_name.clone();
        let options = project.options.clone();
        let simulate = options.is_enabled(CompilerOption::SimulateProvisioning);

        let existing = self
            .identity_store
            .find_identity(identity_name.as_str())
            .await?;
        let creating = existing
            .as_ref()
            .is_none_or(|identity| !identity.is_persisted());

        let (identity, locked) =
            if creating || simulate || options.is_enabled(CompilerOption::NoLocking) {
                let identity = match existing {
                    Some(identity) => identity,
                    None => Identity::new(identity_name.as_str())?,
                };
                (identity, false)
            } else {
                match self
                    .identity_store
                    .lock_identity(identity_name.as_str(), requester.name())
                    .await?
                {
                    IdentityLock::Locked(identity) => (identity, true),
                    IdentityLock::Evaporated => {
                        warn!(identity = %identity_name, "identity evaporated before locking");
                        return Ok(IdentityOutcome::Evaporated);
                    }
                }
            };

        let result = self
            .reconcile(project, &options, requester, identity, locked, link_passwords)
            .await;

        if let Err(error) = &result {
            if locked {
                if let Err(decache_error) = self.identity_store.decache(identity_name.as_str()).await {
                    warn!(
                        identity = %identity_name,
                        error = %decache_error,
                        "failed to release identity after reconciliation error"
                    );
                }
            }
            warn!(identity = %identity_name, error = %error, "identity reconciliation failed");
        }
        result
    }

    async fn reconcile(
        &self,
        project: &mut Project,
        options: &CompilerOptions,
        requester: &Requester,
        mut identity: Identity,
        locked: bool,
        link_passwords: Vec<LinkPasswordChange>,
    ) -> AppResult<IdentityOutcome> {
        let simulate = options.is_enabled(CompilerOption::SimulateProvisioning);
        let snapshot = options
            .is_enabled(CompilerOption::DoRefresh)
            .then(|| identity.attributes.clone());

        if !simulate {
            if let Some(applier) = &self.plan_applier {
                applier.apply_account_plans(&mut identity, &project.plans).await?;
            }
        }
        self.record_link_passwords(&mut identity, link_passwords);

        let identity_plan = project.identity_plan.clone().unwrap_or_default();
        if identity_plan.requests.iter().any(|request| {
            request.operation == Some(AccountOperation::Delete)
        }) {
            return self
                .delete_identity(project, identity, locked, simulate)
                .await;
        }

        let mut context = ReconcileContext {
            identity,
            requester,
            now: Utc::now(),
            audits: Vec::new(),
            roles_changed: false,
            secret_cipher: self.secret_cipher.as_deref(),
            password_hasher: self.password_hasher.as_deref(),
            password_history_length: self.password_history_length,
        };

        let mut deferred = project.deferred_requests.clone();
        for (key, generic) in ordered_changes(&identity_plan) {
            if generic.is_deferred() && !ROLE_ATTRIBUTES.contains(&generic.name.as_str()) {
                debug!(attribute = %generic.name, "leaving dated identity change for its event");
                deferred.push(DeferredRequest::new(
                    &key,
                    GenericRequestKind::Attribute,
                    generic.clone(),
                ));
                continue;
            }
            let handler = self
                .handlers
                .get(generic.name.as_str())
                .copied()
                .unwrap_or(handlers::extended_attribute as AttributeHandler);
            handler(&mut context, generic)?;
        }

        if context.roles_changed
            && !simulate
            && !options.is_enabled(CompilerOption::NoRoleDetection)
        {
            if let Some(correlator) = &self.correlator {
                context.identity.detected_roles = correlator.detect_roles(&context.identity).await?;
            }
        }

        if !simulate {
            for (old_id, new_id) in context.identity.role_assignments.commit_temporary_ids() {
                debug!(old = %old_id, new = %new_id, "committed assignment id");
            }
            if let Some(generator) = &self.event_generator {
                let event_ids = generator
                    .schedule_events(&context.identity, &deferred, context.now)
                    .await?;
                for event_id in event_ids {
                    if !context.identity.events.contains(&event_id) {
                        context.identity.events.push(event_id);
                    }
                }
            }
        }

        if let Some(before) = snapshot {
            let changed = changed_attributes(&before, &context.identity.attributes);
            if !changed.is_empty() {
                info!(
                    identity = %context.identity.name,
                    changed = ?changed,
                    "identity attributes changed"
                );
            }
        }

        let ReconcileContext {
            identity, audits, ..
        } = context;
        let identity = if simulate {
            identity
        } else if locked {
            self.identity_store.unlock_identity(identity).await?
        } else {
            self.identity_store.save_identity(identity).await?
        };

        mark_committed(project.identity_plan.as_mut());
        for event in audits {
            self.audit(event).await;
        }
        info!(identity = %identity.name, simulate, "identity reconciled");
        Ok(IdentityOutcome::Committed(identity))
    }

    async fn delete_identity(
        &self,
        project: &mut Project,
        identity: Identity,
        locked: bool,
        simulate: bool,
    ) -> AppResult<IdentityOutcome> {
        if simulate {
            mark_committed(project.identity_plan.as_mut());
            return Ok(IdentityOutcome::Deleted);
        }
        if identity.is_persisted() || locked {
            self.identity_store
                .delete_identity(identity.name.as_str())
                .await?;
        }

        mark_committed(project.identity_plan.as_mut());
        self.audit(ProvisioningAuditEvent::new(
            ProvisioningAuditKind::IdentityDeleted,
            identity.name.as_str(),
        ))
        .await;
        info!(identity = %identity.name, "identity deleted");
        Ok(IdentityOutcome::Deleted)
    }

    fn record_link_passwords(&self, identity: &mut Identity, changes: Vec<LinkPasswordChange>) {
        for change in changes {
            let Some(link) = identity.find_link_mut(
                change.application.as_str(),
                change.instance.as_deref(),
                change.native_identity.as_str(),
            ) else {
                warn!(
                    application = %change.application,
                    native_identity = %change.native_identity,
                    "no link for password history"
                );
                continue;
            };
            link.password_history.insert(0, change.password_hash);
            link.password_history.truncate(self.password_history_length);
        }
    }

    async fn audit(&self, event: ProvisioningAuditEvent) {
        let kind = event.kind;
        if let Err(error) = self.audit_sink.append_event(event).await {
            warn!(event = kind.as_str(), error = %error, "failed to append audit event");
        }
    }
}

fn handler_table() -> HashMap<&'static str, AttributeHandler> {
    let entries: [(&'static str, AttributeHandler); 22] = [
        (ASSIGNED_ROLES, roles::assigned_roles),
        (DETECTED_ROLES, roles::detected_roles),
        (CAPABILITIES, handlers::capabilities),
        (CONTROLLED_SCOPES, handlers::controlled_scopes),
        (SCOPE, handlers::assigned_scope),
        (CONTROLS_ASSIGNED_SCOPE, handlers::controls_assigned_scope),
        (PASSWORD, handlers::password),
        (WORKGROUPS, handlers::workgroups),
        (ACTIVITY_CONFIG, handlers::activity_config),
        (ARCHIVES, handlers::archives),
        (SNAPSHOTS, handlers::snapshots),
        (EVENTS, handlers::events),
        (PROVISIONING_REQUESTS, handlers::provisioning_requests),
        (LINKS, handlers::links),
        (FORWARD, handlers::preference),
        (FORWARD_START_DATE, handlers::preference),
        (FORWARD_END_DATE, handlers::preference),
        (USE_BY, handlers::use_by),
        (PROTECTED, handlers::protected),
        (MANAGER, handlers::manager),
        (NEEDS_REFRESH, handlers::needs_refresh),
        (TYPE, handlers::identity_type),
    ];
    entries.into_iter().collect()
}

/// Role assignment changes first, everything else in plan order.
fn ordered_changes(plan: &Plan) -> Vec<(RequestKey, &GenericRequest)> {
    let changes: Vec<(RequestKey, &GenericRequest)> = plan
        .requests
        .iter()
        .flat_map(|request| {
            let key = request.key();
            request
                .attribute_requests
                .iter()
                .map(move |generic| (key.clone(), generic))
        })
        .collect();
    let (roles, others): (Vec<_>, Vec<_>) = changes
        .into_iter()
        .partition(|(_, generic)| generic.name == ASSIGNED_ROLES);
    roles.into_iter().chain(others).collect()
}

fn mark_committed(plan: Option<&mut Plan>) {
    let Some(plan) = plan else {
        return;
    };
    for request in &mut plan.requests {
        if request.result.is_none() {
            request.result = Some(ProvisioningResult::committed());
        }
    }
}

fn changed_attributes(before: &Map<String, Value>, after: &Map<String, Value>) -> Vec<String> {
    let mut changed: Vec<String> = after
        .iter()
        .filter(|(name, value)| before.get(name.as_str()) != Some(*value))
        .map(|(name, _)| name.clone())
        .chain(
            before
                .keys()
                .filter(|name| !after.contains_key(name.as_str()))
                .cloned(),
        )
        .collect();
    changed.sort();
    changed
}
