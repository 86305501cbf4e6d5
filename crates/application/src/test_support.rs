use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use provisio_core::{AppError, AppResult, Requester};
use provisio_domain::{
    AccountOperation, ApplicationDefinition, AttributeSyncTarget, DeferredRequest, Identity,
    IntegrationConfig, PendingRequest, Plan, ProvisioningResult, ProvisioningStatus,
    RoleDefinition, RoleDetection,
};

use crate::identity_reconciler::IdentityReconciler;
use crate::plan_compiler::PlanCompiler;
use crate::plan_evaluator::PlanEvaluator;
use crate::provisioning_ports::{
    AccountPlanApplier, ApplicationCatalog, BackendExecutor, EntitlementCorrelator, IdentityLock,
    IdentityStore, IntegrationConfigFinder, PasswordHistoryHasher, PendingRequestRepository,
    ProvisioningAuditEvent, ProvisioningAuditKind, ProvisioningAuditSink, RetryScheduler,
    RetryTask, RoleCatalog, RoleEventGenerator, ScriptEvaluator, SecretCipher,
};

#[derive(Default)]
pub(crate) struct FakeIdentityStore {
    identities: Mutex<HashMap<String, Identity>>,
    locked: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    saves: Mutex<usize>,
    evaporate: bool,
}

impl FakeIdentityStore {
    pub(crate) fn with_identity(mut self, identity: Identity) -> Self {
        let identity = if identity.is_persisted() {
            identity
        } else {
            let id = format!("id-{}", identity.name);
            identity.with_id(id)
        };
        self.identities
            .get_mut()
            .insert(identity.name.clone(), identity);
        self
    }

    pub(crate) fn evaporating(mut self) -> Self {
        self.evaporate = true;
        self
    }

    pub(crate) async fn identity(&self, name: &str) -> Option<Identity> {
        self.identities.lock().await.get(name).cloned()
    }

    pub(crate) async fn locked(&self) -> Vec<String> {
        self.locked.lock().await.clone()
    }

    pub(crate) async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }

    pub(crate) async fn saves(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl IdentityStore for FakeIdentityStore {
    async fn find_identity(&self, name: &str) -> AppResult<Option<Identity>> {
        Ok(self.identities.lock().await.get(name).cloned())
    }

    async fn lock_identity(&self, name: &str, _holder: &str) -> AppResult<IdentityLock> {
        if self.evaporate {
            return Ok(IdentityLock::Evaporated);
        }
        let Some(identity) = self.identities.lock().await.get(name).cloned() else {
            return Ok(IdentityLock::Evaporated);
        };
        self.locked.lock().await.push(name.to_owned());
        Ok(IdentityLock::Locked(identity))
    }

    async fn save_identity(&self, identity: Identity) -> AppResult<Identity> {
        let identity = if identity.is_persisted() {
            identity
        } else {
            let id = format!("id-{}", identity.name);
            identity.with_id(id)
        };
        self.identities
            .lock()
            .await
            .insert(identity.name.clone(), identity.clone());
        *self.saves.lock().await += 1;
        Ok(identity)
    }

    async fn unlock_identity(&self, identity: Identity) -> AppResult<Identity> {
        self.locked
            .lock()
            .await
            .retain(|name| *name != identity.name);
        self.save_identity(identity).await
    }

    async fn delete_identity(&self, name: &str) -> AppResult<()> {
        self.identities.lock().await.remove(name);
        self.locked.lock().await.retain(|locked| locked != name);
        self.deleted.lock().await.push(name.to_owned());
        Ok(())
    }

    async fn decache(&self, name: &str) -> AppResult<()> {
        self.locked.lock().await.retain(|locked| locked != name);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeCatalog {
    roles: HashMap<String, RoleDefinition>,
    applications: HashMap<String, ApplicationDefinition>,
    sync_targets: Vec<AttributeSyncTarget>,
    integrations: Vec<IntegrationConfig>,
}

impl FakeCatalog {
    pub(crate) fn with_role(mut self, role: RoleDefinition) -> Self {
        self.roles.insert(role.name.clone(), role);
        self
    }

    pub(crate) fn with_application(mut self, application: ApplicationDefinition) -> Self {
        self.applications
            .insert(application.name.clone(), application);
        self
    }

    pub(crate) fn with_sync_target(mut self, target: AttributeSyncTarget) -> Self {
        self.sync_targets.push(target);
        self
    }

    pub(crate) fn with_integration(mut self, integration: IntegrationConfig) -> Self {
        self.integrations.push(integration);
        self
    }
}

#[async_trait]
impl RoleCatalog for FakeCatalog {
    async fn find_role(&self, name: &str) -> AppResult<Option<RoleDefinition>> {
        Ok(self.roles.get(name).cloned())
    }
}

#[async_trait]
impl ApplicationCatalog for FakeCatalog {
    async fn find_application(&self, name: &str) -> AppResult<Option<ApplicationDefinition>> {
        Ok(self.applications.get(name).cloned())
    }

    async fn list_sync_targets(
        &self,
        identity_attribute: &str,
    ) -> AppResult<Vec<AttributeSyncTarget>> {
        Ok(self
            .sync_targets
            .iter()
            .filter(|target| target.identity_attribute == identity_attribute)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IntegrationConfigFinder for FakeCatalog {
    async fn list_integrations(&self) -> AppResult<Vec<IntegrationConfig>> {
        Ok(self.integrations.clone())
    }
}

/// Backend that answers every request with one status.
pub(crate) struct FakeExecutor {
    status: ProvisioningStatus,
    per_request: Vec<ProvisioningStatus>,
    fail: bool,
    received: Mutex<Vec<Plan>>,
}

impl FakeExecutor {
    pub(crate) fn new(status: ProvisioningStatus) -> Self {
        Self {
            status,
            per_request: Vec::new(),
            fail: false,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Answers request `n` with `statuses[n]`, falling back to the default.
    pub(crate) fn with_statuses(statuses: Vec<ProvisioningStatus>) -> Self {
        Self {
            per_request: statuses,
            ..Self::new(ProvisioningStatus::Committed)
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(ProvisioningStatus::Committed)
        }
    }

    pub(crate) async fn received(&self) -> Vec<Plan> {
        self.received.lock().await.clone()
    }

    fn result(&self) -> ProvisioningResult {
        Self::result_for(self.status)
    }

    fn result_for(status: ProvisioningStatus) -> ProvisioningResult {
        match status {
            ProvisioningStatus::Retry => ProvisioningResult::retry("backend busy"),
            ProvisioningStatus::Failed => ProvisioningResult::failed("backend rejected"),
            status => ProvisioningResult::new(status),
        }
    }
}

#[async_trait]
impl BackendExecutor for FakeExecutor {
    async fn provision(&self, _config: &IntegrationConfig, mut plan: Plan) -> AppResult<Plan> {
        self.received.lock().await.push(plan.clone());
        if self.fail {
            return Err(AppError::Backend("connector offline".to_owned()));
        }
        for (index, request) in plan.requests.iter_mut().enumerate() {
            if request.native_identity.is_none()
                && request.operation == Some(AccountOperation::Create)
            {
                request.native_identity = Some(format!("cn=new-{}", request.application));
            }
            let status = self.per_request.get(index).copied().unwrap_or(self.status);
            request.result = Some(Self::result_for(status));
        }
        Ok(plan)
    }

    async fn check_status(
        &self,
        _config: &IntegrationConfig,
        _request_id: &str,
    ) -> AppResult<ProvisioningResult> {
        Ok(self.result())
    }
}

#[derive(Default)]
pub(crate) struct FakeRetryScheduler {
    tasks: Mutex<Vec<RetryTask>>,
}

impl FakeRetryScheduler {
    pub(crate) async fn tasks(&self) -> Vec<RetryTask> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl RetryScheduler for FakeRetryScheduler {
    async fn schedule(&self, task: RetryTask) -> AppResult<()> {
        self.tasks.lock().await.push(task);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> AppResult<Vec<RetryTask>> {
        let mut tasks = self.tasks.lock().await;
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *tasks)
            .into_iter()
            .partition(|task| task.not_before <= now);
        *tasks = waiting;
        Ok(due)
    }
}

#[derive(Default)]
pub(crate) struct FakeAuditSink {
    events: Mutex<Vec<ProvisioningAuditEvent>>,
    fail: bool,
}

impl FakeAuditSink {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) async fn events(&self) -> Vec<ProvisioningAuditEvent> {
        self.events.lock().await.clone()
    }

    pub(crate) async fn kinds(&self) -> Vec<ProvisioningAuditKind> {
        self.events
            .lock()
            .await
            .iter()
            .map(|event| event.kind)
            .collect()
    }
}

#[async_trait]
impl ProvisioningAuditSink for FakeAuditSink {
    async fn append_event(&self, event: ProvisioningAuditEvent) -> AppResult<()> {
        if self.fail {
            return Err(AppError::Internal("audit store offline".to_owned()));
        }
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Scripts: `upper` uppercases `value`, `fail` errors, `plan` echoes the
/// `plan` argument, anything else returns null.
#[derive(Default)]
pub(crate) struct FakeScriptEvaluator;

#[async_trait]
impl ScriptEvaluator for FakeScriptEvaluator {
    async fn run(&self, script: &str, arguments: &Map<String, Value>) -> AppResult<Value> {
        match script {
            "upper" => Ok(arguments
                .get("value")
                .and_then(Value::as_str)
                .map_or(Value::Null, |value| Value::String(value.to_uppercase()))),
            "fail" => Err(AppError::Internal("script failed".to_owned())),
            "plan" => Ok(arguments.get("plan").cloned().unwrap_or(Value::Null)),
            _ => Ok(Value::Null),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakePendingRepository {
    records: Mutex<Vec<PendingRequest>>,
}

impl FakePendingRepository {
    pub(crate) fn with_record(mut self, record: PendingRequest) -> Self {
        self.records.get_mut().push(record);
        self
    }

    pub(crate) async fn records(&self) -> Vec<PendingRequest> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl PendingRequestRepository for FakePendingRepository {
    async fn save_pending_request(&self, request: PendingRequest) -> AppResult<()> {
        self.records.lock().await.push(request);
        Ok(())
    }

    async fn list_pending_requests(&self, identity_name: &str) -> AppResult<Vec<PendingRequest>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|record| record.identity_name == identity_name)
            .cloned()
            .collect())
    }

    async fn delete_pending_request(&self, id: &str) -> AppResult<()> {
        self.records.lock().await.retain(|record| record.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeCipher;

impl SecretCipher for FakeCipher {
    fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        Ok(format!("enc:{plaintext}"))
    }

    fn decrypt(&self, ciphertext: &str) -> AppResult<String> {
        ciphertext
            .strip_prefix("enc:")
            .map(str::to_owned)
            .ok_or_else(|| AppError::Validation("not an encrypted value".to_owned()))
    }
}

#[derive(Default)]
pub(crate) struct FakeHasher;

impl PasswordHistoryHasher for FakeHasher {
    fn hash_password(&self, password: &str) -> AppResult<String> {
        Ok(format!("hash:{password}"))
    }

    fn find_in_history(&self, password: &str, history: &[String]) -> AppResult<Option<usize>> {
        let entry = format!("hash:{password}");
        Ok(history.iter().position(|previous| *previous == entry))
    }
}

#[derive(Default)]
pub(crate) struct FakeCorrelator {
    detections: Vec<RoleDetection>,
    calls: Mutex<usize>,
}

impl FakeCorrelator {
    pub(crate) fn detecting(role_name: &str) -> Self {
        Self {
            detections: vec![RoleDetection {
                role_name: role_name.to_owned(),
                targets: Vec::new(),
            }],
            calls: Mutex::new(0),
        }
    }

    pub(crate) async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl EntitlementCorrelator for FakeCorrelator {
    async fn detect_roles(&self, _identity: &Identity) -> AppResult<Vec<RoleDetection>> {
        *self.calls.lock().await += 1;
        Ok(self.detections.clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeEventGenerator {
    deferred_seen: Mutex<usize>,
}

impl FakeEventGenerator {
    pub(crate) async fn deferred_seen(&self) -> usize {
        *self.deferred_seen.lock().await
    }
}

#[async_trait]
impl RoleEventGenerator for FakeEventGenerator {
    async fn schedule_events(
        &self,
        identity: &Identity,
        deferred: &[DeferredRequest],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        *self.deferred_seen.lock().await += deferred.len();
        let mut ids: Vec<String> = identity
            .role_assignments
            .iter()
            .filter(|assignment| assignment.awaits_sunrise(now))
            .map(|assignment| format!("sunrise:{}", assignment.role_name))
            .collect();
        ids.extend(
            deferred
                .iter()
                .map(|request| format!("deferred:{}:{}", request.application, request.request.name)),
        );
        Ok(ids)
    }
}

#[derive(Default)]
pub(crate) struct FakeApplier {
    calls: Mutex<usize>,
}

impl FakeApplier {
    pub(crate) async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl AccountPlanApplier for FakeApplier {
    async fn apply_account_plans(&self, _identity: &mut Identity, _plans: &[Plan]) -> AppResult<()> {
        *self.calls.lock().await += 1;
        Ok(())
    }
}

/// Wired services over shared fakes.
pub(crate) struct Harness {
    pub(crate) store: Arc<FakeIdentityStore>,
    pub(crate) catalog: Arc<FakeCatalog>,
    pub(crate) executor: Arc<FakeExecutor>,
    pub(crate) retries: Arc<FakeRetryScheduler>,
    pub(crate) audit: Arc<FakeAuditSink>,
    pub(crate) pending: Arc<FakePendingRepository>,
}

impl Harness {
    pub(crate) fn new(store: FakeIdentityStore, catalog: FakeCatalog, executor: FakeExecutor) -> Self {
        Self {
            store: Arc::new(store),
            catalog: Arc::new(catalog),
            executor: Arc::new(executor),
            retries: Arc::new(FakeRetryScheduler::default()),
            audit: Arc::new(FakeAuditSink::default()),
            pending: Arc::new(FakePendingRepository::default()),
        }
    }

    pub(crate) fn with_pending(mut self, pending: FakePendingRepository) -> Self {
        self.pending = Arc::new(pending);
        self
    }

    pub(crate) fn compiler(&self) -> PlanCompiler {
        PlanCompiler::new(
            self.store.clone(),
            self.catalog.clone(),
            self.catalog.clone(),
            self.catalog.clone(),
        )
        .with_script_evaluator(Arc::new(FakeScriptEvaluator))
        .with_pending_requests(self.pending.clone())
    }

    pub(crate) fn reconciler(&self) -> IdentityReconciler {
        IdentityReconciler::new(self.store.clone(), self.audit.clone()).with_password_protection(
            Arc::new(FakeCipher),
            Arc::new(FakeHasher),
            3,
        )
    }

    pub(crate) fn evaluator(&self) -> PlanEvaluator {
        PlanEvaluator::new(
            self.catalog.clone(),
            self.catalog.clone(),
            self.store.clone(),
            self.retries.clone(),
            self.audit.clone(),
            self.reconciler(),
        )
        .with_executor("fake", self.executor.clone())
        .with_script_evaluator(Arc::new(FakeScriptEvaluator))
        .with_secret_cipher(Arc::new(FakeCipher))
        .with_password_hasher(Arc::new(FakeHasher))
        .with_pending_requests(self.pending.clone())
    }
}

pub(crate) fn requester() -> Requester {
    Requester::new("spadmin", "Service Admin")
}
