use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use provisio_core::{AppError, AppResult, Requester};
use provisio_domain::identity_attributes::PASSWORD;
use provisio_domain::{
    AccountOperation, AttributeOperation, CompilerOption, CompilerOptions, GenericRequestKind,
    Identity, IntegrationConfig, MaintenanceWindow, PendingRequest, Plan, Project,
    ProvisioningResult, ProvisioningStatus, ValueMatcher, arguments, value_as_text, worst_status,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::identity_reconciler::{IdentityOutcome, IdentityReconciler, LinkPasswordChange};
use crate::provisioning_ports::{
    ApplicationCatalog, BackendExecutor, DependencyEvaluator, IdentityStore,
    IntegrationConfigFinder, PasswordHistoryHasher, PendingRequestRepository,
    ProvisioningAuditEvent, ProvisioningAuditKind, ProvisioningAuditSink, RetryScheduler,
    RetryTask, ScriptEvaluator, SecretCipher,
};

mod bookkeeping;
mod ordering;
mod retry;

pub use retry::{build_retry_plan, retry_date};

const GENERIC_KINDS: [GenericRequestKind; 2] =
    [GenericRequestKind::Attribute, GenericRequestKind::Permission];

/// Tunables of plan execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorSettings {
    /// Delay before a retry outside maintenance windows.
    pub retry_interval: Duration,
    /// Lifetime of pending request records without a retry date.
    pub pending_lifetime: Duration,
    /// Number of password hashes kept per account.
    pub password_history_length: usize,
    /// Attempts after which retried work is failed.
    pub max_retry_attempts: u32,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::minutes(60),
            pending_lifetime: Duration::hours(24),
            password_history_length: 5,
            max_retry_attempts: 10,
        }
    }
}

/// Executes compiled projects against backend integrations.
///
/// Integration plans run one at a time in dependency order. Every outcome is
/// recorded on the plan; only broken state aborts the call. The identity
/// reconciler runs last regardless of backend outcomes.
#[derive(Clone)]
pub struct PlanEvaluator {
    integration_finder: Arc<dyn IntegrationConfigFinder>,
    application_catalog: Arc<dyn ApplicationCatalog>,
    identity_store: Arc<dyn IdentityStore>,
    retry_scheduler: Arc<dyn RetryScheduler>,
    audit_sink: Arc<dyn ProvisioningAuditSink>,
    reconciler: IdentityReconciler,
    executors: HashMap<String, Arc<dyn BackendExecutor>>,
    dependency_evaluator: Option<Arc<dyn DependencyEvaluator>>,
    script_evaluator: Option<Arc<dyn ScriptEvaluator>>,
    secret_cipher: Option<Arc<dyn SecretCipher>>,
    password_hasher: Option<Arc<dyn PasswordHistoryHasher>>,
    pending_requests: Option<Arc<dyn PendingRequestRepository>>,
    settings: EvaluatorSettings,
}

/// Per-call state of one execution.
struct ExecutionContext {
    identity: Option<Identity>,
    integrations: Vec<IntegrationConfig>,
    options: CompilerOptions,
    now: DateTime<Utc>,
    attempt: u32,
}

impl PlanEvaluator {
    /// Creates an evaluator without any registered executor.
    #[must_use]
    pub fn new(
        integration_finder: Arc<dyn IntegrationConfigFinder>,
        application_catalog: Arc<dyn ApplicationCatalog>,
        identity_store: Arc<dyn IdentityStore>,
        retry_scheduler: Arc<dyn RetryScheduler>,
        audit_sink: Arc<dyn ProvisioningAuditSink>,
        reconciler: IdentityReconciler,
    ) -> Self {
        Self {
            integration_finder,
            application_catalog,
            identity_store,
            retry_scheduler,
            audit_sink,
            reconciler,
            executors: HashMap::new(),
            dependency_evaluator: None,
            script_evaluator: None,
            secret_cipher: None,
            password_hasher: None,
            pending_requests: None,
            settings: EvaluatorSettings::default(),
        }
    }

    /// Registers the executor integrations refer to by name.
    #[must_use]
    pub fn with_executor(mut self, name: &str, executor: Arc<dyn BackendExecutor>) -> Self {
        self.executors.insert(name.to_owned(), executor);
        self
    }

    /// Adds ordering of integration plans by application dependencies.
    #[must_use]
    pub fn with_dependency_evaluator(
        mut self,
        dependency_evaluator: Arc<dyn DependencyEvaluator>,
    ) -> Self {
        self.dependency_evaluator = Some(dependency_evaluator);
        self
    }

    /// Adds the evaluator for plan initializer scripts.
    #[must_use]
    pub fn with_script_evaluator(mut self, script_evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        self.script_evaluator = Some(script_evaluator);
        self
    }

    /// Adds decryption of secret values before they reach a backend.
    #[must_use]
    pub fn with_secret_cipher(mut self, secret_cipher: Arc<dyn SecretCipher>) -> Self {
        self.secret_cipher = Some(secret_cipher);
        self
    }

    /// Adds account password history.
    #[must_use]
    pub fn with_password_hasher(mut self, password_hasher: Arc<dyn PasswordHistoryHasher>) -> Self {
        self.password_hasher = Some(password_hasher);
        self
    }

    /// Adds recording of unconfirmed work for later compilations.
    #[must_use]
    pub fn with_pending_requests(
        mut self,
        pending_requests: Arc<dyn PendingRequestRepository>,
    ) -> Self {
        self.pending_requests = Some(pending_requests);
        self
    }

    /// Replaces the default settings.
    #[must_use]
    pub fn with_settings(mut self, settings: EvaluatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the active settings.
    #[must_use]
    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Executes a compiled project.
    ///
    /// Returns `None` when link updates are disabled and nothing ran.
    pub async fn execute(
        &self,
        project: &mut Project,
        requester: &Requester,
    ) -> AppResult<Option<IdentityOutcome>> {
        self.execute_attempt(project, requester, 1).await
    }

    /// Executes a project as the given retry attempt.
    pub(crate) async fn execute_attempt(
        &self,
        project: &mut Project,
        requester: &Requester,
        attempt: u32,
    ) -> AppResult<Option<IdentityOutcome>> {
        if project.options.is_enabled(CompilerOption::NoLinkUpdate) {
            info!(identity = %project.identity_name, "link updates disabled, nothing executed");
            return Ok(None);
        }

        let context = ExecutionContext {
            identity: self
                .identity_store
                .find_identity(project.identity_name.as_str())
                .await?,
            integrations: self.integration_finder.list_integrations().await?,
            options: project.options.clone(),
            now: Utc::now(),
            attempt,
        };

        let matchers = self.load_matchers(project).await?;
        for plan in project.all_plans_mut() {
            plan.simplify(|application| {
                matchers
                    .get(application)
                    .copied()
                    .unwrap_or_else(ValueMatcher::exact)
            });
        }

        let order = self.execution_order(project).await?;
        for scheduled in &order {
            let blocked = ordering::blocking_result(project, scheduled, &context);
            let Some(plan) = project.plans.get_mut(scheduled.index) else {
                continue;
            };
            match blocked {
                Some(result) => {
                    warn!(
                        identity = %project.identity_name,
                        integration = %scheduled.integration,
                        status = result.status.as_str(),
                        "integration plan blocked by its dependencies"
                    );
                    mark_plan(plan, &result);
                }
                None => self.run_plan(plan, &context).await,
            }
        }

        if let Some(plan) = project.unmanaged_plan.as_mut() {
            queue_manual_work(plan);
        }

        self.schedule_retries(project, &context).await?;
        self.audit_results(project).await;
        self.record_pending(project, &context).await;
        let link_passwords = self.link_password_changes(project);

        let outcome = self
            .reconciler
            .provision(project, requester, link_passwords)
            .await?;
        info!(
            identity = %project.identity_name,
            plans = project.plans.len(),
            attempt,
            "project executed"
        );
        Ok(Some(outcome))
    }

    async fn load_matchers(&self, project: &Project) -> AppResult<HashMap<String, ValueMatcher>> {
        let mut matchers = HashMap::new();
        for plan in project.all_plans() {
            for request in &plan.requests {
                if matchers.contains_key(request.application.as_str()) {
                    continue;
                }
                let matcher = self
                    .application_catalog
                    .find_application(request.application.as_str())
                    .await?
                    .map_or_else(ValueMatcher::exact, |definition| definition.matcher());
                matchers.insert(request.application.clone(), matcher);
            }
        }
        Ok(matchers)
    }

    /// Sends one integration plan to its backend and copies the results back.
    async fn run_plan(&self, plan: &mut Plan, context: &ExecutionContext) {
        let integration = plan.target_integration.clone().unwrap_or_default();
        let Some(config) = context
            .integrations
            .iter()
            .find(|config| config.name == integration)
        else {
            warn!(integration = %integration, "no configuration for integration");
            mark_plan(
                plan,
                &ProvisioningResult::failed(format!("unknown integration '{integration}'")),
            );
            return;
        };

        if context.options.skips_backends() {
            debug!(integration = %integration, "backend execution skipped");
            mark_plan(plan, &ProvisioningResult::committed());
            return;
        }

        if config.maintenance.is_active(context.now) {
            let message = format!("integration '{integration}' is in maintenance");
            let result = if context
                .options
                .is_enabled(CompilerOption::NoMaintenanceWindowRetry)
            {
                ProvisioningResult::failed(message)
            } else {
                let mut result = ProvisioningResult::retry(message);
                result.retry_at = Some(retry_date(
                    config.maintenance,
                    context.now,
                    self.settings.retry_interval,
                ));
                result
            };
            info!(
                integration = %integration,
                status = result.status.as_str(),
                "integration in maintenance"
            );
            mark_plan(plan, &result);
            return;
        }

        let Some(executor) = self.executors.get(config.executor.as_str()) else {
            warn!(integration = %integration, executor = %config.executor, "no executor registered");
            mark_plan(
                plan,
                &ProvisioningResult::failed(format!("no executor '{}' registered", config.executor)),
            );
            return;
        };

        if let Some(script) = config.plan_initializer.as_deref() {
            match self.initialize_plan(script, config, plan).await {
                Ok(Some(replacement)) => {
                    *plan = replacement;
                    plan.target_integration = Some(integration.clone());
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(integration = %integration, error = %error, "plan initializer failed");
                    mark_plan(
                        plan,
                        &ProvisioningResult::failed(format!("plan initializer failed: {error}")),
                    );
                    return;
                }
            }
        }

        let outgoing = match self.reveal_secrets(plan.clone()) {
            Ok(outgoing) => outgoing,
            Err(error) => {
                warn!(integration = %integration, error = %error, "could not decrypt plan secrets");
                mark_plan(plan, &ProvisioningResult::failed(error.to_string()));
                return;
            }
        };

        match executor.provision(config, outgoing).await {
            Ok(returned) => copy_results(plan, &returned),
            Err(error) => {
                warn!(integration = %integration, error = %error, "backend execution failed");
                mark_plan(plan, &ProvisioningResult::failed(error.to_string()));
                return;
            }
        }

        if context
            .options
            .is_enabled(CompilerOption::OptimisticProvisioning)
        {
            optimistic_results(plan);
        }
        if plan_status(plan).is_none() {
            mark_plan(plan, &ProvisioningResult::committed());
        }
        debug!(
            integration = %integration,
            status = plan_status(plan).map_or("none", ProvisioningStatus::as_str),
            "integration plan executed"
        );
    }

    /// Runs the integration's plan initializer.
    ///
    /// A result that reads as a plan replaces the outgoing plan.
    async fn initialize_plan(
        &self,
        script: &str,
        config: &IntegrationConfig,
        plan: &Plan,
    ) -> AppResult<Option<Plan>> {
        let evaluator = self
            .script_evaluator
            .as_ref()
            .ok_or_else(|| AppError::Dependency("no script evaluator configured".to_owned()))?;
        let mut script_arguments = Map::new();
        script_arguments.insert(
            "plan".to_owned(),
            serde_json::to_value(plan)
                .map_err(|error| AppError::Internal(format!("failed to serialize plan: {error}")))?,
        );
        script_arguments.insert("integration".to_owned(), Value::String(config.name.clone()));

        let value = evaluator.run(script, &script_arguments).await?;
        if !value.is_object() {
            return Ok(None);
        }
        Ok(serde_json::from_value::<Plan>(value).ok())
    }

    /// Decrypts values flagged secret on the copy sent to the backend.
    fn reveal_secrets(&self, mut plan: Plan) -> AppResult<Plan> {
        for request in &mut plan.requests {
            for kind in GENERIC_KINDS {
                for generic in request.generic_requests_mut(kind) {
                    if !generic.flag(arguments::SECRET) {
                        continue;
                    }
                    let Some(Value::String(ciphertext)) = generic.value.as_ref() else {
                        continue;
                    };
                    let cipher = self.secret_cipher.as_ref().ok_or_else(|| {
                        AppError::Dependency("no secret cipher configured".to_owned())
                    })?;
                    generic.value = Some(Value::String(cipher.decrypt(ciphertext.as_str())?));
                    generic.arguments.remove(arguments::SECRET);
                }
            }
        }
        Ok(plan)
    }
}

/// Sets one result on the plan and every request, dropping finer results.
fn mark_plan(plan: &mut Plan, result: &ProvisioningResult) {
    plan.result = Some(result.clone());
    for request in &mut plan.requests {
        request.result = Some(result.clone());
        for kind in GENERIC_KINDS {
            for generic in request.generic_requests_mut(kind) {
                generic.result = None;
            }
        }
    }
}

/// Copies results and assigned native identities back by position.
fn copy_results(plan: &mut Plan, returned: &Plan) {
    plan.result.clone_from(&returned.result);
    for (request, answered) in plan.requests.iter_mut().zip(&returned.requests) {
        request.result.clone_from(&answered.result);
        if request.native_identity.is_none() {
            request.native_identity.clone_from(&answered.native_identity);
        }
        for kind in GENERIC_KINDS {
            let answers = answered.generic_requests(kind);
            for (generic, answer) in request.generic_requests_mut(kind).iter_mut().zip(answers) {
                generic.result.clone_from(&answer.result);
            }
        }
    }
}

fn optimistic_results(plan: &mut Plan) {
    let promote = |result: &mut Option<ProvisioningResult>| {
        if let Some(result) = result.as_mut().filter(|result| !result.is_failed()) {
            result.status = ProvisioningStatus::Committed;
        }
    };
    promote(&mut plan.result);
    for request in &mut plan.requests {
        promote(&mut request.result);
        for kind in GENERIC_KINDS {
            for generic in request.generic_requests_mut(kind) {
                promote(&mut generic.result);
            }
        }
    }
}

/// Effective statuses of every request and generic request of a plan.
fn effective_statuses(plan: &Plan) -> impl Iterator<Item = ProvisioningStatus> + '_ {
    plan.requests.iter().flat_map(|request| {
        let own = plan.effective_result(request, None).map(|result| result.status);
        own.into_iter().chain(
            request
                .all_generic_requests()
                .filter_map(|(_, generic)| plan.effective_result(request, Some(generic)))
                .map(|result| result.status),
        )
    })
}

/// Worst effective status over every request of a plan.
fn plan_status(plan: &Plan) -> Option<ProvisioningStatus> {
    worst_status(effective_statuses(plan).chain(plan.result.as_ref().map(|result| result.status)))
}

/// Whether any part of the plan still asks for a retry.
///
/// Failed work next to it does not cancel the retry; only a plan whose
/// every account request failed is given up.
fn needs_retry(plan: &Plan) -> bool {
    let all_failed = !plan.requests.is_empty()
        && plan.requests.iter().all(|request| {
            plan.effective_result(request, None)
                .is_some_and(|result| result.status == ProvisioningStatus::Failed)
        });
    if all_failed {
        return false;
    }
    plan.result
        .iter()
        .map(|result| result.status)
        .chain(effective_statuses(plan))
        .any(|status| status == ProvisioningStatus::Retry)
}

/// Unmanaged work is handed to people; link edits are local and commit at once.
fn queue_manual_work(plan: &mut Plan) {
    for request in &mut plan.requests {
        if request.result.is_some() {
            continue;
        }
        request.result = Some(if request.flag(arguments::LINK_EDIT) {
            ProvisioningResult::committed()
        } else {
            let mut result = ProvisioningResult::new(ProvisioningStatus::Queued);
            result.warnings.push("manual".to_owned());
            result
        });
    }
}

#[cfg(test)]
mod tests;
