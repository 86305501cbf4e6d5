//! Provisio scenario runner.
//!
//! Loads a scenario document, provisions its master plan against the
//! simulated backend and drains retry tasks as they become due.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use provisio_application::{
    EvaluatorSettings, IdentityReconciler, PlanCompiler, PlanEvaluator, ProvisioningReport,
    ProvisioningService,
};
use provisio_core::{AppError, AppResult, Requester};
use provisio_domain::{Identity, Plan};
use provisio_infrastructure::{
    AesSecretCipher, Argon2PasswordHistoryHasher, CatalogDependencyEvaluator, CatalogDocument,
    ExpressionScriptEvaluator, InMemoryAuditLog, InMemoryCatalog, InMemoryIdentityStore,
    InMemoryPendingRequestRepository, InMemoryRetryScheduler, InMemoryRoleEventGenerator,
    LinkPlanApplier, ProfileEntitlementCorrelator, SimulatedBackendExecutor,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Executor name integrations use to reach the simulated backend.
const SIMULATED_EXECUTOR: &str = "simulated";

#[derive(Debug, Clone)]
struct WorkerConfig {
    scenario_path: String,
    secret_key: String,
    password_history_length: usize,
    retry_poll_ms: u64,
    max_retry_rounds: u32,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    catalog: CatalogDocument,
    #[serde(default)]
    identities: Vec<Identity>,
    #[serde(default)]
    accounts: Vec<SeededAccount>,
    identity_name: String,
    master_plan: Plan,
    #[serde(default)]
    requester: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeededAccount {
    integration: String,
    application: String,
    native_identity: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

struct Runtime {
    service: ProvisioningService,
    retries: Arc<InMemoryRetryScheduler>,
    audit_log: Arc<InMemoryAuditLog>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let scenario = load_scenario(config.scenario_path.as_str())?;
    let requester = scenario
        .requester
        .as_deref()
        .map_or_else(Requester::system, |name| Requester::new(name, name));

    info!(
        scenario_path = %config.scenario_path,
        identity = %scenario.identity_name,
        requester = %requester.name(),
        max_retry_rounds = config.max_retry_rounds,
        "provisio-worker started"
    );

    let identity_name = scenario.identity_name.clone();
    let master_plan = scenario.master_plan.clone();
    let runtime = build_runtime(&config, scenario).await?;

    let report = runtime
        .service
        .provision(identity_name.as_str(), master_plan, &requester)
        .await?;
    log_report(&report);

    for round in 1..=config.max_retry_rounds {
        if runtime.retries.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(config.retry_poll_ms)).await;

        match runtime.service.run_due_retries(Utc::now(), &requester).await {
            Ok(executed) => info!(round, executed, "retry round finished"),
            Err(error) => warn!(round, error = %error, "retry round failed"),
        }
    }

    let remaining = runtime.retries.len().await;
    if remaining > 0 {
        warn!(
            remaining,
            next_due = ?runtime.retries.next_due().await,
            "retry tasks left unprocessed"
        );
    }
    info!(
        audit_events = runtime.audit_log.len().await,
        "provisio-worker finished"
    );
    Ok(())
}

async fn build_runtime(config: &WorkerConfig, scenario: Scenario) -> AppResult<Runtime> {
    let catalog = Arc::new(InMemoryCatalog::from_document(scenario.catalog)?);
    let store = Arc::new(InMemoryIdentityStore::new());
    store.seed(scenario.identities).await;

    let executor = Arc::new(SimulatedBackendExecutor::new());
    for account in scenario.accounts {
        executor
            .seed_account(
                account.integration.as_str(),
                account.application.as_str(),
                account.native_identity.as_str(),
                account.attributes,
            )
            .await;
    }

    let cipher = Arc::new(AesSecretCipher::from_hex(config.secret_key.as_str())?);
    let hasher = Arc::new(Argon2PasswordHistoryHasher::new());
    let scripts = Arc::new(ExpressionScriptEvaluator::new());
    let retries = Arc::new(InMemoryRetryScheduler::new());
    let audit_log = Arc::new(InMemoryAuditLog::new());
    let pending = Arc::new(InMemoryPendingRequestRepository::new());

    let reconciler = IdentityReconciler::new(store.clone(), audit_log.clone())
        .with_correlator(Arc::new(ProfileEntitlementCorrelator::new(catalog.clone())))
        .with_event_generator(Arc::new(InMemoryRoleEventGenerator::new()))
        .with_plan_applier(Arc::new(LinkPlanApplier::new(catalog.clone())))
        .with_password_protection(
            cipher.clone(),
            hasher.clone(),
            config.password_history_length,
        );

    let compiler = PlanCompiler::new(
        store.clone(),
        catalog.clone(),
        catalog.clone(),
        catalog.clone(),
    )
    .with_script_evaluator(scripts.clone())
    .with_pending_requests(pending.clone());

    let evaluator = PlanEvaluator::new(
        catalog.clone(),
        catalog.clone(),
        store,
        retries.clone(),
        audit_log.clone(),
        reconciler,
    )
    .with_executor(SIMULATED_EXECUTOR, executor)
    .with_dependency_evaluator(Arc::new(CatalogDependencyEvaluator::new(catalog)))
    .with_script_evaluator(scripts)
    .with_secret_cipher(cipher)
    .with_password_hasher(hasher)
    .with_pending_requests(pending)
    .with_settings(EvaluatorSettings {
        password_history_length: config.password_history_length,
        ..EvaluatorSettings::default()
    });

    Ok(Runtime {
        service: ProvisioningService::new(compiler, evaluator, retries.clone()),
        retries,
        audit_log,
    })
}

fn load_scenario(path: &str) -> AppResult<Scenario> {
    let content = std::fs::read_to_string(path).map_err(|error| {
        AppError::Internal(format!("failed to read scenario '{path}': {error}"))
    })?;
    serde_json::from_str(content.as_str()).map_err(|error| {
        AppError::Validation(format!("invalid scenario document '{path}': {error}"))
    })
}

fn log_report(report: &ProvisioningReport) {
    let project = &report.project;
    if report.needs_answers() {
        for question in &project.questions {
            info!(
                identity = %project.identity_name,
                question = ?question,
                "question awaiting an answer"
            );
        }
        return;
    }

    for plan in &project.plans {
        let status = plan
            .result
            .as_ref()
            .map_or("none", |result| result.status.as_str());
        info!(
            identity = %project.identity_name,
            integration = plan.target_integration.as_deref().unwrap_or("-"),
            requests = plan.requests.len(),
            status,
            "plan executed"
        );
    }

    match &report.outcome {
        Some(outcome) => info!(identity = %project.identity_name, outcome = ?outcome, "identity reconciled"),
        None => info!(identity = %project.identity_name, "identity left untouched"),
    }
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let scenario_path = required_env("PROVISIO_SCENARIO_PATH")?;
        let secret_key = required_env("PROVISIO_SECRET_KEY")?;
        let password_history_length = parse_env_usize("PROVISIO_PASSWORD_HISTORY_LENGTH", 5)?;
        let retry_poll_ms = parse_env_u64("PROVISIO_RETRY_POLL_MS", 1000)?;
        let max_retry_rounds = parse_env_u32("PROVISIO_MAX_RETRY_ROUNDS", 3)?;

        if secret_key.len() != 64 {
            return Err(AppError::Validation(
                "PROVISIO_SECRET_KEY must be 64 hex characters".to_owned(),
            ));
        }

        if retry_poll_ms == 0 {
            return Err(AppError::Validation(
                "PROVISIO_RETRY_POLL_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            scenario_path,
            secret_key,
            password_history_length,
            retry_poll_ms,
            max_retry_rounds,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
