use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use provisio_application::BackendExecutor;
use provisio_core::{AppError, AppResult};
use provisio_domain::identity_attributes::PASSWORD;
use provisio_domain::{
    AbstractRequest, AccountOperation, AttributeOperation, GenericRequest, IntegrationConfig, Plan,
    ProvisioningResult, RequestKind, ValueMatcher, is_empty_value,
};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Account flag set by `Disable` and cleared by `Enable`.
pub const DISABLED_FLAG: &str = "disabled";
/// Account flag set by `Lock` and cleared by `Unlock`.
pub const LOCKED_FLAG: &str = "locked";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccountKey {
    integration: String,
    application: String,
    native_identity: String,
}

/// Backend that keeps accounts in memory per integration.
///
/// New accounts without a native identity are named after the plan's
/// identity. An outage answers every request with a retry.
#[derive(Debug, Default)]
pub struct SimulatedBackendExecutor {
    accounts: RwLock<HashMap<AccountKey, Map<String, Value>>>,
    request_ids: Mutex<HashSet<String>>,
    outage: RwLock<Option<String>>,
}

impl SimulatedBackendExecutor {
    /// Creates a backend with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing account.
    pub async fn seed_account(
        &self,
        integration: &str,
        application: &str,
        native_identity: &str,
        attributes: Map<String, Value>,
    ) {
        self.accounts
            .write()
            .await
            .insert(key(integration, application, native_identity), attributes);
    }

    /// Returns one account's attributes.
    pub async fn account(
        &self,
        integration: &str,
        application: &str,
        native_identity: &str,
    ) -> Option<Map<String, Value>> {
        self.accounts
            .read()
            .await
            .get(&key(integration, application, native_identity))
            .cloned()
    }

    /// Starts or ends an outage.
    pub async fn set_outage(&self, message: Option<&str>) {
        *self.outage.write().await = message.map(ToOwned::to_owned);
    }

    async fn apply(
        &self,
        integration: &str,
        identity_name: Option<&str>,
        request: &mut AbstractRequest,
    ) -> ProvisioningResult {
        if request.kind == RequestKind::Object {
            return ProvisioningResult::committed();
        }

        let operation = request.effective_operation();
        let native_identity = match (request.native_identity.clone(), operation) {
            (Some(native_identity), _) => native_identity,
            (None, AccountOperation::Create) => match identity_name {
                Some(name) => name.to_owned(),
                None => return ProvisioningResult::failed("cannot name the new account"),
            },
            (None, _) => return ProvisioningResult::failed("account is not selected"),
        };
        let account_key = key(integration, request.application.as_str(), native_identity.as_str());

        let mut accounts = self.accounts.write().await;
        match operation {
            AccountOperation::Create => {
                if accounts.contains_key(&account_key) {
                    return ProvisioningResult::failed(format!(
                        "account '{native_identity}' already exists"
                    ));
                }
                accounts.insert(account_key.clone(), Map::new());
                request.native_identity = Some(native_identity.clone());
            }
            AccountOperation::Delete => {
                return match accounts.remove(&account_key) {
                    Some(_) => ProvisioningResult::committed(),
                    None => {
                        ProvisioningResult::failed(format!("account '{native_identity}' not found"))
                    }
                };
            }
            _ => {}
        }

        let Some(attributes) = accounts.get_mut(&account_key) else {
            return ProvisioningResult::failed(format!("account '{native_identity}' not found"));
        };
        match operation {
            AccountOperation::Enable => {
                attributes.remove(DISABLED_FLAG);
            }
            AccountOperation::Disable => {
                attributes.insert(DISABLED_FLAG.to_owned(), Value::Bool(true));
            }
            AccountOperation::Lock => {
                attributes.insert(LOCKED_FLAG.to_owned(), Value::Bool(true));
            }
            AccountOperation::Unlock => {
                attributes.remove(LOCKED_FLAG);
            }
            _ => {}
        }
        for (_, generic) in request.all_generic_requests() {
            if generic.name != PASSWORD {
                apply_change(attributes, generic);
            }
        }
        ProvisioningResult::committed()
    }
}

fn key(integration: &str, application: &str, native_identity: &str) -> AccountKey {
    AccountKey {
        integration: integration.to_owned(),
        application: application.to_owned(),
        native_identity: native_identity.to_owned(),
    }
}

fn apply_change(attributes: &mut Map<String, Value>, generic: &GenericRequest) {
    let matcher = ValueMatcher::exact();
    let mut current = attributes.get(generic.name.as_str()).cloned();
    match generic.operation {
        AttributeOperation::Retain => return,
        AttributeOperation::Set => current = generic.value.clone(),
        AttributeOperation::Add => matcher.union(&mut current, generic.value.as_ref()),
        AttributeOperation::Remove | AttributeOperation::Revoke => {
            let _ = matcher.subtract(&mut current, generic.value.as_ref());
        }
    }
    match current {
        Some(value) if !is_empty_value(Some(&value)) => {
            attributes.insert(generic.name.clone(), value);
        }
        _ => {
            attributes.remove(generic.name.as_str());
        }
    }
}

#[async_trait]
impl BackendExecutor for SimulatedBackendExecutor {
    async fn provision(&self, config: &IntegrationConfig, mut plan: Plan) -> AppResult<Plan> {
        if let Some(message) = self.outage.read().await.clone() {
            info!(integration = %config.name, "simulated outage, asking for a retry");
            for request in &mut plan.requests {
                request.result = Some(ProvisioningResult::retry(message.as_str()));
            }
            return Ok(plan);
        }

        let identity_name = plan.identity_name.clone();
        for request in &mut plan.requests {
            let mut result = self
                .apply(config.name.as_str(), identity_name.as_deref(), request)
                .await;
            let request_id = Uuid::new_v4().to_string();
            self.request_ids.lock().await.insert(request_id.clone());
            result.request_id = Some(request_id);
            debug!(
                integration = %config.name,
                application = %request.application,
                status = result.status.as_str(),
                "simulated request applied"
            );
            request.result = Some(result);
        }
        Ok(plan)
    }

    async fn check_status(
        &self,
        config: &IntegrationConfig,
        request_id: &str,
    ) -> AppResult<ProvisioningResult> {
        if self.request_ids.lock().await.contains(request_id) {
            return Ok(ProvisioningResult::committed());
        }
        Err(AppError::NotFound(format!(
            "integration '{}' has no request '{request_id}'",
            config.name
        )))
    }
}
