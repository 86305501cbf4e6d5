mod audit;
mod catalog;
mod correlation;
mod executor;
mod identity_store;
mod pending;
mod retry;
mod scripting;
mod secrets;

pub use audit::{ProvisioningAuditEvent, ProvisioningAuditKind, ProvisioningAuditSink};
pub use catalog::{ApplicationCatalog, IntegrationConfigFinder, RoleCatalog};
pub use correlation::{AccountPlanApplier, EntitlementCorrelator, RoleEventGenerator};
pub use executor::{BackendExecutor, DependencyEvaluator};
pub use identity_store::{IdentityLock, IdentityStore};
pub use pending::PendingRequestRepository;
pub use retry::{RetryScheduler, RetryTask};
pub use scripting::ScriptEvaluator;
pub use secrets::{PasswordHistoryHasher, SecretCipher};
