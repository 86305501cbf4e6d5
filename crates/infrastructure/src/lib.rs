//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod aes_secret_cipher;
mod argon2_password_history_hasher;
mod catalog_dependency_evaluator;
mod expression_script_evaluator;
mod in_memory_audit_log;
mod in_memory_catalog;
mod in_memory_identity_store;
mod in_memory_pending_request_repository;
mod in_memory_retry_scheduler;
mod in_memory_role_event_generator;
mod link_plan_applier;
mod profile_entitlement_correlator;
mod simulated_backend_executor;

pub use aes_secret_cipher::AesSecretCipher;
pub use argon2_password_history_hasher::Argon2PasswordHistoryHasher;
pub use catalog_dependency_evaluator::CatalogDependencyEvaluator;
pub use expression_script_evaluator::ExpressionScriptEvaluator;
pub use in_memory_audit_log::{AuditLogEntry, InMemoryAuditLog};
pub use in_memory_catalog::{CatalogDocument, InMemoryCatalog};
pub use in_memory_identity_store::InMemoryIdentityStore;
pub use in_memory_pending_request_repository::InMemoryPendingRequestRepository;
pub use in_memory_retry_scheduler::InMemoryRetryScheduler;
pub use in_memory_role_event_generator::{
    InMemoryRoleEventGenerator, ScheduledChange, ScheduledEvent,
};
pub use link_plan_applier::LinkPlanApplier;
pub use profile_entitlement_correlator::ProfileEntitlementCorrelator;
pub use simulated_backend_executor::{DISABLED_FLAG, LOCKED_FLAG, SimulatedBackendExecutor};
