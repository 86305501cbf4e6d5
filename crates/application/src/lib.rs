//! Application services and ports.
//!
//! `PlanCompiler` turns a master plan into a compiled `Project`,
//! `PlanEvaluator` executes it against backend integrations and
//! `IdentityReconciler` applies the identity-side changes.

#![forbid(unsafe_code)]

mod identity_reconciler;
mod plan_compiler;
mod plan_evaluator;
mod provisioning_ports;
mod provisioning_service;

#[cfg(test)]
mod test_support;

pub use identity_reconciler::{IdentityOutcome, IdentityReconciler, LinkPasswordChange};
pub use plan_compiler::PlanCompiler;
pub use plan_evaluator::{EvaluatorSettings, PlanEvaluator, build_retry_plan, retry_date};
pub use provisioning_ports::{
    AccountPlanApplier, ApplicationCatalog, BackendExecutor, DependencyEvaluator,
    EntitlementCorrelator, IdentityLock, IdentityStore, IntegrationConfigFinder,
    PasswordHistoryHasher, PendingRequestRepository, ProvisioningAuditEvent,
    ProvisioningAuditKind, ProvisioningAuditSink, RetryScheduler, RetryTask, RoleCatalog,
    RoleEventGenerator, ScriptEvaluator, SecretCipher,
};
pub use provisioning_service::{ProvisioningReport, ProvisioningService};
