//! Request model, compiled projects and identity metadata for provisioning.

#![forbid(unsafe_code)]

pub mod identity_attributes;

mod assignment;
mod catalog;
mod identity;
mod operation;
mod options;
mod pending;
mod plan;
mod project;
mod provenance;
mod question;
mod request;
mod result;
mod tracking;
mod values;

pub use assignment::{
    AssignmentSource, AssignmentUpdate, RoleAssignment, RoleAssignmentIndex, RoleTarget,
};
pub use catalog::{
    AccountTemplate, ApplicationDefinition, AttributeSyncTarget, EntitlementProfile,
    IntegrationConfig, MaintenanceWindow, RoleDefinition, TemplateField, TemplateUsage,
};
pub use identity::{Identity, Link, RoleDetection};
pub use operation::{AccountOperation, AttributeOperation, parse_account_operation};
pub use options::{CompilerOption, CompilerOptions, REFRESH_OPTIONS_ARGUMENT, SCOPE_ARGUMENT};
pub use pending::PendingRequest;
pub use plan::{Plan, simplify_requests};
pub use project::{DeferredRequest, Project};
pub use provenance::{ExpansionCause, ExpansionItem, FilterReason, FilteredValue};
pub use question::{AccountSelection, Question, TemplateFieldQuestion};
pub use request::{
    AbstractRequest, GenericRequest, GenericRequestKind, RequestKey, RequestKind, argument_flag,
    arguments,
};
pub use result::{ProvisioningResult, ProvisioningStatus, worst_status};
pub use tracking::TrackingIds;
pub use values::{ValueMatcher, from_list, is_empty_value, to_list, value_as_text, values_as_text};
