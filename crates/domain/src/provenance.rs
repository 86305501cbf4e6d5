use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::AttributeOperation;
use crate::request::{AbstractRequest, GenericRequest, GenericRequestKind, RequestKey};

/// Why a value was dropped from a compiled plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    /// The target already holds the value.
    Exists,
    /// The value to remove is not present.
    DoesNotExist,
    /// Another request depends on the value staying.
    Dependency,
    /// A pending request already asked for the change.
    Requested,
}

impl FilterReason {
    /// Returns stable reason value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::DoesNotExist => "does_not_exist",
            Self::Dependency => "dependency",
            Self::Requested => "requested",
        }
    }
}

/// Record of a value removed during compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredValue {
    /// Application of the parent request.
    pub application: String,
    /// Instance of the parent request.
    pub instance: Option<String>,
    /// Native identity of the parent request.
    pub native_identity: Option<String>,
    /// Attribute or permission.
    pub kind: GenericRequestKind,
    /// Attribute name or permission target.
    pub name: String,
    /// Operation of the filtered request.
    pub operation: AttributeOperation,
    /// Values that were dropped.
    pub value: Value,
    /// Reason for the drop.
    pub reason: FilterReason,
}

impl FilteredValue {
    /// Builds a record for values dropped from one generic request.
    #[must_use]
    pub fn new(
        parent: &RequestKey,
        kind: GenericRequestKind,
        request: &GenericRequest,
        values: Vec<Value>,
        reason: FilterReason,
    ) -> Self {
        Self {
            application: parent.application.clone(),
            instance: parent.instance.clone(),
            native_identity: parent.native_identity.clone(),
            kind,
            name: request.name.clone(),
            operation: request.operation,
            value: Value::Array(values),
            reason,
        }
    }
}

/// What caused a derived request to be added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionCause {
    /// Expansion of a role assignment.
    RoleExpansion,
    /// Identity attribute synchronisation.
    AttributeSync,
    /// Application account template.
    Template,
    /// Required application dependency.
    Dependency,
}

impl ExpansionCause {
    /// Returns stable cause value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoleExpansion => "role_expansion",
            Self::AttributeSync => "attribute_sync",
            Self::Template => "template",
            Self::Dependency => "dependency",
        }
    }
}

/// Immutable provenance record for one derived value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionItem {
    /// Target application.
    pub application: String,
    /// Target instance.
    pub instance: Option<String>,
    /// Target native identity, absent while an account selection is pending.
    pub native_identity: Option<String>,
    /// Attribute or permission.
    pub kind: GenericRequestKind,
    /// Attribute name or permission target.
    pub name: String,
    /// Derived value.
    pub value: Option<Value>,
    /// Derived operation.
    pub operation: AttributeOperation,
    /// What produced the value.
    pub cause: ExpansionCause,
    /// Free-text source such as the role name.
    pub source_info: String,
}

impl ExpansionItem {
    /// Builds one item per value of a derived request.
    #[must_use]
    pub fn for_request(
        parent: &AbstractRequest,
        kind: GenericRequestKind,
        request: &GenericRequest,
        cause: ExpansionCause,
        source_info: &str,
    ) -> Vec<Self> {
        let values = crate::values::to_list(request.value.as_ref());
        let values: Vec<Option<Value>> = if values.is_empty() {
            vec![None]
        } else {
            values.into_iter().map(Some).collect()
        };

        values
            .into_iter()
            .map(|value| Self {
                application: parent.application.clone(),
                instance: parent.instance.clone(),
                native_identity: parent.native_identity.clone(),
                kind,
                name: request.name.clone(),
                value,
                operation: request.operation,
                cause,
                source_info: source_info.to_owned(),
            })
            .collect()
    }

    /// Compares two items, optionally ignoring the native identity.
    #[must_use]
    pub fn same_change(&self, other: &Self, ignore_native_identity: bool) -> bool {
        self.application == other.application
            && self.instance == other.instance
            && (ignore_native_identity || self.native_identity == other.native_identity)
            && self.kind == other.kind
            && self.name == other.name
            && self.value == other.value
            && self.operation == other.operation
            && self.cause == other.cause
            && self.source_info == other.source_info
    }

    /// Returns whether the item describes a change inside the given request.
    #[must_use]
    pub fn belongs_to(&self, request: &AbstractRequest) -> bool {
        self.application == request.application
            && self.instance == request.instance
            && self.native_identity == request.native_identity
    }
}
