use chrono::{DateTime, Utc};
use provisio_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::operation::{AccountOperation, AttributeOperation};
use crate::result::ProvisioningResult;
use crate::tracking::TrackingIds;
use crate::values::is_empty_value;

/// Argument names the engine reads from request argument maps.
pub mod arguments {
    /// Marks a role removal that must leave a negative assignment behind.
    pub const NEGATIVE_ASSIGNMENT: &str = "negativeAssignment";
    /// Free-text note stored on the resulting role assignment.
    pub const ASSIGNMENT_NOTE: &str = "assignmentNote";
    /// Lets a subtraction win over an earlier retain for the same value.
    pub const PREFER_REMOVE_OVER_RETAIN: &str = "preferRemoveOverRetain";
    /// Set when the assignment id was guessed from the first matching assignment.
    pub const USED_FIRST_ASSIGNMENT: &str = "usedFirstAssignment";
    /// Name of the identity that made an assignment.
    pub const ASSIGNER: &str = "assigner";
    /// Origin of an assignment (see `AssignmentSource`).
    pub const SOURCE: &str = "source";
    /// Asks the reconciler to check password history before applying.
    pub const CHECK_POLICY: &str = "checkPolicy";
    /// Marks a value that must be encrypted at rest.
    pub const SECRET: &str = "secret";
    /// Marks an edit of the locally cached account copy.
    pub const LINK_EDIT: &str = "linkEdit";
}

/// Kind of a generic request within its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericRequestKind {
    /// Attribute change.
    Attribute,
    /// Permission change.
    Permission,
}

impl GenericRequestKind {
    /// Returns stable kind value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attribute => "attribute",
            Self::Permission => "permission",
        }
    }
}

/// One attribute or permission change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericRequest {
    /// Attribute name or permission target.
    pub name: String,
    /// Requested operation.
    pub operation: AttributeOperation,
    /// Scalar or list value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Sunrise date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_date: Option<DateTime<Utc>>,
    /// Sunset date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_date: Option<DateTime<Utc>>,
    /// Role assignment this request belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    /// Correlation ids of the request items that asked for this change.
    #[serde(default, skip_serializing_if = "TrackingIds::is_empty")]
    pub tracking_ids: TrackingIds,
    /// Per-request result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProvisioningResult>,
    /// Ad-hoc metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
}

impl GenericRequest {
    /// Creates a request for one name.
    #[must_use]
    pub fn new(name: impl Into<String>, operation: AttributeOperation, value: Option<Value>) -> Self {
        Self {
            name: name.into(),
            operation,
            value,
            add_date: None,
            remove_date: None,
            assignment_id: None,
            tracking_ids: TrackingIds::new(),
            result: None,
            arguments: Map::new(),
        }
    }

    /// Sets the correlated role assignment.
    #[must_use]
    pub fn with_assignment_id(mut self, assignment_id: impl Into<String>) -> Self {
        self.assignment_id = Some(assignment_id.into());
        self
    }

    /// Adds one argument.
    #[must_use]
    pub fn with_argument(mut self, name: &str, value: Value) -> Self {
        self.arguments.insert(name.to_owned(), value);
        self
    }

    /// Sets the sunrise date.
    #[must_use]
    pub fn with_add_date(mut self, add_date: DateTime<Utc>) -> Self {
        self.add_date = Some(add_date);
        self
    }

    /// Sets the sunset date.
    #[must_use]
    pub fn with_remove_date(mut self, remove_date: DateTime<Utc>) -> Self {
        self.remove_date = Some(remove_date);
        self
    }

    /// Adds a tracking id.
    #[must_use]
    pub fn with_tracking_id(mut self, tracking_id: &str) -> Self {
        self.tracking_ids.insert(tracking_id);
        self
    }

    /// Returns whether a sunrise or sunset date defers the change.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.add_date.is_some() || self.remove_date.is_some()
    }

    /// Reads a boolean argument; strings "true"/"false" are accepted.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        argument_flag(&self.arguments, name)
    }

    /// Reads a string argument.
    #[must_use]
    pub fn argument_str(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(Value::as_str)
    }

    /// Returns whether the value carries nothing.
    #[must_use]
    pub fn has_empty_value(&self) -> bool {
        is_empty_value(self.value.as_ref())
    }

    /// Requests with arguments or dates keep their identity through simplification.
    #[must_use]
    pub fn ok_to_simplify(&self) -> bool {
        self.arguments.is_empty() && !self.is_deferred()
    }
}

/// Kind of a top-level request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Account on an application.
    Account,
    /// Application object such as a group.
    Object,
}

/// Identity of the entity one top-level request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Request kind.
    pub kind: RequestKind,
    /// Application name.
    pub application: String,
    /// Optional application instance.
    pub instance: Option<String>,
    /// Native identifier, absent while an account selection is pending.
    pub native_identity: Option<String>,
}

/// Account or object request targeting one entity of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractRequest {
    /// Request kind.
    pub kind: RequestKind,
    /// Object type for object requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Application name.
    pub application: String,
    /// Optional application instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Native identifier of the target entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_identity: Option<String>,
    /// Requested operation; absent means `Modify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<AccountOperation>,
    /// Correlation ids.
    #[serde(default, skip_serializing_if = "TrackingIds::is_empty")]
    pub tracking_ids: TrackingIds,
    /// Role assignments served by this request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignment_ids: Vec<String>,
    /// Attribute changes.
    #[serde(default)]
    pub attribute_requests: Vec<GenericRequest>,
    /// Permission changes.
    #[serde(default)]
    pub permission_requests: Vec<GenericRequest>,
    /// Ad-hoc metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
    /// Request-level result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProvisioningResult>,
    /// Set when an identical pending request was already sent.
    #[serde(default)]
    pub cleanable: bool,
}

impl AbstractRequest {
    /// Creates an account request for an application.
    pub fn account(application: impl Into<String>) -> AppResult<Self> {
        Self::build(RequestKind::Account, application, None)
    }

    /// Creates an object request for an application object type.
    pub fn object(application: impl Into<String>, object_type: impl Into<String>) -> AppResult<Self> {
        Self::build(RequestKind::Object, application, Some(object_type.into()))
    }

    fn build(
        kind: RequestKind,
        application: impl Into<String>,
        object_type: Option<String>,
    ) -> AppResult<Self> {
        let application = NonEmptyString::new(application)?;
        Ok(Self {
            kind,
            object_type,
            application: application.into(),
            instance: None,
            native_identity: None,
            operation: None,
            tracking_ids: TrackingIds::new(),
            assignment_ids: Vec::new(),
            attribute_requests: Vec::new(),
            permission_requests: Vec::new(),
            arguments: Map::new(),
            result: None,
            cleanable: false,
        })
    }

    /// Creates an empty request targeting the same entity.
    #[must_use]
    pub fn empty_copy(&self) -> Self {
        Self {
            kind: self.kind,
            object_type: self.object_type.clone(),
            application: self.application.clone(),
            instance: self.instance.clone(),
            native_identity: self.native_identity.clone(),
            operation: self.operation,
            tracking_ids: self.tracking_ids.clone(),
            assignment_ids: self.assignment_ids.clone(),
            attribute_requests: Vec::new(),
            permission_requests: Vec::new(),
            arguments: self.arguments.clone(),
            result: None,
            cleanable: false,
        }
    }

    /// Sets the native identity.
    #[must_use]
    pub fn with_native_identity(mut self, native_identity: impl Into<String>) -> Self {
        self.native_identity = Some(native_identity.into());
        self
    }

    /// Sets the instance.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Sets the operation.
    #[must_use]
    pub fn with_operation(mut self, operation: AccountOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Adds a tracking id.
    #[must_use]
    pub fn with_tracking_id(mut self, tracking_id: &str) -> Self {
        self.tracking_ids.insert(tracking_id);
        self
    }

    /// Appends an attribute request.
    #[must_use]
    pub fn with_attribute(mut self, request: GenericRequest) -> Self {
        self.attribute_requests.push(request);
        self
    }

    /// Appends a permission request.
    #[must_use]
    pub fn with_permission(mut self, request: GenericRequest) -> Self {
        self.permission_requests.push(request);
        self
    }

    /// Returns the matching key for this request.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey {
            kind: self.kind,
            application: self.application.clone(),
            instance: self.instance.clone(),
            native_identity: self.native_identity.clone(),
        }
    }

    /// Returns whether another request targets the same entity.
    #[must_use]
    pub fn matches(&self, key: &RequestKey) -> bool {
        self.kind == key.kind
            && self.application == key.application
            && self.instance == key.instance
            && self.native_identity == key.native_identity
    }

    /// Effective operation, with absent meaning `Modify`.
    #[must_use]
    pub fn effective_operation(&self) -> AccountOperation {
        self.operation.unwrap_or(AccountOperation::Modify)
    }

    /// Returns whether this request creates its target.
    #[must_use]
    pub fn is_create(&self) -> bool {
        self.operation == Some(AccountOperation::Create)
    }

    /// Returns the generic requests of one kind.
    #[must_use]
    pub fn generic_requests(&self, kind: GenericRequestKind) -> &[GenericRequest] {
        match kind {
            GenericRequestKind::Attribute => self.attribute_requests.as_slice(),
            GenericRequestKind::Permission => self.permission_requests.as_slice(),
        }
    }

    /// Returns the generic requests of one kind for mutation.
    pub fn generic_requests_mut(&mut self, kind: GenericRequestKind) -> &mut Vec<GenericRequest> {
        match kind {
            GenericRequestKind::Attribute => &mut self.attribute_requests,
            GenericRequestKind::Permission => &mut self.permission_requests,
        }
    }

    /// Iterates all generic requests with their kind.
    pub fn all_generic_requests(&self) -> impl Iterator<Item = (GenericRequestKind, &GenericRequest)> {
        self.attribute_requests
            .iter()
            .map(|request| (GenericRequestKind::Attribute, request))
            .chain(
                self.permission_requests
                    .iter()
                    .map(|request| (GenericRequestKind::Permission, request)),
            )
    }

    /// Returns the first attribute request with the given name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&GenericRequest> {
        self.attribute_requests
            .iter()
            .find(|request| request.name == name)
    }

    /// Returns whether the request carries no attribute or permission changes.
    #[must_use]
    pub fn has_no_children(&self) -> bool {
        self.attribute_requests.is_empty() && self.permission_requests.is_empty()
    }

    /// Adds an assignment id if not already present.
    pub fn add_assignment_id(&mut self, assignment_id: &str) {
        if !self.assignment_ids.iter().any(|id| id == assignment_id) {
            self.assignment_ids.push(assignment_id.to_owned());
        }
    }

    /// Reads a boolean argument.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        argument_flag(&self.arguments, name)
    }
}

/// Reads a boolean from an argument map, accepting string forms.
#[must_use]
pub fn argument_flag(arguments: &Map<String, Value>, name: &str) -> bool {
    match arguments.get(name) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AbstractRequest, GenericRequest, arguments};
    use crate::operation::{AccountOperation, AttributeOperation};

    #[test]
    fn account_request_requires_application() {
        assert!(AbstractRequest::account("  ").is_err());
    }

    #[test]
    fn key_matches_on_application_instance_and_identity() -> provisio_core::AppResult<()> {
        let request = AbstractRequest::account("AD")?.with_native_identity("cn=jane");
        let other = AbstractRequest::account("AD")?.with_native_identity("cn=jane");
        let different = AbstractRequest::account("AD")?.with_native_identity("cn=john");

        assert!(request.matches(&other.key()));
        assert!(!request.matches(&different.key()));
        Ok(())
    }

    #[test]
    fn effective_operation_defaults_to_modify() -> provisio_core::AppResult<()> {
        let request = AbstractRequest::account("AD")?;
        assert_eq!(request.effective_operation(), AccountOperation::Modify);
        Ok(())
    }

    #[test]
    fn generic_request_flags_accept_strings() {
        let request = GenericRequest::new("groups", AttributeOperation::Remove, Some(json!("G1")))
            .with_argument(arguments::PREFER_REMOVE_OVER_RETAIN, json!("TRUE"));
        assert!(request.flag(arguments::PREFER_REMOVE_OVER_RETAIN));
        assert!(!request.flag(arguments::NEGATIVE_ASSIGNMENT));
        assert!(!request.ok_to_simplify());
    }
}
