use chrono::{DateTime, Utc};
use provisio_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assignment::{RoleAssignment, RoleAssignmentIndex, RoleTarget};

/// Locally cached copy of one backend account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Application name.
    pub application: String,
    /// Application instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Native identity of the account.
    pub native_identity: String,
    /// Cached account attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Hashes of previous account passwords, newest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub password_history: Vec<String>,
}

impl Link {
    /// Creates a link without attributes.
    #[must_use]
    pub fn new(application: impl Into<String>, native_identity: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            instance: None,
            native_identity: native_identity.into(),
            attributes: Map::new(),
            password_history: Vec::new(),
        }
    }

    /// Sets one cached attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_owned(), value);
        self
    }

    /// Returns one cached attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns whether the link is on the given application and instance.
    #[must_use]
    pub fn is_on(&self, application: &str, instance: Option<&str>) -> bool {
        self.application == application && self.instance.as_deref() == instance
    }
}

/// A role found on the identity's accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDetection {
    /// Detected role.
    pub role_name: String,
    /// Accounts holding the role's entitlements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<RoleTarget>,
}

/// Subject of provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Store id, absent until the identity is first saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Unique name.
    pub name: String,
    /// Extended identity attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Role assignment metadata.
    #[serde(default)]
    pub role_assignments: RoleAssignmentIndex,
    /// Detected roles.
    #[serde(default)]
    pub detected_roles: Vec<RoleDetection>,
    /// Account links.
    #[serde(default)]
    pub links: Vec<Link>,
    /// Capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Scopes the identity controls.
    #[serde(default)]
    pub controlled_scopes: Vec<String>,
    /// Scope the identity belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_scope: Option<String>,
    /// Whether the identity controls its own scope.
    #[serde(default)]
    pub controls_assigned_scope: bool,
    /// Workgroup memberships.
    #[serde(default)]
    pub workgroups: Vec<String>,
    /// Encrypted password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Hashes of previous passwords, newest first.
    #[serde(default)]
    pub password_history: Vec<String>,
    /// User preferences such as work item forwarding.
    #[serde(default)]
    pub preferences: Map<String, Value>,
    /// Protected identities are never removed automatically.
    #[serde(default)]
    pub protected: bool,
    /// Manager name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    /// Set when the identity should be refreshed.
    #[serde(default)]
    pub needs_refresh: bool,
    /// Identity type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_type: Option<String>,
    /// Date after which the identity may be removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_by: Option<DateTime<Utc>>,
    /// Activity monitoring configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_config: Option<Value>,
    /// Archive ids.
    #[serde(default)]
    pub archives: Vec<String>,
    /// Snapshot ids.
    #[serde(default)]
    pub snapshots: Vec<String>,
    /// Scheduled event ids.
    #[serde(default)]
    pub events: Vec<String>,
    /// Pending provisioning request ids.
    #[serde(default)]
    pub provisioning_requests: Vec<String>,
}

impl Identity {
    /// Creates an unsaved identity.
    pub fn new(name: impl Into<String>) -> AppResult<Self> {
        let name = NonEmptyString::new(name)?;
        Ok(Self {
            id: None,
            name: name.into(),
            attributes: Map::new(),
            role_assignments: RoleAssignmentIndex::new(),
            detected_roles: Vec::new(),
            links: Vec::new(),
            capabilities: Vec::new(),
            controlled_scopes: Vec::new(),
            assigned_scope: None,
            controls_assigned_scope: false,
            workgroups: Vec::new(),
            password: None,
            password_history: Vec::new(),
            preferences: Map::new(),
            protected: false,
            manager: None,
            needs_refresh: false,
            identity_type: None,
            use_by: None,
            activity_config: None,
            archives: Vec::new(),
            snapshots: Vec::new(),
            events: Vec::new(),
            provisioning_requests: Vec::new(),
        })
    }

    /// Sets the store id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds an account link.
    #[must_use]
    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Records a role assignment.
    #[must_use]
    pub fn with_assignment(mut self, assignment: RoleAssignment) -> Self {
        self.role_assignments.insert(assignment);
        self
    }

    /// Records a detected role.
    #[must_use]
    pub fn with_detected_role(mut self, role_name: impl Into<String>) -> Self {
        self.detected_roles.push(RoleDetection {
            role_name: role_name.into(),
            targets: Vec::new(),
        });
        self
    }

    /// Sets an extended attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_owned(), value);
        self
    }

    /// Returns an extended attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns whether the identity was saved before.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Returns the links on one application and instance.
    #[must_use]
    pub fn links_on(&self, application: &str, instance: Option<&str>) -> Vec<&Link> {
        self.links
            .iter()
            .filter(|link| link.is_on(application, instance))
            .collect()
    }

    /// Returns whether any link exists on an application.
    #[must_use]
    pub fn has_link_on(&self, application: &str) -> bool {
        self.links.iter().any(|link| link.application == application)
    }

    /// Returns one link.
    #[must_use]
    pub fn find_link(
        &self,
        application: &str,
        instance: Option<&str>,
        native_identity: &str,
    ) -> Option<&Link> {
        self.links
            .iter()
            .find(|link| link.is_on(application, instance) && link.native_identity == native_identity)
    }

    /// Returns one link for mutation.
    pub fn find_link_mut(
        &mut self,
        application: &str,
        instance: Option<&str>,
        native_identity: &str,
    ) -> Option<&mut Link> {
        self.links
            .iter_mut()
            .find(|link| link.is_on(application, instance) && link.native_identity == native_identity)
    }

    /// Removes one link.
    pub fn remove_link(
        &mut self,
        application: &str,
        instance: Option<&str>,
        native_identity: &str,
    ) -> Option<Link> {
        let position = self.links.iter().position(|link| {
            link.is_on(application, instance) && link.native_identity == native_identity
        })?;
        Some(self.links.remove(position))
    }

    /// Returns the roles granted at `now`.
    #[must_use]
    pub fn assigned_roles(&self, now: DateTime<Utc>) -> Vec<String> {
        self.role_assignments.assigned_roles(now)
    }

    /// Returns the detected role names.
    #[must_use]
    pub fn detected_role_names(&self) -> Vec<&str> {
        self.detected_roles
            .iter()
            .map(|detection| detection.role_name.as_str())
            .collect()
    }
}
