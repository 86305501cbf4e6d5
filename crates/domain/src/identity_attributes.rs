//! Names used by requests that target the subject's own identity record.

/// Application name routing a request to the identity record.
pub const IDENTITY_APPLICATION: &str = "identity";

/// Assigned role list.
pub const ASSIGNED_ROLES: &str = "assignedRoles";
/// Detected role list.
pub const DETECTED_ROLES: &str = "detectedRoles";
/// Capability list.
pub const CAPABILITIES: &str = "capabilities";
/// Controlled scope list.
pub const CONTROLLED_SCOPES: &str = "controlledScopes";
/// Assigned scope.
pub const SCOPE: &str = "scope";
/// Whether the identity controls its assigned scope.
pub const CONTROLS_ASSIGNED_SCOPE: &str = "controlsAssignedScope";
/// Password.
pub const PASSWORD: &str = "password";
/// Workgroup memberships.
pub const WORKGROUPS: &str = "workgroups";
/// Activity monitoring configuration.
pub const ACTIVITY_CONFIG: &str = "activityConfig";
/// Identity archives.
pub const ARCHIVES: &str = "archives";
/// Identity snapshots.
pub const SNAPSHOTS: &str = "snapshots";
/// Scheduled identity events.
pub const EVENTS: &str = "events";
/// Pending provisioning request records.
pub const PROVISIONING_REQUESTS: &str = "provisioningRequests";
/// Account links.
pub const LINKS: &str = "links";
/// Work item forwarding target.
pub const FORWARD: &str = "forward";
/// Forwarding start date.
pub const FORWARD_START_DATE: &str = "forwardStartDate";
/// Forwarding end date.
pub const FORWARD_END_DATE: &str = "forwardEndDate";
/// Use-by date.
pub const USE_BY: &str = "useBy";
/// Protection from automatic deletion.
pub const PROTECTED: &str = "protected";
/// Manager reference.
pub const MANAGER: &str = "manager";
/// Refresh marker.
pub const NEEDS_REFRESH: &str = "needsRefresh";
/// Identity type.
pub const TYPE: &str = "type";

/// Role lists expanded by the compiler.
pub const ROLE_ATTRIBUTES: [&str; 2] = [ASSIGNED_ROLES, DETECTED_ROLES];

/// Attributes with dedicated handling on the identity record.
pub const RESERVED_ATTRIBUTES: [&str; 22] = [
    ASSIGNED_ROLES,
    DETECTED_ROLES,
    CAPABILITIES,
    CONTROLLED_SCOPES,
    SCOPE,
    CONTROLS_ASSIGNED_SCOPE,
    PASSWORD,
    WORKGROUPS,
    ACTIVITY_CONFIG,
    ARCHIVES,
    SNAPSHOTS,
    EVENTS,
    PROVISIONING_REQUESTS,
    LINKS,
    FORWARD,
    FORWARD_START_DATE,
    FORWARD_END_DATE,
    USE_BY,
    PROTECTED,
    MANAGER,
    NEEDS_REFRESH,
    TYPE,
];

/// Returns whether an attribute is handled specially instead of being an
/// extended attribute.
#[must_use]
pub fn is_reserved_attribute(name: &str) -> bool {
    RESERVED_ATTRIBUTES.contains(&name)
}

/// Returns whether an application name addresses the identity record.
#[must_use]
pub fn is_identity_application(application: &str) -> bool {
    application == IDENTITY_APPLICATION
}
