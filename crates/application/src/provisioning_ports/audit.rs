use async_trait::async_trait;
use provisio_core::AppResult;
use serde_json::Value;

/// Kind of provisioning audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningAuditKind {
    /// A request reached a backend successfully.
    ProvisioningCommitted,
    /// A request failed terminally.
    ProvisioningFailed,
    /// A request was handed to the retry queue.
    ProvisioningRetried,
    /// A derived change reached a backend.
    ExpansionApplied,
    /// The identity password changed.
    PasswordChanged,
    /// A role assignment was added or refreshed.
    RoleAssigned,
    /// A role assignment was removed.
    RoleRemoved,
    /// The identity was deleted.
    IdentityDeleted,
}

impl ProvisioningAuditKind {
    /// Returns stable event name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProvisioningCommitted => "provisioning.committed",
            Self::ProvisioningFailed => "provisioning.failed",
            Self::ProvisioningRetried => "provisioning.retried",
            Self::ExpansionApplied => "provisioning.expansion",
            Self::PasswordChanged => "identity.password_changed",
            Self::RoleAssigned => "identity.role_assigned",
            Self::RoleRemoved => "identity.role_removed",
            Self::IdentityDeleted => "identity.deleted",
        }
    }
}

/// Canonical audit event emitted by provisioning.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningAuditEvent {
    /// Event kind.
    pub kind: ProvisioningAuditKind,
    /// Subject identity name.
    pub identity_name: String,
    /// Application the event concerns.
    pub application: Option<String>,
    /// Native identity of the account.
    pub native_identity: Option<String>,
    /// Attribute or permission name.
    pub attribute: Option<String>,
    /// Value involved.
    pub value: Option<Value>,
    /// Free-text detail.
    pub detail: Option<String>,
}

impl ProvisioningAuditEvent {
    /// Creates an event with only kind and subject.
    #[must_use]
    pub fn new(kind: ProvisioningAuditKind, identity_name: impl Into<String>) -> Self {
        Self {
            kind,
            identity_name: identity_name.into(),
            application: None,
            native_identity: None,
            attribute: None,
            value: None,
            detail: None,
        }
    }

    /// Sets the account the event concerns.
    #[must_use]
    pub fn on_account(mut self, application: &str, native_identity: Option<&str>) -> Self {
        self.application = Some(application.to_owned());
        self.native_identity = native_identity.map(ToOwned::to_owned);
        self
    }

    /// Sets the attribute and value.
    #[must_use]
    pub fn with_attribute(mut self, attribute: &str, value: Option<Value>) -> Self {
        self.attribute = Some(attribute.to_owned());
        self.value = value;
        self
    }

    /// Sets the detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Append-only audit port. Callers log and swallow failures.
#[async_trait]
pub trait ProvisioningAuditSink: Send + Sync {
    /// Appends a single audit event.
    async fn append_event(&self, event: ProvisioningAuditEvent) -> AppResult<()>;
}
