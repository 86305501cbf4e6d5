use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisio_application::{ProvisioningAuditEvent, ProvisioningAuditSink};
use provisio_core::AppResult;
use tokio::sync::RwLock;
use tracing::info;

/// Audit event with the time it was appended.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    /// Append time.
    pub recorded_at: DateTime<Utc>,
    /// The event.
    pub event: ProvisioningAuditEvent,
}

/// Append-only in-memory audit log that also emits each event to tracing.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists the entries of one identity in append order.
    pub async fn list_for_identity(&self, identity_name: &str) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.event.identity_name == identity_name)
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns whether nothing was appended.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ProvisioningAuditSink for InMemoryAuditLog {
    async fn append_event(&self, event: ProvisioningAuditEvent) -> AppResult<()> {
        info!(
            target: "provisio::audit",
            event = event.kind.as_str(),
            identity = %event.identity_name,
            application = event.application.as_deref().unwrap_or("-"),
            native_identity = event.native_identity.as_deref().unwrap_or("-"),
            attribute = event.attribute.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
        self.entries.write().await.push(AuditLogEntry {
            recorded_at: Utc::now(),
            event,
        });
        Ok(())
    }
}
