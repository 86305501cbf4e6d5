use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::Plan;
use crate::result::ProvisioningStatus;

/// Record of work sent to a backend but not yet confirmed.
///
/// Later compilations subtract these changes so they are not sent twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Record id.
    pub id: String,
    /// Subject identity name.
    pub identity_name: String,
    /// Integration the plan was sent to.
    pub integration: String,
    /// Submitted plan with its results.
    pub plan: Plan,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time after which the record is ignored.
    pub expiration: DateTime<Utc>,
}

impl PendingRequest {
    /// Creates a record for one submitted plan.
    #[must_use]
    pub fn new(
        identity_name: impl Into<String>,
        integration: impl Into<String>,
        plan: Plan,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            identity_name: identity_name.into(),
            integration: integration.into(),
            plan,
            created_at: Utc::now(),
            expiration,
        }
    }

    /// Returns whether the record no longer counts.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }

    /// Returns whether a request result still counts as pending.
    ///
    /// Everything except a terminal failure is pending, including work
    /// waiting for a retry.
    #[must_use]
    pub fn counts_as_pending(status: Option<ProvisioningStatus>) -> bool {
        status != Some(ProvisioningStatus::Failed)
    }
}
