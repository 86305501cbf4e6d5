use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisio_core::AppResult;
use provisio_domain::{DeferredRequest, Identity, Plan, RoleDetection};

/// Port that detects roles from account entitlements.
#[async_trait]
pub trait EntitlementCorrelator: Send + Sync {
    /// Returns the roles the identity's accounts currently satisfy.
    async fn detect_roles(&self, identity: &Identity) -> AppResult<Vec<RoleDetection>>;
}

/// Port that schedules sunrise and sunset events.
#[async_trait]
pub trait RoleEventGenerator: Send + Sync {
    /// Creates or refreshes scheduled events and returns their ids.
    ///
    /// Covers dated role assignments on the identity and dated backend
    /// changes held back by the compiler.
    async fn schedule_events(
        &self,
        identity: &Identity,
        deferred: &[DeferredRequest],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<String>>;
}

/// Port that mirrors committed account changes onto cached links.
#[async_trait]
pub trait AccountPlanApplier: Send + Sync {
    /// Applies the committed parts of executed plans to the identity's links.
    async fn apply_account_plans(&self, identity: &mut Identity, plans: &[Plan]) -> AppResult<()>;
}
