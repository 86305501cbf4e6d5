use async_trait::async_trait;
use provisio_core::AppResult;
use provisio_domain::{IntegrationConfig, Plan, ProvisioningResult};

/// Port for the connector that applies a plan to one backend.
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    /// Applies a plan and returns it with results attached.
    ///
    /// Requests without a native identity must come back with a failed
    /// result rather than an error.
    async fn provision(&self, config: &IntegrationConfig, plan: Plan) -> AppResult<Plan>;

    /// Checks the status of an earlier queued request.
    async fn check_status(
        &self,
        config: &IntegrationConfig,
        request_id: &str,
    ) -> AppResult<ProvisioningResult>;
}

/// Port describing the order in which integration plans must run.
#[async_trait]
pub trait DependencyEvaluator: Send + Sync {
    /// Returns the applications that must be provisioned before this plan.
    async fn required_applications(&self, plan: &Plan) -> AppResult<Vec<String>>;
}
