use async_trait::async_trait;
use provisio_core::AppResult;
use provisio_domain::PendingRequest;

/// Repository port for submitted but unconfirmed plans.
#[async_trait]
pub trait PendingRequestRepository: Send + Sync {
    /// Saves one record.
    async fn save_pending_request(&self, request: PendingRequest) -> AppResult<()>;

    /// Lists the records of one identity.
    async fn list_pending_requests(&self, identity_name: &str) -> AppResult<Vec<PendingRequest>>;

    /// Deletes one record.
    async fn delete_pending_request(&self, id: &str) -> AppResult<()>;
}
