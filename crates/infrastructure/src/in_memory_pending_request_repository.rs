use async_trait::async_trait;
use chrono::Utc;
use provisio_application::PendingRequestRepository;
use provisio_core::{AppError, AppResult};
use provisio_domain::PendingRequest;
use tokio::sync::RwLock;

/// In-memory store of submitted but unconfirmed plans.
#[derive(Debug, Default)]
pub struct InMemoryPendingRequestRepository {
    records: RwLock<Vec<PendingRequest>>,
}

impl InMemoryPendingRequestRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired records and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|record| !record.is_expired(now));
        before - records.len()
    }
}

#[async_trait]
impl PendingRequestRepository for InMemoryPendingRequestRepository {
    async fn save_pending_request(&self, request: PendingRequest) -> AppResult<()> {
        let mut records = self.records.write().await;
        records.retain(|record| record.id != request.id);
        records.push(request);
        Ok(())
    }

    async fn list_pending_requests(&self, identity_name: &str) -> AppResult<Vec<PendingRequest>> {
        let mut records: Vec<PendingRequest> = self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.identity_name == identity_name)
            .cloned()
            .collect();
        records.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(records)
    }

    async fn delete_pending_request(&self, id: &str) -> AppResult<()> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|record| record.id != id);
        if records.len() == before {
            return Err(AppError::NotFound(format!("pending request '{id}' does not exist")));
        }
        Ok(())
    }
}
