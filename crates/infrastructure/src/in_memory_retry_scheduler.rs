use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisio_application::{RetryScheduler, RetryTask};
use provisio_core::AppResult;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory delayed-task queue ordered by `not_before`.
#[derive(Debug, Default)]
pub struct InMemoryRetryScheduler {
    tasks: Mutex<Vec<RetryTask>>,
}

impl InMemoryRetryScheduler {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Returns whether no task is queued.
    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Earliest `not_before` among queued tasks.
    pub async fn next_due(&self) -> Option<DateTime<Utc>> {
        self.tasks.lock().await.first().map(|task| task.not_before)
    }
}

#[async_trait]
impl RetryScheduler for InMemoryRetryScheduler {
    async fn schedule(&self, task: RetryTask) -> AppResult<()> {
        let mut tasks = self.tasks.lock().await;
        let position = tasks.partition_point(|queued| queued.not_before <= task.not_before);
        debug!(task_id = %task.id, not_before = %task.not_before, "retry task queued");
        tasks.insert(position, task);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> AppResult<Vec<RetryTask>> {
        let mut tasks = self.tasks.lock().await;
        let due_count = tasks.partition_point(|task| task.not_before <= now);
        Ok(tasks.drain(..due_count).collect())
    }
}
