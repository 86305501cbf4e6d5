use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisio_core::AppResult;
use provisio_domain::{CompilerOptions, Plan};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delayed re-execution of the unresolved part of one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryTask {
    /// Task id.
    pub id: String,
    /// Subject identity name.
    pub identity_name: String,
    /// Integration the plan targets.
    pub integration: String,
    /// Reduced plan with only unresolved requests.
    pub plan: Plan,
    /// Options of the original compilation.
    pub options: CompilerOptions,
    /// Earliest execution time.
    pub not_before: DateTime<Utc>,
    /// Attempts made so far.
    pub attempt: u32,
}

impl RetryTask {
    /// Creates the first retry of a plan.
    #[must_use]
    pub fn new(
        identity_name: impl Into<String>,
        integration: impl Into<String>,
        plan: Plan,
        options: CompilerOptions,
        not_before: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            identity_name: identity_name.into(),
            integration: integration.into(),
            plan,
            options,
            not_before,
            attempt: 1,
        }
    }
}

/// Port for the delayed-task queue.
#[async_trait]
pub trait RetryScheduler: Send + Sync {
    /// Queues a task for execution at or after its `not_before` time.
    async fn schedule(&self, task: RetryTask) -> AppResult<()>;

    /// Removes and returns every task due at `now`.
    async fn take_due(&self, now: DateTime<Utc>) -> AppResult<Vec<RetryTask>>;
}
