use std::str::FromStr;

use chrono::{DateTime, Utc};
use provisio_core::AppError;
use serde::{Deserialize, Serialize};

/// Outcome status reported for a plan, account request or generic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    /// Applied synchronously.
    Committed,
    /// Accepted for asynchronous processing.
    Queued,
    /// Transient failure eligible for background retry.
    Retry,
    /// Terminal failure.
    Failed,
}

impl ProvisioningStatus {
    /// Returns stable status value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Queued => "queued",
            Self::Retry => "retry",
            Self::Failed => "failed",
        }
    }

    /// Returns whether the change was handed to the backend successfully.
    #[must_use]
    pub fn is_submitted(self) -> bool {
        matches!(self, Self::Committed | Self::Queued)
    }

    /// Severity rank used when summarising several outcomes.
    #[must_use]
    pub fn severity(self) -> u8 {
        match self {
            Self::Committed => 0,
            Self::Queued => 1,
            Self::Retry => 2,
            Self::Failed => 3,
        }
    }
}

impl FromStr for ProvisioningStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "committed" => Ok(Self::Committed),
            "queued" => Ok(Self::Queued),
            "retry" => Ok(Self::Retry),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown provisioning status '{value}'"
            ))),
        }
    }
}

/// Result a backend executor attaches to a plan or request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    /// Outcome status.
    pub status: ProvisioningStatus,
    /// Backend-assigned request id for later status checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Error messages reported by the backend or the engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Warning messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Earliest time a retry should be attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

impl ProvisioningResult {
    /// Creates a result with only a status.
    #[must_use]
    pub fn new(status: ProvisioningStatus) -> Self {
        Self {
            status,
            request_id: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            retry_at: None,
        }
    }

    /// Successful synchronous result.
    #[must_use]
    pub fn committed() -> Self {
        Self::new(ProvisioningStatus::Committed)
    }

    /// Terminal failure with one message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        let mut result = Self::new(ProvisioningStatus::Failed);
        result.errors.push(message.into());
        result
    }

    /// Transient failure with one message.
    #[must_use]
    pub fn retry(message: impl Into<String>) -> Self {
        let mut result = Self::new(ProvisioningStatus::Retry);
        result.errors.push(message.into());
        result
    }

    /// Returns whether the result is a terminal failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == ProvisioningStatus::Failed
    }

    /// Returns whether the result asks for a retry.
    #[must_use]
    pub fn needs_retry(&self) -> bool {
        self.status == ProvisioningStatus::Retry
    }
}

/// Returns the most severe status among several outcomes.
#[must_use]
pub fn worst_status(
    statuses: impl IntoIterator<Item = ProvisioningStatus>,
) -> Option<ProvisioningStatus> {
    statuses.into_iter().max_by_key(|status| status.severity())
}
