//! Shared primitives for all Rust crates in Provisio.

#![forbid(unsafe_code)]

/// Requester primitives shared across services.
pub mod requester;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use requester::Requester;

/// Result type used across Provisio crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl Display for NonEmptyString {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Prefix marking an assignment id minted for one compilation only.
pub const TEMPORARY_ASSIGNMENT_PREFIX: &str = "TEMP:";

/// Placeholder callers use when requesting a brand-new role assignment.
pub const NEW_ASSIGNMENT_PLACEHOLDER: &str = "new";

/// Stable correlation key tying role-assignment requests to persisted metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(String);

impl AssignmentId {
    /// Creates a random permanent assignment identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Creates a temporary identifier for an assignment that has no id yet.
    #[must_use]
    pub fn temporary(role_name: &str) -> Self {
        Self(format!(
            "{TEMPORARY_ASSIGNMENT_PREFIX}{role_name}:{}",
            Uuid::new_v4().simple()
        ))
    }

    /// Wraps an existing identifier value.
    pub fn parse(value: impl Into<String>) -> AppResult<Self> {
        let value = NonEmptyString::new(value)?;
        Ok(Self(value.into()))
    }

    /// Returns the underlying identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns whether this id only lives for one compilation.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        is_temporary_assignment_id(self.0.as_str())
    }
}

impl Display for AssignmentId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

impl From<AssignmentId> for String {
    fn from(value: AssignmentId) -> Self {
        value.0
    }
}

/// Returns whether a raw assignment id carries the temporary prefix.
#[must_use]
pub fn is_temporary_assignment_id(value: &str) -> bool {
    value.starts_with(TEMPORARY_ASSIGNMENT_PREFIX)
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Plans depend on each other in a way that can never be satisfied.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// A backend collaborator failed outside of a provisioning result.
    #[error("backend error: {0}")]
    Backend(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps a foreign error message so callers only handle one error kind.
    #[must_use]
    pub fn wrap(context: &str, error: impl Display) -> Self {
        Self::Internal(format!("{context}: {error}"))
    }
}
