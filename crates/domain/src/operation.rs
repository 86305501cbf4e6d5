use std::str::FromStr;

use provisio_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Operation carried by an attribute or permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeOperation {
    /// Unions values into the current value.
    Add,
    /// Subtracts values immediately.
    Remove,
    /// Replaces the value, canceling prior pending operations.
    Set,
    /// Protects values from later removal without adding them.
    Retain,
    /// Subtracts values and marks the related assignment negative.
    Revoke,
}

impl AttributeOperation {
    /// Returns stable operation value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Set => "set",
            Self::Retain => "retain",
            Self::Revoke => "revoke",
        }
    }

    /// Returns whether the operation takes values away.
    #[must_use]
    pub fn is_subtractive(self) -> bool {
        matches!(self, Self::Remove | Self::Revoke)
    }

    /// Returns whether the operation grants or keeps values.
    ///
    /// `Set` and `Retain` count as additive for merge polarity.
    #[must_use]
    pub fn is_additive(self) -> bool {
        !self.is_subtractive()
    }
}

impl FromStr for AttributeOperation {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            "set" => Ok(Self::Set),
            "retain" => Ok(Self::Retain),
            "revoke" => Ok(Self::Revoke),
            _ => Err(AppError::Validation(format!(
                "unknown attribute operation '{value}'"
            ))),
        }
    }
}

/// Operation carried by an account or object request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountOperation {
    /// Creates the target account.
    Create,
    /// Changes attributes of an existing account.
    Modify,
    /// Deletes the target account.
    Delete,
    /// Enables a disabled account.
    Enable,
    /// Disables the account.
    Disable,
    /// Locks the account.
    Lock,
    /// Unlocks the account.
    Unlock,
}

impl AccountOperation {
    /// Returns stable operation value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }

    /// Precedence rank for conflict resolution.
    ///
    /// Delete > Create > Disable > Lock > Unlock > Enable > Modify.
    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::Delete => 6,
            Self::Create => 5,
            Self::Disable => 4,
            Self::Lock => 3,
            Self::Unlock => 2,
            Self::Enable => 1,
            Self::Modify => 0,
        }
    }

    /// Resolves two operations targeting the same account.
    ///
    /// Returns the incoming operation when it wins, or `None` when the
    /// existing one stays. An absent existing operation counts as `Modify`.
    #[must_use]
    pub fn reconcile(existing: Option<Self>, incoming: Option<Self>) -> Option<Self> {
        let existing = existing.unwrap_or(Self::Modify);
        let incoming = incoming?;
        (incoming.precedence() > existing.precedence()).then_some(incoming)
    }
}

impl FromStr for AccountOperation {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(Self::Create),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            "lock" => Ok(Self::Lock),
            "unlock" => Ok(Self::Unlock),
            _ => Err(AppError::Validation(format!(
                "unknown account operation '{value}'"
            ))),
        }
    }
}

/// Parses an optional operation name, treating blanks as absent.
pub fn parse_account_operation(value: Option<&str>) -> AppResult<Option<AccountOperation>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some),
    }
}
