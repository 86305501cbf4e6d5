use serde::{Deserialize, Serialize};

/// Caller on whose behalf a plan is compiled and executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    name: String,
    display_name: String,
    system_admin: bool,
    password_admin: bool,
}

impl Requester {
    /// Creates a requester without administrative privileges.
    #[must_use]
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            system_admin: false,
            password_admin: false,
        }
    }

    /// Requester used for background and scheduled work.
    #[must_use]
    pub fn system() -> Self {
        Self {
            name: "system".to_owned(),
            display_name: "System".to_owned(),
            system_admin: true,
            password_admin: true,
        }
    }

    /// Marks the requester as a password administrator.
    #[must_use]
    pub fn with_password_admin(mut self, password_admin: bool) -> Self {
        self.password_admin = password_admin;
        self
    }

    /// Returns the stable requester name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the display name for the requester.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_str()
    }

    /// Returns whether the requester is a system administrator.
    #[must_use]
    pub fn is_system_admin(&self) -> bool {
        self.system_admin
    }

    /// Returns whether the requester may reset passwords for others.
    #[must_use]
    pub fn is_password_admin(&self) -> bool {
        self.system_admin || self.password_admin
    }
}
