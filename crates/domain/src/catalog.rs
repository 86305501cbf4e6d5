use chrono::{DateTime, Duration, Utc};
use provisio_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::GenericRequestKind;
use crate::values::ValueMatcher;

/// Entitlements a role requires on one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementProfile {
    /// Application name.
    pub application: String,
    /// Attribute or permission.
    pub kind: GenericRequestKind,
    /// Attribute name or permission target.
    pub name: String,
    /// Required values.
    pub values: Vec<Value>,
}

impl EntitlementProfile {
    /// Creates an attribute profile.
    #[must_use]
    pub fn attribute(
        application: impl Into<String>,
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        Self {
            application: application.into(),
            kind: GenericRequestKind::Attribute,
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Role catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Unique role name.
    pub name: String,
    /// Disabled roles are never expanded.
    #[serde(default)]
    pub disabled: bool,
    /// Entitlements granted by this role.
    #[serde(default)]
    pub profiles: Vec<EntitlementProfile>,
    /// Roles that come with this role.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Roles that may be requested on top of this role.
    #[serde(default)]
    pub permitted_roles: Vec<String>,
    /// Parent roles whose profiles this role inherits.
    #[serde(default)]
    pub inherited_roles: Vec<String>,
}

impl RoleDefinition {
    /// Creates an enabled role without profiles.
    pub fn new(name: impl Into<String>) -> AppResult<Self> {
        let name = NonEmptyString::new(name)?;
        Ok(Self {
            name: name.into(),
            disabled: false,
            profiles: Vec::new(),
            required_roles: Vec::new(),
            permitted_roles: Vec::new(),
            inherited_roles: Vec::new(),
        })
    }

    /// Adds a profile.
    #[must_use]
    pub fn with_profile(mut self, profile: EntitlementProfile) -> Self {
        self.profiles.push(profile);
        self
    }

    /// Adds a required role.
    #[must_use]
    pub fn with_required_role(mut self, role_name: impl Into<String>) -> Self {
        self.required_roles.push(role_name.into());
        self
    }

    /// Adds a permitted role.
    #[must_use]
    pub fn with_permitted_role(mut self, role_name: impl Into<String>) -> Self {
        self.permitted_roles.push(role_name.into());
        self
    }

    /// Adds an inherited parent role.
    #[must_use]
    pub fn with_inherited_role(mut self, role_name: impl Into<String>) -> Self {
        self.inherited_roles.push(role_name.into());
        self
    }
}

/// Which requests an account template applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateUsage {
    /// Account creation.
    Create,
    /// Account modification.
    Update,
}

/// One field of an account template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    /// Account attribute name.
    pub name: String,
    /// Identity attribute supplying the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_attribute: Option<String>,
    /// Literal default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Script computing the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Required fields without a value become questions.
    #[serde(default)]
    pub required: bool,
    /// Prompt for the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Declarative account template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTemplate {
    /// Requests the template applies to.
    pub usage: TemplateUsage,
    /// Template fields.
    pub fields: Vec<TemplateField>,
}

/// Application catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDefinition {
    /// Unique application name.
    pub name: String,
    /// Whether names and values compare without case.
    #[serde(default)]
    pub case_insensitive: bool,
    /// Account templates.
    #[serde(default)]
    pub templates: Vec<AccountTemplate>,
    /// Applications that need an account before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Tier applications of a composite application.
    #[serde(default)]
    pub tier_applications: Vec<String>,
}

impl ApplicationDefinition {
    /// Creates a case-sensitive application.
    pub fn new(name: impl Into<String>) -> AppResult<Self> {
        let name = NonEmptyString::new(name)?;
        Ok(Self {
            name: name.into(),
            case_insensitive: false,
            templates: Vec::new(),
            dependencies: Vec::new(),
            tier_applications: Vec::new(),
        })
    }

    /// Switches to case-insensitive comparison.
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Adds a template.
    #[must_use]
    pub fn with_template(mut self, template: AccountTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Adds a required application.
    #[must_use]
    pub fn with_dependency(mut self, application: impl Into<String>) -> Self {
        self.dependencies.push(application.into());
        self
    }

    /// Adds a tier application.
    #[must_use]
    pub fn with_tier(mut self, application: impl Into<String>) -> Self {
        self.tier_applications.push(application.into());
        self
    }

    /// Returns the value matcher for this application.
    #[must_use]
    pub fn matcher(&self) -> ValueMatcher {
        ValueMatcher::new(self.case_insensitive)
    }

    /// Returns whether the application fans out to tier applications.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        !self.tier_applications.is_empty()
    }

    /// Returns the template for one usage.
    #[must_use]
    pub fn template(&self, usage: TemplateUsage) -> Option<&AccountTemplate> {
        self.templates
            .iter()
            .find(|template| template.usage == usage)
    }
}

/// Identity attribute mirrored onto an account attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSyncTarget {
    /// Source identity attribute.
    pub identity_attribute: String,
    /// Target application.
    pub application: String,
    /// Target account attribute.
    pub account_attribute: String,
    /// Push to every account instead of asking when there are several.
    #[serde(default)]
    pub all_accounts: bool,
    /// Optional value transform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_script: Option<String>,
}

/// Maintenance state reported by an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "until", rename_all = "snake_case")]
pub enum MaintenanceWindow {
    /// No maintenance.
    #[default]
    Inactive,
    /// Maintenance without an end.
    Permanent,
    /// Maintenance until the given time.
    Until(DateTime<Utc>),
}

impl MaintenanceWindow {
    /// Interprets a raw expiration in epoch milliseconds.
    ///
    /// Negative means permanent and zero means no maintenance.
    #[must_use]
    pub fn from_expiration_millis(expiration: i64) -> Self {
        match expiration {
            0 => Self::Inactive,
            value if value < 0 => Self::Permanent,
            value => DateTime::<Utc>::from_timestamp_millis(value)
                .map_or(Self::Permanent, Self::Until),
        }
    }

    /// Returns whether the window blocks provisioning at `now`.
    #[must_use]
    pub fn is_active(self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Inactive => false,
            Self::Permanent => true,
            Self::Until(until) => until > now,
        }
    }

    /// Returns when a retry should be attempted.
    ///
    /// Outside a window the next regular retry cycle applies. A permanent
    /// window is checked again a day later.
    #[must_use]
    pub fn retry_date(self, now: DateTime<Utc>, retry_interval: Duration) -> DateTime<Utc> {
        match self {
            Self::Inactive => now + retry_interval,
            Self::Permanent => now + Duration::hours(24),
            Self::Until(until) if until > now => until,
            Self::Until(_) => now + retry_interval,
        }
    }
}

/// Backend integration configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Unique integration name.
    pub name: String,
    /// Applications this integration provisions.
    pub managed_applications: Vec<String>,
    /// Permission requests are handled manually.
    #[serde(default)]
    pub no_permissions: bool,
    /// Registered executor name.
    pub executor: String,
    /// Maintenance state.
    #[serde(default)]
    pub maintenance: MaintenanceWindow,
    /// Script run against each plan before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_initializer: Option<String>,
}

impl IntegrationConfig {
    /// Creates an integration for one executor.
    pub fn new(name: impl Into<String>, executor: impl Into<String>) -> AppResult<Self> {
        let name = NonEmptyString::new(name)?;
        let executor = NonEmptyString::new(executor)?;
        Ok(Self {
            name: name.into(),
            managed_applications: Vec::new(),
            no_permissions: false,
            executor: executor.into(),
            maintenance: MaintenanceWindow::Inactive,
            plan_initializer: None,
        })
    }

    /// Adds a managed application.
    #[must_use]
    pub fn managing(mut self, application: impl Into<String>) -> Self {
        self.managed_applications.push(application.into());
        self
    }

    /// Sets the maintenance state.
    #[must_use]
    pub fn with_maintenance(mut self, maintenance: MaintenanceWindow) -> Self {
        self.maintenance = maintenance;
        self
    }

    /// Returns whether this integration manages an application.
    #[must_use]
    pub fn manages(&self, application: &str) -> bool {
        self.managed_applications
            .iter()
            .any(|managed| managed == application)
    }
}
