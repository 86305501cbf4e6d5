use std::collections::BTreeSet;
use std::str::FromStr;

use provisio_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::values::values_as_text;

/// Named switch that changes how a project is compiled or executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompilerOption {
    /// Skip role expansion entirely.
    NoRoleExpansion,
    /// Expand role removals but not role adds or retains.
    NoRoleProvisioning,
    /// Do not remove entitlements of removed roles.
    NoRoleDeprovisioning,
    /// Do not remove entitlements inherited from parent roles.
    NoInheritedRoleDeprovisioning,
    /// Skip application account templates.
    NoApplicationTemplates,
    /// Skip templates for account creation.
    NoCreateTemplates,
    /// Apply update templates to modify requests.
    AutoExpandUpdateTemplates,
    /// Skip identity attribute synchronisation.
    NoAttributeSyncExpansion,
    /// Skip required application dependencies.
    NoApplicationDependencies,
    /// Skip expansion of composite applications.
    NoCompositeExpansion,
    /// Skip filtering against existing account data.
    NoFiltering,
    /// Keep retain requests on backend plans.
    NoFilteringRetains,
    /// Skip filtering against pending requests.
    NoPendingRequestFiltering,
    /// Reconcile every assignment, implies permitted role retention.
    FullReconciliation,
    /// Retain entitlements of permitted roles.
    RetainPermittedRoles,
    /// Do not generate retains for current assignments.
    IgnoreCurrentRoles,
    /// Retain entitlements of detected roles.
    PreserveDetectedRoles,
    /// Subtractions win over retains unless a request says otherwise.
    PreferRemoveOverRetain,
    /// Resolve ambiguous accounts by taking the first one.
    ChooseFirstAmbiguousAccount,
    /// Drop every sunrise date.
    IgnoreStartDate,
    /// Run without calling backends and without committing.
    SimulateProvisioning,
    /// Skip identity locking.
    NoLocking,
    /// Execute nothing and reconcile nothing.
    NoLinkUpdate,
    /// Only apply changes to the local identity.
    LocalUpdate,
    /// Treat every non-failed backend result as committed.
    OptimisticProvisioning,
    /// Skip role detection after assignment changes.
    NoRoleDetection,
    /// Run a local refresh after reconciliation.
    DoRefresh,
    /// Never schedule retry tasks.
    DisableRetryRequest,
    /// Fail instead of retrying when a maintenance window is active.
    NoMaintenanceWindowRetry,
}

impl CompilerOption {
    /// Every option, in declaration order.
    pub const ALL: [Self; 29] = [
        Self::NoRoleExpansion,
        Self::NoRoleProvisioning,
        Self::NoRoleDeprovisioning,
        Self::NoInheritedRoleDeprovisioning,
        Self::NoApplicationTemplates,
        Self::NoCreateTemplates,
        Self::AutoExpandUpdateTemplates,
        Self::NoAttributeSyncExpansion,
        Self::NoApplicationDependencies,
        Self::NoCompositeExpansion,
        Self::NoFiltering,
        Self::NoFilteringRetains,
        Self::NoPendingRequestFiltering,
        Self::FullReconciliation,
        Self::RetainPermittedRoles,
        Self::IgnoreCurrentRoles,
        Self::PreserveDetectedRoles,
        Self::PreferRemoveOverRetain,
        Self::ChooseFirstAmbiguousAccount,
        Self::IgnoreStartDate,
        Self::SimulateProvisioning,
        Self::NoLocking,
        Self::NoLinkUpdate,
        Self::LocalUpdate,
        Self::OptimisticProvisioning,
        Self::NoRoleDetection,
        Self::DoRefresh,
        Self::DisableRetryRequest,
        Self::NoMaintenanceWindowRetry,
    ];

    /// Returns stable option name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoRoleExpansion => "noRoleExpansion",
            Self::NoRoleProvisioning => "noRoleProvisioning",
            Self::NoRoleDeprovisioning => "noRoleDeprovisioning",
            Self::NoInheritedRoleDeprovisioning => "noInheritedRoleDeprovisioning",
            Self::NoApplicationTemplates => "noApplicationTemplates",
            Self::NoCreateTemplates => "noCreateTemplates",
            Self::AutoExpandUpdateTemplates => "autoExpandUpdateTemplates",
            Self::NoAttributeSyncExpansion => "noAttributeSyncExpansion",
            Self::NoApplicationDependencies => "noApplicationDependencies",
            Self::NoCompositeExpansion => "noCompositeExpansion",
            Self::NoFiltering => "noFiltering",
            Self::NoFilteringRetains => "noFilteringRetains",
            Self::NoPendingRequestFiltering => "noPendingRequestFiltering",
            Self::FullReconciliation => "fullReconciliation",
            Self::RetainPermittedRoles => "retainPermittedRoles",
            Self::IgnoreCurrentRoles => "ignoreCurrentRoles",
            Self::PreserveDetectedRoles => "preserveDetectedRoles",
            Self::PreferRemoveOverRetain => "preferRemoveOverRetain",
            Self::ChooseFirstAmbiguousAccount => "chooseFirstAmbiguousAccount",
            Self::IgnoreStartDate => "ignoreStartDate",
            Self::SimulateProvisioning => "simulateProvisioning",
            Self::NoLocking => "noLocking",
            Self::NoLinkUpdate => "noLinkUpdate",
            Self::LocalUpdate => "localUpdate",
            Self::OptimisticProvisioning => "optimisticProvisioning",
            Self::NoRoleDetection => "noRoleDetection",
            Self::DoRefresh => "doRefresh",
            Self::DisableRetryRequest => "disableRetryRequest",
            Self::NoMaintenanceWindowRetry => "noMaintenanceWindowRetry",
        }
    }
}

impl FromStr for CompilerOption {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|option| option.as_str() == value)
            .ok_or_else(|| AppError::Validation(format!("unknown compiler option '{value}'")))
    }
}

/// Argument name carrying the application scope list.
pub const SCOPE_ARGUMENT: &str = "scope";
/// Argument name carrying the refresh option map.
pub const REFRESH_OPTIONS_ARGUMENT: &str = "refreshOptions";

/// Typed options of one compilation and its execution.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompilerOptions {
    #[serde(default)]
    enabled: BTreeSet<CompilerOption>,
    /// Applications the compiled plans are restricted to; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    /// Options passed through to the local refresh.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub refresh_options: Map<String, Value>,
}

impl CompilerOptions {
    /// Creates options with nothing enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables one option.
    #[must_use]
    pub fn with(mut self, option: CompilerOption) -> Self {
        self.enable(option);
        self
    }

    /// Restricts compilation to the given applications.
    #[must_use]
    pub fn with_scope(mut self, applications: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scope = applications.into_iter().map(Into::into).collect();
        self
    }

    /// Enables one option in place.
    pub fn enable(&mut self, option: CompilerOption) {
        self.enabled.insert(option);
        if option == CompilerOption::FullReconciliation {
            self.enabled.insert(CompilerOption::RetainPermittedRoles);
        }
    }

    /// Returns whether an option is enabled.
    #[must_use]
    pub fn is_enabled(&self, option: CompilerOption) -> bool {
        self.enabled.contains(&option)
    }

    /// Iterates the enabled options.
    pub fn enabled(&self) -> impl Iterator<Item = CompilerOption> + '_ {
        self.enabled.iter().copied()
    }

    /// Returns whether an application passes the scope restriction.
    #[must_use]
    pub fn in_scope(&self, application: &str) -> bool {
        self.scope.is_empty() || self.scope.iter().any(|name| name == application)
    }

    /// Returns whether backend calls are replaced by synthetic results.
    #[must_use]
    pub fn skips_backends(&self) -> bool {
        self.is_enabled(CompilerOption::SimulateProvisioning)
            || self.is_enabled(CompilerOption::LocalUpdate)
    }

    /// Parses options from a string-keyed argument map.
    ///
    /// Unknown keys are ignored so the map can carry other plan arguments.
    /// Legacy switches are mapped onto their current names.
    pub fn from_arguments(arguments: &Map<String, Value>) -> AppResult<Self> {
        let mut options = Self::new();
        for (name, value) in arguments {
            match name.as_str() {
                SCOPE_ARGUMENT => options.scope = scope_list(value),
                REFRESH_OPTIONS_ARGUMENT => {
                    options.refresh_options = match value {
                        Value::Object(map) => map.clone(),
                        Value::Null => Map::new(),
                        other => {
                            return Err(AppError::Validation(format!(
                                "refreshOptions must be an object, got '{other}'"
                            )));
                        }
                    };
                }
                "entitlementDeprovisioning" | "allowDeprovisioning" => {
                    if is_false(value) {
                        options.enable(CompilerOption::NoRoleDeprovisioning);
                    }
                }
                "deprovisionHierarchy" => {
                    if is_false(value) {
                        options.enable(CompilerOption::NoInheritedRoleDeprovisioning);
                    }
                }
                other => {
                    if let Ok(option) = other.parse::<CompilerOption>()
                        && is_true(value)
                    {
                        options.enable(option);
                    }
                }
            }
        }

        Ok(options)
    }

    /// Renders the options back into an argument map.
    #[must_use]
    pub fn to_arguments(&self) -> Map<String, Value> {
        let mut arguments = Map::new();
        for option in &self.enabled {
            arguments.insert(option.as_str().to_owned(), Value::Bool(true));
        }
        if !self.scope.is_empty() {
            arguments.insert(
                SCOPE_ARGUMENT.to_owned(),
                Value::Array(self.scope.iter().cloned().map(Value::String).collect()),
            );
        }
        if !self.refresh_options.is_empty() {
            arguments.insert(
                REFRESH_OPTIONS_ARGUMENT.to_owned(),
                Value::Object(self.refresh_options.clone()),
            );
        }
        arguments
    }
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn is_false(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => !*flag,
        Value::String(text) => text.eq_ignore_ascii_case("false"),
        _ => false,
    }
}

fn scope_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
        other => values_as_text(Some(other)),
    }
}
