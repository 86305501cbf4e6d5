use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Interactive input a compilation is waiting for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Question {
    /// Choice between several existing accounts.
    AccountSelection(AccountSelection),
    /// Value for a required template field.
    TemplateField(TemplateFieldQuestion),
}

impl Question {
    /// Returns the deterministic question id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::AccountSelection(selection) => selection.id.as_str(),
            Self::TemplateField(field) => field.id.as_str(),
        }
    }

    /// Returns whether an answer was recorded.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        match self {
            Self::AccountSelection(selection) => selection.answered,
            Self::TemplateField(field) => field.answer.is_some(),
        }
    }

    /// Returns the account selection, if this is one.
    #[must_use]
    pub fn as_account_selection(&self) -> Option<&AccountSelection> {
        match self {
            Self::AccountSelection(selection) => Some(selection),
            Self::TemplateField(_) => None,
        }
    }

    /// Returns the template field question, if this is one.
    #[must_use]
    pub fn as_template_field(&self) -> Option<&TemplateFieldQuestion> {
        match self {
            Self::AccountSelection(_) => None,
            Self::TemplateField(field) => Some(field),
        }
    }
}

/// Pending choice of target account on an application with several accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSelection {
    /// Deterministic id, stable across recompilations.
    pub id: String,
    /// Application with the ambiguous accounts.
    pub application: String,
    /// Application instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Role whose expansion needs the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    /// Role assignment the selection belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    /// Native identities to choose from.
    pub candidates: Vec<String>,
    /// Native identities chosen by the answer.
    #[serde(default)]
    pub selected: Vec<String>,
    /// Whether the question was answered.
    #[serde(default)]
    pub answered: bool,
    /// Whether creating a new account is an acceptable answer.
    #[serde(default)]
    pub allow_create: bool,
    /// Set when the answer asked for a new account.
    #[serde(default)]
    pub do_create: bool,
}

impl AccountSelection {
    /// Builds the id for a selection on one application.
    ///
    /// The discriminator is the assignment id for role-driven requests and
    /// the requested attribute set otherwise, so a recompilation of the
    /// same master plan lands on the same question.
    #[must_use]
    pub fn question_id(application: &str, instance: Option<&str>, discriminator: &str) -> String {
        format!(
            "account:{application}:{}:{discriminator}",
            instance.unwrap_or_default()
        )
    }

    /// Creates an unanswered selection.
    #[must_use]
    pub fn new(
        application: impl Into<String>,
        instance: Option<String>,
        discriminator: &str,
        candidates: Vec<String>,
    ) -> Self {
        let application = application.into();
        Self {
            id: Self::question_id(application.as_str(), instance.as_deref(), discriminator),
            application,
            instance,
            role_name: None,
            assignment_id: None,
            candidates,
            selected: Vec::new(),
            answered: false,
            allow_create: false,
            do_create: false,
        }
    }

    /// Sets the role context.
    #[must_use]
    pub fn with_role(mut self, role_name: impl Into<String>, assignment_id: Option<String>) -> Self {
        self.role_name = Some(role_name.into());
        self.assignment_id = assignment_id;
        self
    }

    /// Allows a new account as an answer.
    #[must_use]
    pub fn allowing_create(mut self) -> Self {
        self.allow_create = true;
        self
    }
}

/// Pending value for a required account template field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFieldQuestion {
    /// Deterministic id, stable across recompilations.
    pub id: String,
    /// Application of the template.
    pub application: String,
    /// Application instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Template field name.
    pub field: String,
    /// Prompt shown to whoever answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Answer value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
}

impl TemplateFieldQuestion {
    /// Creates an unanswered field question.
    #[must_use]
    pub fn new(
        application: impl Into<String>,
        instance: Option<String>,
        field: impl Into<String>,
        prompt: Option<String>,
    ) -> Self {
        let application = application.into();
        let field = field.into();
        Self {
            id: format!(
                "field:{application}:{}:{field}",
                instance.as_deref().unwrap_or_default()
            ),
            application,
            instance,
            field,
            prompt,
            answer: None,
        }
    }
}
