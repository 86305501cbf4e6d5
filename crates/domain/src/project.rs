use chrono::{DateTime, Utc};
use provisio_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::options::CompilerOptions;
use crate::plan::Plan;
use crate::provenance::{ExpansionItem, FilteredValue};
use crate::question::Question;
use crate::request::{GenericRequest, GenericRequestKind, RequestKey};
use crate::result::ProvisioningStatus;

mod itemize;

/// Dated change held back from compilation until its date is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredRequest {
    /// Application name.
    pub application: String,
    /// Application instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Native identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_identity: Option<String>,
    /// Attribute or permission.
    pub kind: GenericRequestKind,
    /// The dated change.
    pub request: GenericRequest,
}

impl DeferredRequest {
    /// Wraps a dated change of the keyed entity.
    #[must_use]
    pub fn new(key: &RequestKey, kind: GenericRequestKind, request: GenericRequest) -> Self {
        Self {
            application: key.application.clone(),
            instance: key.instance.clone(),
            native_identity: key.native_identity.clone(),
            kind,
            request,
        }
    }

    /// Returns when the change becomes due.
    #[must_use]
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.request.add_date.or(self.request.remove_date)
    }
}

/// Compiled aggregate of one master plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Subject identity name.
    pub identity_name: String,
    /// Uncompiled change request.
    pub master_plan: Plan,
    /// Plans executed by integrations, one per integration.
    #[serde(default)]
    pub plans: Vec<Plan>,
    /// Changes to the identity record itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_plan: Option<Plan>,
    /// Changes no integration manages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmanaged_plan: Option<Plan>,
    /// Compilation and execution options.
    #[serde(default)]
    pub options: CompilerOptions,
    /// Questions of the current compilation.
    #[serde(default)]
    pub questions: Vec<Question>,
    /// Answered questions of earlier compilations.
    #[serde(default)]
    pub question_history: Vec<Question>,
    /// Provenance of derived requests.
    #[serde(default)]
    pub expansion_items: Vec<ExpansionItem>,
    /// Values removed during compilation.
    #[serde(default)]
    pub filtered: Vec<FilteredValue>,
    /// Dated backend changes held back from this compilation.
    #[serde(default)]
    pub deferred_requests: Vec<DeferredRequest>,
}

impl Project {
    /// Creates an uncompiled project.
    #[must_use]
    pub fn new(identity_name: impl Into<String>, master_plan: Plan, options: CompilerOptions) -> Self {
        Self {
            identity_name: identity_name.into(),
            master_plan,
            plans: Vec::new(),
            identity_plan: None,
            unmanaged_plan: None,
            options,
            questions: Vec::new(),
            question_history: Vec::new(),
            expansion_items: Vec::new(),
            filtered: Vec::new(),
            deferred_requests: Vec::new(),
        }
    }

    /// Returns the plan of one integration.
    #[must_use]
    pub fn integration_plan(&self, integration: &str) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|plan| plan.target_integration.as_deref() == Some(integration))
    }

    /// Returns the plan of one integration for mutation.
    pub fn integration_plan_mut(&mut self, integration: &str) -> Option<&mut Plan> {
        self.plans
            .iter_mut()
            .find(|plan| plan.target_integration.as_deref() == Some(integration))
    }

    /// Returns the plan of one integration, creating it when missing.
    pub fn intern_plan(&mut self, integration: &str) -> &mut Plan {
        let position = match self
            .plans
            .iter()
            .position(|plan| plan.target_integration.as_deref() == Some(integration))
        {
            Some(position) => position,
            None => {
                self.plans.push(
                    Plan::for_integration(integration).with_identity_name(self.identity_name.clone()),
                );
                self.plans.len() - 1
            }
        };
        &mut self.plans[position]
    }

    /// Returns the identity plan, creating it when missing.
    pub fn intern_identity_plan(&mut self) -> &mut Plan {
        let identity_name = self.identity_name.clone();
        self.identity_plan
            .get_or_insert_with(|| Plan::new().with_identity_name(identity_name))
    }

    /// Returns the unmanaged plan, creating it when missing.
    pub fn intern_unmanaged_plan(&mut self) -> &mut Plan {
        let identity_name = self.identity_name.clone();
        self.unmanaged_plan
            .get_or_insert_with(|| Plan::new().with_identity_name(identity_name))
    }

    /// Iterates every compiled plan.
    pub fn all_plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans
            .iter()
            .chain(self.identity_plan.iter())
            .chain(self.unmanaged_plan.iter())
    }

    /// Iterates every compiled plan for mutation.
    pub fn all_plans_mut(&mut self) -> impl Iterator<Item = &mut Plan> {
        self.plans
            .iter_mut()
            .chain(self.identity_plan.iter_mut())
            .chain(self.unmanaged_plan.iter_mut())
    }

    /// Returns whether any question still needs an answer.
    #[must_use]
    pub fn has_unanswered_questions(&self) -> bool {
        self.questions.iter().any(|question| !question.is_answered())
    }

    /// Returns a question of this compilation or, failing that, an answered one from history.
    #[must_use]
    pub fn find_question(&self, id: &str) -> Option<&Question> {
        self.questions
            .iter()
            .find(|question| question.id() == id)
            .or_else(|| {
                self.question_history
                    .iter()
                    .find(|question| question.id() == id)
            })
    }

    /// Adds a question unless one with the same id exists.
    ///
    /// An answered question from history is brought back instead of asking again.
    pub fn add_question(&mut self, question: Question) {
        if self
            .questions
            .iter()
            .any(|existing| existing.id() == question.id())
        {
            return;
        }

        let answered = self
            .question_history
            .iter()
            .find(|existing| existing.id() == question.id() && existing.is_answered())
            .cloned();
        self.questions.push(answered.unwrap_or(question));
    }

    /// Records the accounts chosen for an account selection.
    pub fn answer_account_selection(&mut self, id: &str, selected: Vec<String>) -> AppResult<()> {
        let question = self.question_mut(id)?;
        let Question::AccountSelection(selection) = question else {
            return Err(AppError::Validation(format!(
                "question '{id}' is not an account selection"
            )));
        };

        if let Some(unknown) = selected
            .iter()
            .find(|native_identity| !selection.candidates.contains(native_identity))
        {
            return Err(AppError::Validation(format!(
                "account '{unknown}' is not a candidate of question '{id}'"
            )));
        }
        if selected.is_empty() && !selection.allow_create {
            return Err(AppError::Validation(format!(
                "question '{id}' requires at least one account"
            )));
        }

        selection.do_create = selected.is_empty();
        selection.selected = selected;
        selection.answered = true;
        Ok(())
    }

    /// Records the value of a template field.
    pub fn answer_template_field(&mut self, id: &str, value: Value) -> AppResult<()> {
        let question = self.question_mut(id)?;
        let Question::TemplateField(field) = question else {
            return Err(AppError::Validation(format!(
                "question '{id}' is not a template field"
            )));
        };
        if value.is_null() {
            return Err(AppError::Validation(format!(
                "question '{id}' needs a value"
            )));
        }

        field.answer = Some(value);
        Ok(())
    }

    fn question_mut(&mut self, id: &str) -> AppResult<&mut Question> {
        self.questions
            .iter_mut()
            .find(|question| question.id() == id)
            .ok_or_else(|| AppError::NotFound(format!("question '{id}' does not exist")))
    }

    /// Records values removed during compilation.
    pub fn log_filtered(&mut self, filtered: impl IntoIterator<Item = FilteredValue>) {
        self.filtered.extend(filtered);
    }

    /// Records a provenance item unless the same change is already recorded.
    ///
    /// An item recorded before its account was selected picks up the native
    /// identity of a later identical item.
    pub fn add_expansion_item(&mut self, item: ExpansionItem) {
        if self
            .expansion_items
            .iter()
            .any(|existing| existing.same_change(&item, false))
        {
            return;
        }

        if let Some(existing) = self.expansion_items.iter_mut().find(|existing| {
            existing.native_identity.is_none() && existing.same_change(&item, true)
        }) {
            existing.native_identity = item.native_identity;
            return;
        }

        self.expansion_items.push(item);
    }

    /// Discards every computed result before a recompilation.
    ///
    /// Answered questions move to the history, replacing older answers to
    /// the same question. Unanswered questions are dropped and asked again.
    pub fn reset_compilation(&mut self) {
        for question in std::mem::take(&mut self.questions) {
            if !question.is_answered() {
                continue;
            }
            self.question_history
                .retain(|existing| existing.id() != question.id());
            self.question_history.push(question);
        }

        self.plans.clear();
        self.identity_plan = None;
        self.unmanaged_plan = None;
        self.expansion_items.clear();
        self.filtered.clear();
        self.deferred_requests.clear();
    }

    /// Returns whether anything is left to do after execution.
    ///
    /// Unanswered questions and requests waiting for a retry count.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.has_unanswered_questions()
            || self.all_plans().any(|plan| {
                plan.requests.iter().any(|request| {
                    plan.effective_result(request, None)
                        .is_some_and(|result| result.status == ProvisioningStatus::Retry)
                        || request.all_generic_requests().any(|(_, generic)| {
                            plan.effective_result(request, Some(generic))
                                .is_some_and(|result| result.status == ProvisioningStatus::Retry)
                        })
                })
            })
    }
}
