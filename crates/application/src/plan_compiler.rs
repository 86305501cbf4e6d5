use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use provisio_core::{
    AppError, AppResult, AssignmentId, NEW_ASSIGNMENT_PLACEHOLDER, is_temporary_assignment_id,
};
use provisio_domain::identity_attributes::{
    ASSIGNED_ROLES, DETECTED_ROLES, ROLE_ATTRIBUTES, is_identity_application,
    is_reserved_attribute,
};
use provisio_domain::{
    AbstractRequest, AccountOperation, AccountSelection, ApplicationDefinition,
    AttributeOperation, CompilerOption, CompilerOptions, DeferredRequest, ExpansionCause,
    ExpansionItem, FilterReason, FilteredValue, GenericRequest, GenericRequestKind, Identity,
    IntegrationConfig, Link, PendingRequest, Plan, Project, Question, RequestKey, RequestKind,
    RoleDefinition, TemplateFieldQuestion, TemplateUsage, TrackingIds, ValueMatcher, arguments,
    to_list, values_as_text,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::provisioning_ports::{
    ApplicationCatalog, IdentityStore, IntegrationConfigFinder, PendingRequestRepository,
    RoleCatalog, ScriptEvaluator,
};

mod accounts;
mod attribute_sync;
mod dependencies;
mod filter;
mod partition;
mod preclean;
mod role_expansion;
mod templates;

const GENERIC_KINDS: [GenericRequestKind; 2] =
    [GenericRequestKind::Attribute, GenericRequestKind::Permission];

/// Compiles master plans into per-integration plans.
///
/// Compilation runs a fixed sequence of phases against a fresh copy of the
/// master plan. Recompilation after interactive answers discards every
/// computed plan and runs all phases again.
#[derive(Clone)]
pub struct PlanCompiler {
    identity_store: Arc<dyn IdentityStore>,
    role_catalog: Arc<dyn RoleCatalog>,
    application_catalog: Arc<dyn ApplicationCatalog>,
    integration_finder: Arc<dyn IntegrationConfigFinder>,
    script_evaluator: Option<Arc<dyn ScriptEvaluator>>,
    pending_requests: Option<Arc<dyn PendingRequestRepository>>,
}

/// Plan slot a partitioned request lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlanTarget {
    Identity,
    Integration(String),
    Unmanaged,
}

/// Lookups and identity state shared by the phases of one compilation.
struct CompileContext {
    identity: Identity,
    integrations: Vec<IntegrationConfig>,
    applications: HashMap<String, Option<ApplicationDefinition>>,
    roles: HashMap<String, Option<RoleDefinition>>,
    now: DateTime<Utc>,
}

impl CompileContext {
    /// Integrations are sorted by name, so the first claim wins.
    fn target_for(&self, application: &str) -> PlanTarget {
        if is_identity_application(application) {
            return PlanTarget::Identity;
        }

        self.integrations
            .iter()
            .find(|integration| integration.manages(application))
            .map_or(PlanTarget::Unmanaged, |integration| {
                PlanTarget::Integration(integration.name.clone())
            })
    }

    fn integration(&self, name: &str) -> Option<&IntegrationConfig> {
        self.integrations
            .iter()
            .find(|integration| integration.name == name)
    }

    fn matcher(&self, application: &str) -> ValueMatcher {
        self.applications
            .get(application)
            .and_then(Option::as_ref)
            .map_or_else(ValueMatcher::exact, ApplicationDefinition::matcher)
    }

    fn is_composite(&self, application: &str) -> bool {
        self.applications
            .get(application)
            .and_then(Option::as_ref)
            .is_some_and(ApplicationDefinition::is_composite)
    }
}

impl PlanCompiler {
    /// Creates a compiler over the given catalogs.
    #[must_use]
    pub fn new(
        identity_store: Arc<dyn IdentityStore>,
        role_catalog: Arc<dyn RoleCatalog>,
        application_catalog: Arc<dyn ApplicationCatalog>,
        integration_finder: Arc<dyn IntegrationConfigFinder>,
    ) -> Self {
        Self {
            identity_store,
            role_catalog,
            application_catalog,
            integration_finder,
            script_evaluator: None,
            pending_requests: None,
        }
    }

    /// Adds the evaluator for sync transforms and template scripts.
    #[must_use]
    pub fn with_script_evaluator(mut self, script_evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        self.script_evaluator = Some(script_evaluator);
        self
    }

    /// Adds pending request filtering.
    #[must_use]
    pub fn with_pending_requests(
        mut self,
        pending_requests: Arc<dyn PendingRequestRepository>,
    ) -> Self {
        self.pending_requests = Some(pending_requests);
        self
    }

    /// Compiles a master plan for one identity into a fresh project.
    pub async fn compile(
        &self,
        identity_name: &str,
        master_plan: Plan,
        options: CompilerOptions,
    ) -> AppResult<Project> {
        let mut project = Project::new(identity_name, master_plan, options);
        self.run_phases(&mut project).await?;
        Ok(project)
    }

    /// Recompiles a project after questions were answered.
    ///
    /// Answered questions are kept in the history and every computed plan is
    /// rebuilt from the master plan.
    pub async fn recompile(&self, mut project: Project) -> AppResult<Project> {
        project.reset_compilation();
        self.run_phases(&mut project).await?;
        Ok(project)
    }

    async fn run_phases(&self, project: &mut Project) -> AppResult<()> {
        let mut context = self.load_context(project.identity_name.as_str()).await?;
        let options = project.options.clone();

        let mut master = project.master_plan.clone();
        preclean::preclean(&mut master, &options, context.now);
        preclean::normalize_assignment_ids(&mut master, &context.identity);
        project.master_plan = master.clone();

        self.partition_identity_plan(project, &master);

        let expand_roles = !options.is_enabled(CompilerOption::NoRoleExpansion);
        let roles = self.analyze_role_operations(project, &context);
        if expand_roles && !options.is_enabled(CompilerOption::NoRoleDeprovisioning) {
            self.expand_role_removes(project, &mut context, &roles)
                .await?;
        }

        self.partition(project, &master, &mut context).await?;

        if expand_roles && !options.is_enabled(CompilerOption::NoRoleProvisioning) {
            self.expand_role_adds(project, &mut context, &roles).await?;
        }
        if !options.is_enabled(CompilerOption::NoApplicationDependencies) {
            self.expand_dependencies(project, &mut context).await?;
        }
        if !options.is_enabled(CompilerOption::NoCompositeExpansion) {
            self.expand_composites(project, &mut context).await?;
        }
        if !options.is_enabled(CompilerOption::NoAttributeSyncExpansion) {
            self.expand_attribute_sync(project, &mut context).await?;
        }

        filter::scope(project);
        if !options.is_enabled(CompilerOption::NoFilteringRetains) {
            filter::filter_retains(project);
        }
        if !options.is_enabled(CompilerOption::NoApplicationTemplates) {
            self.expand_templates(project, &mut context).await?;
        }
        if !options.is_enabled(CompilerOption::NoFiltering) {
            filter::filter(project, &context);
            if !options.is_enabled(CompilerOption::NoPendingRequestFiltering) {
                self.filter_pending_requests(project, &context).await?;
            }
        }

        if project.has_unanswered_questions() {
            debug!(
                identity = %project.identity_name,
                "skipping cleanup while questions are unanswered"
            );
        } else {
            filter::cleanup(project);
        }
        propagate_metadata(project);

        info!(
            identity = %project.identity_name,
            plans = project.plans.len(),
            questions = project.questions.len(),
            filtered = project.filtered.len(),
            "plan compiled"
        );
        Ok(())
    }

    async fn load_context(&self, identity_name: &str) -> AppResult<CompileContext> {
        let identity = match self.identity_store.find_identity(identity_name).await? {
            Some(identity) => identity,
            None => Identity::new(identity_name)?,
        };

        let mut integrations = self.integration_finder.list_integrations().await?;
        integrations.sort_by(|left, right| left.name.cmp(&right.name));

        Ok(CompileContext {
            identity,
            integrations,
            applications: HashMap::new(),
            roles: HashMap::new(),
            now: Utc::now(),
        })
    }

    async fn application(
        &self,
        context: &mut CompileContext,
        name: &str,
    ) -> AppResult<Option<ApplicationDefinition>> {
        if let Some(cached) = context.applications.get(name) {
            return Ok(cached.clone());
        }

        let found = self.application_catalog.find_application(name).await?;
        context
            .applications
            .insert(name.to_owned(), found.clone());
        Ok(found)
    }

    async fn role(
        &self,
        context: &mut CompileContext,
        name: &str,
    ) -> AppResult<Option<RoleDefinition>> {
        if let Some(cached) = context.roles.get(name) {
            return Ok(cached.clone());
        }

        let found = self.role_catalog.find_role(name).await?;
        context.roles.insert(name.to_owned(), found.clone());
        Ok(found)
    }

    async fn matcher(
        &self,
        context: &mut CompileContext,
        application: &str,
    ) -> AppResult<ValueMatcher> {
        if is_identity_application(application) {
            return Ok(ValueMatcher::exact());
        }
        Ok(self
            .application(context, application)
            .await?
            .map_or_else(ValueMatcher::exact, |definition| definition.matcher()))
    }

    async fn run_script(
        &self,
        script: &str,
        arguments: Map<String, Value>,
    ) -> AppResult<Value> {
        let evaluator = self.script_evaluator.as_ref().ok_or_else(|| {
            AppError::Dependency(format!(
                "script '{script}' needs a script evaluator but none is configured"
            ))
        })?;
        evaluator.run(script, &arguments).await
    }
}

fn target_plan<'a>(project: &'a mut Project, target: &PlanTarget) -> &'a mut Plan {
    match target {
        PlanTarget::Identity => project.intern_identity_plan(),
        PlanTarget::Integration(name) => project.intern_plan(name.as_str()),
        PlanTarget::Unmanaged => project.intern_unmanaged_plan(),
    }
}

fn assimilate_into(
    project: &mut Project,
    target: &PlanTarget,
    request: &AbstractRequest,
    matcher: ValueMatcher,
) {
    let filtered = target_plan(project, target).assimilate(request, matcher);
    project.log_filtered(filtered);
}

fn record_expansion(
    project: &mut Project,
    request: &AbstractRequest,
    cause: ExpansionCause,
    source_info: &str,
) {
    for (kind, generic) in request.all_generic_requests() {
        for item in ExpansionItem::for_request(request, kind, generic, cause, source_info) {
            project.add_expansion_item(item);
        }
    }
}

/// Iterates the plans that go to integrations or stay unmanaged.
fn backend_plans_mut(project: &mut Project) -> impl Iterator<Item = &mut Plan> {
    project
        .plans
        .iter_mut()
        .chain(project.unmanaged_plan.iter_mut())
}

fn propagate_metadata(project: &mut Project) {
    let identity_name = project.identity_name.clone();
    let requesters = project.master_plan.requesters.clone();
    let source = project.master_plan.source.clone();
    let tracking_ids = project.master_plan.tracking_ids.clone();

    for plan in project.all_plans_mut() {
        plan.identity_name = Some(identity_name.clone());
        if plan.requesters.is_empty() {
            plan.requesters.clone_from(&requesters);
        }
        if plan.source.is_none() {
            plan.source.clone_from(&source);
        }
        plan.tracking_ids.merge(&tracking_ids);
    }
}

#[cfg(test)]
mod tests;
