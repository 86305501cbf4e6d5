use std::sync::Arc;

use chrono::{DateTime, Utc};
use provisio_core::{AppResult, Requester};
use provisio_domain::{CompilerOptions, Plan, Project};
use tracing::{info, warn};

use crate::identity_reconciler::IdentityOutcome;
use crate::plan_compiler::PlanCompiler;
use crate::plan_evaluator::PlanEvaluator;
use crate::provisioning_ports::{RetryScheduler, RetryTask};

/// Project after one provisioning call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningReport {
    /// Compiled, and possibly executed, project.
    pub project: Project,
    /// Identity outcome, absent when nothing was executed.
    pub outcome: Option<IdentityOutcome>,
}

impl ProvisioningReport {
    /// Returns whether the project waits for answers before it can run.
    #[must_use]
    pub fn needs_answers(&self) -> bool {
        self.project.has_unanswered_questions()
    }
}

/// Compile-then-execute facade over the compiler and the evaluator.
#[derive(Clone)]
pub struct ProvisioningService {
    compiler: PlanCompiler,
    evaluator: PlanEvaluator,
    retry_scheduler: Arc<dyn RetryScheduler>,
}

impl ProvisioningService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        compiler: PlanCompiler,
        evaluator: PlanEvaluator,
        retry_scheduler: Arc<dyn RetryScheduler>,
    ) -> Self {
        Self {
            compiler,
            evaluator,
            retry_scheduler,
        }
    }

    /// Compiles a master plan; options come from its arguments.
    pub async fn compile(
        &self,
        identity_name: &str,
        mut master_plan: Plan,
        requester: &Requester,
    ) -> AppResult<Project> {
        let options = CompilerOptions::from_arguments(&master_plan.arguments)?;
        if !master_plan
            .requesters
            .iter()
            .any(|name| name == requester.name())
        {
            master_plan.requesters.push(requester.name().to_owned());
        }
        self.compiler
            .compile(identity_name, master_plan, options)
            .await
    }

    /// Compiles and, unless questions are open, executes a master plan.
    pub async fn provision(
        &self,
        identity_name: &str,
        master_plan: Plan,
        requester: &Requester,
    ) -> AppResult<ProvisioningReport> {
        let project = self.compile(identity_name, master_plan, requester).await?;
        self.execute_when_ready(project, requester).await
    }

    /// Recompiles a project after its questions were answered and executes it.
    pub async fn resume(
        &self,
        project: Project,
        requester: &Requester,
    ) -> AppResult<ProvisioningReport> {
        let project = self.compiler.recompile(project).await?;
        self.execute_when_ready(project, requester).await
    }

    async fn execute_when_ready(
        &self,
        mut project: Project,
        requester: &Requester,
    ) -> AppResult<ProvisioningReport> {
        if project.has_unanswered_questions() {
            info!(
                identity = %project.identity_name,
                questions = project.questions.len(),
                "project waits for answers"
            );
            return Ok(ProvisioningReport {
                project,
                outcome: None,
            });
        }

        let outcome = self.evaluator.execute(&mut project, requester).await?;
        Ok(ProvisioningReport { project, outcome })
    }

    /// Executes the reduced plan of a retry task without recompiling.
    pub async fn run_retry_task(
        &self,
        task: RetryTask,
        requester: &Requester,
    ) -> AppResult<ProvisioningReport> {
        info!(
            identity = %task.identity_name,
            integration = %task.integration,
            task_id = %task.id,
            attempt = task.attempt,
            "running retry task"
        );
        let mut project = Project::new(
            task.identity_name.as_str(),
            task.plan.clone(),
            task.options.clone(),
        );
        let mut plan = task.plan;
        plan.target_integration = Some(task.integration);
        project.plans.push(plan);

        let outcome = self
            .evaluator
            .execute_attempt(&mut project, requester, task.attempt)
            .await?;
        Ok(ProvisioningReport { project, outcome })
    }

    /// Runs every retry task due at `now` and returns how many ran.
    ///
    /// A failing task is logged and does not stop the others.
    pub async fn run_due_retries(
        &self,
        now: DateTime<Utc>,
        requester: &Requester,
    ) -> AppResult<usize> {
        let tasks = self.retry_scheduler.take_due(now).await?;
        let mut executed = 0;
        for task in tasks {
            let task_id = task.id.clone();
            match self.run_retry_task(task, requester).await {
                Ok(_) => executed += 1,
                Err(error) => warn!(task_id = %task_id, error = %error, "retry task failed"),
            }
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests;
