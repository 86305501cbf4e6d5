use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use provisio_core::AppResult;
use provisio_domain::identity_attributes::{IDENTITY_APPLICATION, PASSWORD};
use provisio_domain::{
    AbstractRequest, AttributeOperation, CompilerOption, CompilerOptions, GenericRequest,
    Identity, IntegrationConfig, Link, MaintenanceWindow, Plan, Project, ProvisioningStatus,
    arguments,
};

use crate::identity_reconciler::IdentityOutcome;
use crate::provisioning_ports::{DependencyEvaluator, ProvisioningAuditKind};
use crate::test_support::{FakeCatalog, FakeExecutor, FakeIdentityStore, Harness, requester};

use super::plan_status;

/// Required applications keyed by the application a plan touches.
struct FakeDependencies(HashMap<String, Vec<String>>);

#[async_trait]
impl DependencyEvaluator for FakeDependencies {
    async fn required_applications(&self, plan: &Plan) -> AppResult<Vec<String>> {
        Ok(plan
            .requests
            .iter()
            .filter_map(|request| self.0.get(request.application.as_str()))
            .flatten()
            .cloned()
            .collect())
    }
}

fn alice() -> AppResult<Identity> {
    Ok(Identity::new("alice")?
        .with_link(Link::new("AD", "cn=alice"))
        .with_link(Link::new("SAP", "alice01")))
}

fn harness_with(catalog: FakeCatalog, executor: FakeExecutor) -> AppResult<Harness> {
    Ok(Harness::new(
        FakeIdentityStore::default().with_identity(alice()?),
        catalog,
        executor,
    ))
}

fn ad_catalog() -> AppResult<FakeCatalog> {
    Ok(FakeCatalog::default()
        .with_integration(IntegrationConfig::new("ad-connector", "fake")?.managing("AD")))
}

fn ad_plan() -> AppResult<Plan> {
    Ok(Plan::for_integration("ad-connector").with_request(
        AbstractRequest::account("AD")?
            .with_native_identity("cn=alice")
            .with_attribute(GenericRequest::new(
                "groups",
                AttributeOperation::Add,
                Some(json!(["G1"])),
            )),
    ))
}

fn sap_plan() -> AppResult<Plan> {
    Ok(Plan::for_integration("sap-connector").with_request(
        AbstractRequest::account("SAP")?
            .with_native_identity("alice01")
            .with_attribute(GenericRequest::new(
                "roles",
                AttributeOperation::Add,
                Some(json!(["Z_BASIS"])),
            )),
    ))
}

fn project(plans: Vec<Plan>, options: CompilerOptions) -> AppResult<Project> {
    let mut project = Project::new("alice", Plan::new(), options);
    project.plans = plans;
    project.identity_plan = Some(
        Plan::new().with_request(
            AbstractRequest::account(IDENTITY_APPLICATION)?
                .with_native_identity("alice")
                .with_attribute(GenericRequest::new(
                    "department",
                    AttributeOperation::Set,
                    Some(json!("sales")),
                )),
        ),
    );
    Ok(project)
}

fn status_of(project: &Project, integration: &str) -> Option<ProvisioningStatus> {
    project.integration_plan(integration).and_then(plan_status)
}

fn first_error(project: &Project, integration: &str) -> String {
    project
        .integration_plan(integration)
        .and_then(|plan| plan.requests[0].result.as_ref())
        .and_then(|result| result.errors.first().cloned())
        .unwrap_or_default()
}

#[tokio::test]
async fn retry_on_one_integration_leaves_the_others_committed() -> AppResult<()> {
    let catalog = ad_catalog()?
        .with_integration(IntegrationConfig::new("sap-connector", "flaky")?.managing("SAP"));
    let harness = harness_with(catalog, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let evaluator = harness
        .evaluator()
        .with_executor("flaky", Arc::new(FakeExecutor::new(ProvisioningStatus::Retry)));
    let mut project = project(vec![ad_plan()?, sap_plan()?], CompilerOptions::new())?;

    let outcome = evaluator.execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Committed));
    assert_eq!(status_of(&project, "sap-connector"), Some(ProvisioningStatus::Retry));

    let tasks = harness.retries.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].integration, "sap-connector");
    assert_eq!(tasks[0].attempt, 2);
    assert!(tasks[0].not_before > Utc::now());
    assert_eq!(tasks[0].plan.requests[0].application, "SAP");

    let identity = match outcome {
        Some(IdentityOutcome::Committed(identity)) => identity,
        other => unreachable!("unexpected outcome {other:?}"),
    };
    assert_eq!(identity.attribute("department"), Some(&json!("sales")));

    let kinds = harness.audit.kinds().await;
    assert!(kinds.contains(&ProvisioningAuditKind::ProvisioningCommitted));
    assert!(kinds.contains(&ProvisioningAuditKind::ProvisioningRetried));
    Ok(())
}

#[tokio::test]
async fn active_maintenance_window_defers_the_plan() -> AppResult<()> {
    let until = Utc::now() + Duration::hours(2);
    let catalog = FakeCatalog::default().with_integration(
        IntegrationConfig::new("ad-connector", "fake")?
            .managing("AD")
            .with_maintenance(MaintenanceWindow::Until(until)),
    );
    let harness = harness_with(catalog, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let mut project = project(vec![ad_plan()?], CompilerOptions::new())?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Retry));
    assert!(harness.executor.received().await.is_empty());
    let tasks = harness.retries.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].not_before, until);
    Ok(())
}

#[tokio::test]
async fn maintenance_window_fails_without_retries() -> AppResult<()> {
    let catalog = FakeCatalog::default().with_integration(
        IntegrationConfig::new("ad-connector", "fake")?
            .managing("AD")
            .with_maintenance(MaintenanceWindow::Permanent),
    );
    let harness = harness_with(catalog, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let mut project = project(
        vec![ad_plan()?],
        CompilerOptions::new().with(CompilerOption::NoMaintenanceWindowRetry),
    )?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Failed));
    assert!(first_error(&project, "ad-connector").contains("maintenance"));
    assert!(harness.retries.tasks().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn executor_errors_fail_only_their_plan() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::failing())?;
    let mut project = project(vec![ad_plan()?], CompilerOptions::new())?;

    let outcome = harness.evaluator().execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Failed));
    assert!(first_error(&project, "ad-connector").contains("connector offline"));
    assert!(matches!(outcome, Some(IdentityOutcome::Committed(_))));
    assert!(
        harness
            .audit
            .kinds()
            .await
            .contains(&ProvisioningAuditKind::ProvisioningFailed)
    );
    assert!(harness.retries.tasks().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_executor_or_integration_fails_the_plan() -> AppResult<()> {
    let catalog = ad_catalog()?
        .with_integration(IntegrationConfig::new("sap-connector", "rfc")?.managing("SAP"));
    let harness = harness_with(catalog, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let mut ghost = ad_plan()?;
    ghost.target_integration = Some("ghost".to_owned());
    let mut project = project(vec![sap_plan()?, ghost], CompilerOptions::new())?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "sap-connector"), Some(ProvisioningStatus::Failed));
    assert!(first_error(&project, "sap-connector").contains("no executor 'rfc'"));
    assert_eq!(status_of(&project, "ghost"), Some(ProvisioningStatus::Failed));
    assert!(first_error(&project, "ghost").contains("unknown integration"));
    Ok(())
}

#[tokio::test]
async fn no_link_update_executes_nothing() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let mut project = project(
        vec![ad_plan()?],
        CompilerOptions::new().with(CompilerOption::NoLinkUpdate),
    )?;

    let outcome = harness.evaluator().execute(&mut project, &requester()).await?;

    assert!(outcome.is_none());
    assert!(harness.executor.received().await.is_empty());
    assert_eq!(harness.store.saves().await, 0);
    assert_eq!(status_of(&project, "ad-connector"), None);
    Ok(())
}

#[tokio::test]
async fn simulation_skips_backends_and_saves_nothing() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let mut project = project(
        vec![ad_plan()?],
        CompilerOptions::new().with(CompilerOption::SimulateProvisioning),
    )?;

    let outcome = harness.evaluator().execute(&mut project, &requester()).await?;

    assert!(matches!(outcome, Some(IdentityOutcome::Committed(_))));
    assert!(harness.executor.received().await.is_empty());
    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Committed));
    assert_eq!(harness.store.saves().await, 0);
    assert!(harness.pending.records().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn unmanaged_work_is_queued_and_link_edits_commit() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let mut edit = AbstractRequest::account("AD")?
        .with_native_identity("cn=alice")
        .with_attribute(GenericRequest::new(
            "description",
            AttributeOperation::Set,
            Some(json!("contractor")),
        ));
    edit.arguments
        .insert(arguments::LINK_EDIT.to_owned(), json!(true));
    let manual = AbstractRequest::account("Badge")?
        .with_native_identity("B-17")
        .with_attribute(GenericRequest::new(
            "zones",
            AttributeOperation::Add,
            Some(json!(["lab"])),
        ));
    let mut project = project(Vec::new(), CompilerOptions::new())?;
    project.unmanaged_plan = Some(Plan::new().with_request(edit).with_request(manual));

    harness.evaluator().execute(&mut project, &requester()).await?;

    let unmanaged = project.unmanaged_plan.unwrap_or_else(|| unreachable!());
    let edit_result = unmanaged.requests[0].result.clone().unwrap_or_else(|| unreachable!());
    assert_eq!(edit_result.status, ProvisioningStatus::Committed);
    let manual_result = unmanaged.requests[1].result.clone().unwrap_or_else(|| unreachable!());
    assert_eq!(manual_result.status, ProvisioningStatus::Queued);
    assert_eq!(manual_result.warnings, vec!["manual".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn committed_account_passwords_reach_link_history() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let plan = Plan::for_integration("ad-connector").with_request(
        AbstractRequest::account("AD")?
            .with_native_identity("cn=alice")
            .with_attribute(
                GenericRequest::new(PASSWORD, AttributeOperation::Set, Some(json!("enc:pw")))
                    .with_argument(arguments::SECRET, json!(true)),
            ),
    );
    let mut project = project(vec![plan], CompilerOptions::new())?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    let sent = harness.executor.received().await;
    let sent_password = sent[0].requests[0]
        .attribute(PASSWORD)
        .and_then(|generic| generic.value.clone());
    assert_eq!(sent_password, Some(json!("pw")));

    let kept_password = project
        .integration_plan("ad-connector")
        .and_then(|plan| plan.requests[0].attribute(PASSWORD))
        .and_then(|generic| generic.value.clone());
    assert_eq!(kept_password, Some(json!("enc:pw")));

    let stored = harness
        .store
        .identity("alice")
        .await
        .unwrap_or_else(|| unreachable!());
    let link = stored
        .find_link("AD", None, "cn=alice")
        .unwrap_or_else(|| unreachable!());
    assert_eq!(link.password_history, vec!["hash:pw".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn plan_initializer_failure_fails_that_plan() -> AppResult<()> {
    let mut failing = IntegrationConfig::new("ad-connector", "fake")?.managing("AD");
    failing.plan_initializer = Some("fail".to_owned());
    let mut echoing = IntegrationConfig::new("sap-connector", "fake")?.managing("SAP");
    echoing.plan_initializer = Some("plan".to_owned());
    let catalog = FakeCatalog::default()
        .with_integration(failing)
        .with_integration(echoing);
    let harness = harness_with(catalog, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let mut project = project(vec![ad_plan()?, sap_plan()?], CompilerOptions::new())?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Failed));
    assert!(first_error(&project, "ad-connector").contains("plan initializer failed"));
    assert_eq!(status_of(&project, "sap-connector"), Some(ProvisioningStatus::Committed));
    let sent = harness.executor.received().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target_integration.as_deref(), Some("sap-connector"));
    Ok(())
}

#[tokio::test]
async fn failed_dependency_blocks_dependent_plans() -> AppResult<()> {
    let catalog = FakeCatalog::default()
        .with_integration(IntegrationConfig::new("ad-connector", "broken")?.managing("AD"))
        .with_integration(IntegrationConfig::new("sap-connector", "fake")?.managing("SAP"));
    let harness = harness_with(catalog, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let dependencies = FakeDependencies(HashMap::from([(
        "SAP".to_owned(),
        vec!["AD".to_owned()],
    )]));
    let evaluator = harness
        .evaluator()
        .with_executor("broken", Arc::new(FakeExecutor::failing()))
        .with_dependency_evaluator(Arc::new(dependencies));
    let mut project = project(vec![sap_plan()?, ad_plan()?], CompilerOptions::new())?;

    evaluator.execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Failed));
    assert_eq!(status_of(&project, "sap-connector"), Some(ProvisioningStatus::Failed));
    assert!(first_error(&project, "sap-connector").contains("a required integration failed"));
    assert!(harness.executor.received().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_required_account_fails_the_plan() -> AppResult<()> {
    let catalog = ad_catalog()?;
    let harness = harness_with(catalog, FakeExecutor::new(ProvisioningStatus::Committed))?;
    let dependencies = FakeDependencies(HashMap::from([(
        "AD".to_owned(),
        vec!["HR".to_owned()],
    )]));
    let evaluator = harness
        .evaluator()
        .with_dependency_evaluator(Arc::new(dependencies));
    let mut project = project(vec![ad_plan()?], CompilerOptions::new())?;

    evaluator.execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Failed));
    assert!(first_error(&project, "ad-connector").contains("no account on required application 'HR'"));
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_are_failed_instead_of_rescheduled() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::new(ProvisioningStatus::Retry))?;
    let evaluator = harness.evaluator();
    let attempts = evaluator.settings().max_retry_attempts;
    let mut project = project(vec![ad_plan()?], CompilerOptions::new())?;

    evaluator
        .execute_attempt(&mut project, &requester(), attempts)
        .await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Failed));
    assert!(harness.retries.tasks().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn disabled_retry_requests_schedule_nothing() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::new(ProvisioningStatus::Retry))?;
    let mut project = project(
        vec![ad_plan()?],
        CompilerOptions::new().with(CompilerOption::DisableRetryRequest),
    )?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Retry));
    assert!(harness.retries.tasks().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn optimistic_provisioning_commits_queued_work() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::new(ProvisioningStatus::Queued))?;
    let mut project = project(
        vec![ad_plan()?],
        CompilerOptions::new().with(CompilerOption::OptimisticProvisioning),
    )?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Committed));
    Ok(())
}

#[tokio::test]
async fn submitted_plans_are_recorded_as_pending() -> AppResult<()> {
    let harness = harness_with(ad_catalog()?, FakeExecutor::new(ProvisioningStatus::Queued))?;
    let mut project = project(vec![ad_plan()?], CompilerOptions::new())?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    let records = harness.pending.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identity_name, "alice");
    assert_eq!(records[0].integration, "ad-connector");
    assert!(records[0].expiration > Utc::now() + Duration::hours(23));
    Ok(())
}

#[tokio::test]
async fn retried_work_survives_failures_in_the_same_plan() -> AppResult<()> {
    let harness = harness_with(
        ad_catalog()?,
        FakeExecutor::with_statuses(vec![ProvisioningStatus::Failed, ProvisioningStatus::Retry]),
    )?;
    let plan = ad_plan()?.with_request(
        AbstractRequest::account("AD")?
            .with_native_identity("cn=alice-admin")
            .with_attribute(GenericRequest::new(
                "groups",
                AttributeOperation::Add,
                Some(json!(["Domain Admins"])),
            )),
    );
    let mut project = project(vec![plan], CompilerOptions::new())?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    assert_eq!(status_of(&project, "ad-connector"), Some(ProvisioningStatus::Failed));

    let tasks = harness.retries.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].plan.requests.len(), 1);
    assert_eq!(
        tasks[0].plan.requests[0].native_identity.as_deref(),
        Some("cn=alice-admin")
    );

    let records = harness.pending.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].plan.requests.len(), 1);
    assert_eq!(
        records[0].plan.requests[0].native_identity.as_deref(),
        Some("cn=alice-admin")
    );
    Ok(())
}

#[tokio::test]
async fn plans_where_every_account_failed_are_not_retried() -> AppResult<()> {
    let harness = harness_with(
        ad_catalog()?,
        FakeExecutor::with_statuses(vec![ProvisioningStatus::Failed]),
    )?;
    let mut project = project(vec![ad_plan()?], CompilerOptions::new())?;

    harness.evaluator().execute(&mut project, &requester()).await?;

    assert!(harness.retries.tasks().await.is_empty());
    assert!(harness.pending.records().await.is_empty());
    Ok(())
}
