use chrono::{Duration, Utc};
use serde_json::json;

use provisio_core::{AppResult, is_temporary_assignment_id};
use provisio_domain::identity_attributes::{ASSIGNED_ROLES, IDENTITY_APPLICATION};
use provisio_domain::{
    AbstractRequest, ApplicationDefinition, AttributeOperation, CompilerOption, CompilerOptions,
    EntitlementProfile, GenericRequest, Identity, IntegrationConfig, Link, Plan,
    ProvisioningStatus, RoleDefinition,
};

use crate::identity_reconciler::IdentityOutcome;
use crate::provisioning_ports::{RetryScheduler, RetryTask};
use crate::test_support::{FakeCatalog, FakeExecutor, FakeIdentityStore, Harness, requester};

use super::ProvisioningService;

fn harness(identity: Identity) -> AppResult<Harness> {
    let catalog = FakeCatalog::default()
        .with_application(ApplicationDefinition::new("AD")?)
        .with_integration(IntegrationConfig::new("ad-connector", "fake")?.managing("AD"))
        .with_role(
            RoleDefinition::new("R")?
                .with_profile(EntitlementProfile::attribute("AD", "groups", ["G1"])),
        );
    Ok(Harness::new(
        FakeIdentityStore::default().with_identity(identity),
        catalog,
        FakeExecutor::new(ProvisioningStatus::Committed),
    ))
}

fn service(harness: &Harness) -> ProvisioningService {
    ProvisioningService::new(
        harness.compiler(),
        harness.evaluator(),
        harness.retries.clone(),
    )
}

fn add_role(role_name: &str) -> AppResult<Plan> {
    Ok(Plan::new().with_request(
        AbstractRequest::account(IDENTITY_APPLICATION)?.with_attribute(GenericRequest::new(
            ASSIGNED_ROLES,
            AttributeOperation::Add,
            Some(json!(role_name)),
        )),
    ))
}

fn retry_plan() -> AppResult<Plan> {
    Ok(Plan::for_integration("ad-connector").with_request(
        AbstractRequest::account("AD")?
            .with_native_identity("cn=alice")
            .with_attribute(GenericRequest::new(
                "groups",
                AttributeOperation::Add,
                Some(json!(["G2"])),
            )),
    ))
}

#[tokio::test]
async fn provision_compiles_executes_and_commits_the_assignment() -> AppResult<()> {
    let harness = harness(Identity::new("alice")?.with_link(Link::new("AD", "cn=alice")))?;

    let report = service(&harness)
        .provision("alice", add_role("R")?, &requester())
        .await?;

    assert!(!report.needs_answers());
    assert_eq!(report.project.master_plan.requesters, vec!["spadmin".to_owned()]);
    let sent = harness.executor.received().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target_integration.as_deref(), Some("ad-connector"));

    let identity = match report.outcome {
        Some(IdentityOutcome::Committed(identity)) => identity,
        other => unreachable!("unexpected outcome {other:?}"),
    };
    let assignment = identity
        .role_assignments
        .first_for_role("R")
        .unwrap_or_else(|| unreachable!());
    assert!(!is_temporary_assignment_id(assignment.assignment_id.as_str()));
    Ok(())
}

#[tokio::test]
async fn open_questions_hold_execution_until_resumed() -> AppResult<()> {
    let harness = harness(
        Identity::new("alice")?
            .with_link(Link::new("AD", "cn=a1"))
            .with_link(Link::new("AD", "cn=a2")),
    )?;
    let service = service(&harness);

    let report = service
        .provision("alice", add_role("R")?, &requester())
        .await?;

    assert!(report.needs_answers());
    assert!(report.outcome.is_none());
    assert!(harness.executor.received().await.is_empty());

    let mut project = report.project;
    let question_id = project.questions[0].id().to_owned();
    project.answer_account_selection(question_id.as_str(), vec!["cn=a2".to_owned()])?;
    let report = service.resume(project, &requester()).await?;

    assert!(!report.needs_answers());
    assert!(matches!(report.outcome, Some(IdentityOutcome::Committed(_))));
    let sent = harness.executor.received().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].requests[0].native_identity.as_deref(), Some("cn=a2"));
    Ok(())
}

#[tokio::test]
async fn master_plan_arguments_become_compiler_options() -> AppResult<()> {
    let harness = harness(Identity::new("alice")?.with_link(Link::new("AD", "cn=alice")))?;
    let master = add_role("R")?.with_argument(
        CompilerOption::SimulateProvisioning.as_str(),
        json!(true),
    );

    let report = service(&harness)
        .provision("alice", master, &requester())
        .await?;

    assert!(
        report
            .project
            .options
            .is_enabled(CompilerOption::SimulateProvisioning)
    );
    assert!(harness.executor.received().await.is_empty());
    assert_eq!(harness.store.saves().await, 0);
    Ok(())
}

#[tokio::test]
async fn due_retries_run_and_later_ones_wait() -> AppResult<()> {
    let harness = harness(Identity::new("alice")?.with_link(Link::new("AD", "cn=alice")))?;
    let now = Utc::now();
    let mut due = RetryTask::new(
        "alice",
        "ad-connector",
        retry_plan()?,
        CompilerOptions::new(),
        now - Duration::minutes(5),
    );
    due.attempt = 2;
    harness.retries.schedule(due).await?;
    harness
        .retries
        .schedule(RetryTask::new(
            "alice",
            "ad-connector",
            retry_plan()?,
            CompilerOptions::new(),
            now + Duration::hours(1),
        ))
        .await?;

    let executed = service(&harness).run_due_retries(now, &requester()).await?;

    assert_eq!(executed, 1);
    let sent = harness.executor.received().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].requests[0].native_identity.as_deref(), Some("cn=alice"));
    let waiting = harness.retries.tasks().await;
    assert_eq!(waiting.len(), 1);
    assert!(waiting[0].not_before > now);
    Ok(())
}

#[tokio::test]
async fn retry_task_reports_the_integration_result() -> AppResult<()> {
    let harness = harness(Identity::new("alice")?.with_link(Link::new("AD", "cn=alice")))?;
    let task = RetryTask::new(
        "alice",
        "ad-connector",
        retry_plan()?,
        CompilerOptions::new(),
        Utc::now(),
    );

    let report = service(&harness).run_retry_task(task, &requester()).await?;

    let plan = report
        .project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!());
    let status = plan.requests[0].result.as_ref().map(|result| result.status);
    assert_eq!(status, Some(ProvisioningStatus::Committed));
    assert!(matches!(report.outcome, Some(IdentityOutcome::Committed(_))));
    Ok(())
}
