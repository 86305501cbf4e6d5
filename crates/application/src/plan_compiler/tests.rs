use chrono::{Duration, Utc};
use serde_json::json;

use provisio_core::{AppResult, is_temporary_assignment_id};
use provisio_domain::identity_attributes::{ASSIGNED_ROLES, IDENTITY_APPLICATION};
use provisio_domain::{
    AbstractRequest, AccountOperation, AccountTemplate, ApplicationDefinition, AttributeOperation,
    AttributeSyncTarget, CompilerOption, CompilerOptions, EntitlementProfile, ExpansionCause,
    FilterReason, GenericRequest, Identity, IntegrationConfig, Link, PendingRequest, Plan,
    ProvisioningResult, ProvisioningStatus, Question, RoleAssignment, RoleDefinition,
    TemplateField, TemplateUsage, arguments, values_as_text,
};

use crate::test_support::{FakeCatalog, FakeExecutor, FakeIdentityStore, FakePendingRepository, Harness};

fn catalog() -> AppResult<FakeCatalog> {
    Ok(FakeCatalog::default()
        .with_application(ApplicationDefinition::new("AD")?)
        .with_integration(IntegrationConfig::new("ad-connector", "fake")?.managing("AD"))
        .with_role(
            RoleDefinition::new("R")?
                .with_profile(EntitlementProfile::attribute("AD", "groups", ["G1"])),
        ))
}

fn harness(identity: Identity, catalog: FakeCatalog) -> Harness {
    Harness::new(
        FakeIdentityStore::default().with_identity(identity),
        catalog,
        FakeExecutor::new(ProvisioningStatus::Committed),
    )
}

fn identity_change(generic: GenericRequest) -> AppResult<AbstractRequest> {
    Ok(AbstractRequest::account(IDENTITY_APPLICATION)?.with_attribute(generic))
}

fn add_role(role_name: &str) -> AppResult<Plan> {
    Ok(Plan::new().with_request(identity_change(GenericRequest::new(
        ASSIGNED_ROLES,
        AttributeOperation::Add,
        Some(json!(role_name)),
    ))?))
}

fn groups_of(plan: &Plan) -> Vec<String> {
    plan.requests
        .iter()
        .filter_map(|request| request.attribute("groups"))
        .flat_map(|generic| values_as_text(generic.value.as_ref()))
        .collect()
}

#[tokio::test]
async fn role_add_expands_to_entitlements() -> AppResult<()> {
    let identity = Identity::new("alice")?.with_link(Link::new("AD", "cn=alice"));
    let harness = harness(identity, catalog()?);

    let project = harness
        .compiler()
        .compile("alice", add_role("R")?, CompilerOptions::new())
        .await?;

    let ad_plan = project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!());
    let request = &ad_plan.requests[0];
    assert_eq!(request.native_identity.as_deref(), Some("cn=alice"));
    let groups = request.attribute("groups").unwrap_or_else(|| unreachable!());
    assert_eq!(groups.operation, AttributeOperation::Add);
    assert_eq!(values_as_text(groups.value.as_ref()), vec!["G1".to_owned()]);

    let roles = project
        .identity_plan
        .as_ref()
        .and_then(Plan::identity_request)
        .and_then(|request| request.attribute(ASSIGNED_ROLES))
        .unwrap_or_else(|| unreachable!());
    assert_eq!(roles.operation, AttributeOperation::Add);
    assert_eq!(values_as_text(roles.value.as_ref()), vec!["R".to_owned()]);
    assert!(roles.assignment_id.as_deref().is_some_and(is_temporary_assignment_id));

    assert!(project.expansion_items.iter().any(|item| {
        item.cause == ExpansionCause::RoleExpansion && item.source_info == "R"
    }));
    Ok(())
}

#[tokio::test]
async fn each_new_assignment_gets_its_own_id() -> AppResult<()> {
    let catalog = catalog()?.with_role(
        RoleDefinition::new("R2")?
            .with_profile(EntitlementProfile::attribute("AD", "groups", ["G2"])),
    );
    let harness = harness(
        Identity::new("alice")?.with_link(Link::new("AD", "cn=alice")),
        catalog,
    );
    let mut request = AbstractRequest::account(IDENTITY_APPLICATION)?;
    for role_name in ["R", "R2"] {
        request = request.with_attribute(
            GenericRequest::new(ASSIGNED_ROLES, AttributeOperation::Add, Some(json!(role_name)))
                .with_assignment_id("new"),
        );
    }

    let project = harness
        .compiler()
        .compile("alice", Plan::new().with_request(request), CompilerOptions::new())
        .await?;

    let ids: Vec<Option<String>> = project.master_plan.requests[0]
        .attribute_requests
        .iter()
        .map(|generic| generic.assignment_id.clone())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|id| id.as_deref().is_some_and(|id| id != "new")));
    assert_ne!(ids[0], ids[1]);
    Ok(())
}

#[tokio::test]
async fn role_add_without_account_creates_one() -> AppResult<()> {
    let harness = harness(Identity::new("alice")?, catalog()?);

    let project = harness
        .compiler()
        .compile("alice", add_role("R")?, CompilerOptions::new())
        .await?;

    let ad_plan = project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!());
    assert_eq!(ad_plan.requests[0].operation, Some(AccountOperation::Create));
    assert_eq!(groups_of(ad_plan), vec!["G1".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn entitlements_shared_with_a_kept_role_are_not_removed() -> AppResult<()> {
    let identity = Identity::new("alice")?
        .with_link(Link::new("AD", "cn=alice").with_attribute("groups", json!(["G1"])))
        .with_assignment(RoleAssignment::new("a-1", "R"))
        .with_assignment(RoleAssignment::new("a-2", "R2"));
    let catalog = catalog()?.with_role(
        RoleDefinition::new("R2")?.with_profile(EntitlementProfile::attribute("AD", "groups", ["G1"])),
    );
    let harness = harness(identity, catalog);
    let master = Plan::new().with_request(identity_change(
        GenericRequest::new(ASSIGNED_ROLES, AttributeOperation::Remove, Some(json!("R")))
            .with_assignment_id("a-1"),
    )?);

    let project = harness
        .compiler()
        .compile("alice", master, CompilerOptions::new())
        .await?;

    let removals = project
        .plans
        .iter()
        .flat_map(|plan| plan.requests.iter())
        .flat_map(|request| request.attribute_requests.iter())
        .filter(|generic| generic.operation.is_subtractive())
        .count();
    assert_eq!(removals, 0);
    assert!(project.filtered.iter().any(|filtered| {
        filtered.reason == FilterReason::Dependency && filtered.application == "AD"
    }));
    assert!(project.identity_plan.is_some());
    Ok(())
}

#[tokio::test]
async fn answered_account_selection_is_reused_on_recompile() -> AppResult<()> {
    let identity = Identity::new("alice")?
        .with_link(Link::new("AD", "cn=a1"))
        .with_link(Link::new("AD", "cn=a2"));
    let harness = harness(identity, catalog()?);
    let compiler = harness.compiler();

    let mut project = compiler
        .compile("alice", add_role("R")?, CompilerOptions::new())
        .await?;
    assert!(project.has_unanswered_questions());
    assert_eq!(project.questions.len(), 1);
    let question_id = project.questions[0].id().to_owned();
    project.answer_account_selection(question_id.as_str(), vec!["cn=a2".to_owned()])?;

    let project = compiler.recompile(project).await?;

    assert!(!project.has_unanswered_questions());
    assert_eq!(project.questions.len(), 1);
    assert_eq!(project.questions[0].id(), question_id);
    let ad_plan = project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!());
    assert_eq!(ad_plan.requests.len(), 1);
    assert_eq!(ad_plan.requests[0].native_identity.as_deref(), Some("cn=a2"));
    assert_eq!(groups_of(ad_plan), vec!["G1".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn ambiguous_accounts_can_default_to_the_first() -> AppResult<()> {
    let identity = Identity::new("alice")?
        .with_link(Link::new("AD", "cn=a1"))
        .with_link(Link::new("AD", "cn=a2"));
    let harness = harness(identity, catalog()?);

    let project = harness
        .compiler()
        .compile(
            "alice",
            add_role("R")?,
            CompilerOptions::new().with(CompilerOption::ChooseFirstAmbiguousAccount),
        )
        .await?;

    assert!(project.questions.is_empty());
    let ad_plan = project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!());
    assert_eq!(ad_plan.requests[0].native_identity.as_deref(), Some("cn=a1"));
    Ok(())
}

#[tokio::test]
async fn link_edits_go_to_the_unmanaged_plan() -> AppResult<()> {
    let identity = Identity::new("alice")?.with_link(Link::new("AD", "cn=alice"));
    let harness = harness(identity, catalog()?);
    let mut edit = AbstractRequest::account("AD")?
        .with_native_identity("cn=alice")
        .with_operation(AccountOperation::Disable)
        .with_attribute(GenericRequest::new(
            "description",
            AttributeOperation::Set,
            Some(json!("contractor")),
        ));
    edit.arguments
        .insert(arguments::LINK_EDIT.to_owned(), json!(true));

    let project = harness
        .compiler()
        .compile("alice", Plan::new().with_request(edit), CompilerOptions::new())
        .await?;

    assert!(project.integration_plan("ad-connector").is_none());
    let unmanaged = project.unmanaged_plan.unwrap_or_else(|| unreachable!());
    assert_eq!(unmanaged.requests[0].operation, Some(AccountOperation::Modify));
    assert!(unmanaged.requests[0].attribute("description").is_some());
    Ok(())
}

#[tokio::test]
async fn requests_for_unknown_applications_are_dropped() -> AppResult<()> {
    let harness = harness(Identity::new("alice")?, catalog()?);
    let master = Plan::new().with_request(
        AbstractRequest::account("Mainframe")?
            .with_operation(AccountOperation::Create)
            .with_attribute(GenericRequest::new(
                "uid",
                AttributeOperation::Set,
                Some(json!("alice")),
            )),
    );

    let project = harness
        .compiler()
        .compile("alice", master, CompilerOptions::new())
        .await?;

    assert!(project.plans.is_empty());
    assert!(project.unmanaged_plan.is_none());
    Ok(())
}

#[tokio::test]
async fn missing_required_template_field_is_asked_and_answered() -> AppResult<()> {
    let template = AccountTemplate {
        usage: TemplateUsage::Create,
        fields: vec![
            TemplateField {
                name: "mail".to_owned(),
                identity_attribute: None,
                default: None,
                script: None,
                required: true,
                prompt: Some("Mail address".to_owned()),
            },
            TemplateField {
                name: "department".to_owned(),
                identity_attribute: Some("department".to_owned()),
                default: None,
                script: None,
                required: false,
                prompt: None,
            },
        ],
    };
    let catalog = FakeCatalog::default()
        .with_application(ApplicationDefinition::new("AD")?.with_template(template))
        .with_integration(IntegrationConfig::new("ad-connector", "fake")?.managing("AD"));
    let identity = Identity::new("bob")?.with_attribute("department", json!("sales"));
    let harness = harness(identity, catalog);
    let compiler = harness.compiler();
    let master = Plan::new().with_request(
        AbstractRequest::account("AD")?
            .with_operation(AccountOperation::Create)
            .with_attribute(GenericRequest::new("cn", AttributeOperation::Set, Some(json!("bob")))),
    );

    let mut project = compiler
        .compile("bob", master, CompilerOptions::new())
        .await?;
    let question_id = match project.questions.as_slice() {
        [Question::TemplateField(field)] => field.id.clone(),
        other => unreachable!("unexpected questions {other:?}"),
    };
    project.answer_template_field(question_id.as_str(), json!("bob@example.com"))?;

    let project = compiler.recompile(project).await?;

    assert!(!project.has_unanswered_questions());
    let request = &project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!())
        .requests[0];
    let mail = request.attribute("mail").unwrap_or_else(|| unreachable!());
    assert_eq!(mail.value, Some(json!("bob@example.com")));
    let department = request.attribute("department").unwrap_or_else(|| unreachable!());
    assert_eq!(department.value, Some(json!("sales")));
    assert!(project
        .expansion_items
        .iter()
        .any(|item| item.cause == ExpansionCause::Template));
    Ok(())
}

#[tokio::test]
async fn new_accounts_bring_their_required_applications() -> AppResult<()> {
    let catalog = catalog()?
        .with_application(ApplicationDefinition::new("Exchange")?.with_dependency("AD"))
        .with_integration(IntegrationConfig::new("exchange-connector", "fake")?.managing("Exchange"));
    let harness = harness(Identity::new("carol")?, catalog);
    let master = Plan::new()
        .with_request(AbstractRequest::account("Exchange")?.with_operation(AccountOperation::Create));

    let project = harness
        .compiler()
        .compile("carol", master, CompilerOptions::new())
        .await?;

    let ad_plan = project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!());
    assert_eq!(ad_plan.requests[0].operation, Some(AccountOperation::Create));
    assert!(project.expansion_items.iter().any(|item| {
        item.cause == ExpansionCause::Dependency && item.source_info == "Exchange"
    }));
    Ok(())
}

#[tokio::test]
async fn identity_attribute_changes_are_synced_through_transforms() -> AppResult<()> {
    let catalog = catalog()?.with_sync_target(AttributeSyncTarget {
        identity_attribute: "department".to_owned(),
        application: "AD".to_owned(),
        account_attribute: "dept".to_owned(),
        all_accounts: false,
        transform_script: Some("upper".to_owned()),
    });
    let identity = Identity::new("alice")?.with_link(Link::new("AD", "cn=alice"));
    let harness = harness(identity, catalog);
    let master = Plan::new().with_request(identity_change(GenericRequest::new(
        "department",
        AttributeOperation::Set,
        Some(json!("sales")),
    ))?);

    let project = harness
        .compiler()
        .compile("alice", master, CompilerOptions::new())
        .await?;

    let request = &project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!())
        .requests[0];
    assert_eq!(request.native_identity.as_deref(), Some("cn=alice"));
    let dept = request.attribute("dept").unwrap_or_else(|| unreachable!());
    assert_eq!(dept.operation, AttributeOperation::Set);
    assert_eq!(dept.value, Some(json!("SALES")));
    Ok(())
}

#[tokio::test]
async fn failing_sync_transform_drops_only_its_target() -> AppResult<()> {
    let catalog = catalog()?.with_sync_target(AttributeSyncTarget {
        identity_attribute: "department".to_owned(),
        application: "AD".to_owned(),
        account_attribute: "dept".to_owned(),
        all_accounts: false,
        transform_script: Some("fail".to_owned()),
    });
    let identity = Identity::new("alice")?.with_link(Link::new("AD", "cn=alice"));
    let harness = harness(identity, catalog);
    let master = Plan::new().with_request(identity_change(GenericRequest::new(
        "department",
        AttributeOperation::Set,
        Some(json!("sales")),
    ))?);

    let project = harness
        .compiler()
        .compile("alice", master, CompilerOptions::new())
        .await?;

    assert!(project.integration_plan("ad-connector").is_none());
    assert!(project.identity_plan.is_some());
    Ok(())
}

#[tokio::test]
async fn pending_changes_are_not_requested_twice() -> AppResult<()> {
    let mut sent = Plan::for_integration("ad-connector").with_request(
        AbstractRequest::account("AD")?
            .with_native_identity("cn=alice")
            .with_attribute(GenericRequest::new(
                "groups",
                AttributeOperation::Add,
                Some(json!(["G1"])),
            )),
    );
    sent.result = Some(ProvisioningResult::new(ProvisioningStatus::Queued));
    let pending = FakePendingRepository::default().with_record(PendingRequest::new(
        "alice",
        "ad-connector",
        sent,
        Utc::now() + Duration::hours(1),
    ));
    let identity = Identity::new("alice")?.with_link(Link::new("AD", "cn=alice"));
    let harness = harness(identity, catalog()?).with_pending(pending);
    let master = Plan::new().with_request(
        AbstractRequest::account("AD")?
            .with_native_identity("cn=alice")
            .with_attribute(GenericRequest::new(
                "groups",
                AttributeOperation::Add,
                Some(json!("G1")),
            )),
    );

    let project = harness
        .compiler()
        .compile("alice", master, CompilerOptions::new())
        .await?;

    assert!(project.integration_plan("ad-connector").is_none());
    assert!(project
        .filtered
        .iter()
        .any(|filtered| filtered.reason == FilterReason::Requested));
    Ok(())
}

#[tokio::test]
async fn values_the_account_already_holds_are_filtered() -> AppResult<()> {
    let identity = Identity::new("alice")?
        .with_link(Link::new("AD", "cn=alice").with_attribute("groups", json!(["G1"])));
    let harness = harness(identity, catalog()?);
    let master = Plan::new().with_request(
        AbstractRequest::account("AD")?
            .with_native_identity("cn=alice")
            .with_attribute(GenericRequest::new(
                "groups",
                AttributeOperation::Add,
                Some(json!(["G1", "G2"])),
            ))
            .with_attribute(GenericRequest::new(
                "groups",
                AttributeOperation::Remove,
                Some(json!("G9")),
            )),
    );

    let project = harness
        .compiler()
        .compile("alice", master, CompilerOptions::new())
        .await?;

    let ad_plan = project
        .integration_plan("ad-connector")
        .unwrap_or_else(|| unreachable!());
    assert_eq!(groups_of(ad_plan), vec!["G2".to_owned()]);
    let reasons: Vec<FilterReason> = project.filtered.iter().map(|filtered| filtered.reason).collect();
    assert!(reasons.contains(&FilterReason::Exists));
    assert!(reasons.contains(&FilterReason::DoesNotExist));
    Ok(())
}

#[tokio::test]
async fn scope_keeps_only_named_applications() -> AppResult<()> {
    let catalog = catalog()?
        .with_application(ApplicationDefinition::new("LDAP")?)
        .with_integration(IntegrationConfig::new("ldap-connector", "fake")?.managing("LDAP"));
    let harness = harness(Identity::new("dave")?, catalog);
    let master = Plan::new()
        .with_request(AbstractRequest::account("AD")?.with_operation(AccountOperation::Create))
        .with_request(AbstractRequest::account("LDAP")?.with_operation(AccountOperation::Create));

    let project = harness
        .compiler()
        .compile("dave", master, CompilerOptions::new().with_scope(["LDAP"]))
        .await?;

    assert!(project.integration_plan("ad-connector").is_none());
    assert!(project.integration_plan("ldap-connector").is_some());
    Ok(())
}

#[tokio::test]
async fn no_role_expansion_leaves_only_the_identity_change() -> AppResult<()> {
    let identity = Identity::new("alice")?.with_link(Link::new("AD", "cn=alice"));
    let harness = harness(identity, catalog()?);

    let project = harness
        .compiler()
        .compile(
            "alice",
            add_role("R")?,
            CompilerOptions::new().with(CompilerOption::NoRoleExpansion),
        )
        .await?;

    assert!(project.plans.is_empty());
    assert!(project.expansion_items.is_empty());
    assert!(project.identity_plan.is_some());
    Ok(())
}

#[tokio::test]
async fn compiled_plans_carry_master_plan_metadata() -> AppResult<()> {
    let identity = Identity::new("alice")?.with_link(Link::new("AD", "cn=alice"));
    let harness = harness(identity, catalog()?);
    let mut master = add_role("R")?;
    master.requesters.push("spadmin".to_owned());
    master.source = Some("lcm".to_owned());

    let project = harness
        .compiler()
        .compile("alice", master, CompilerOptions::new())
        .await?;

    for plan in project.all_plans() {
        assert_eq!(plan.identity_name.as_deref(), Some("alice"));
        assert_eq!(plan.requesters, vec!["spadmin".to_owned()]);
        assert_eq!(plan.source.as_deref(), Some("lcm"));
    }
    Ok(())
}
