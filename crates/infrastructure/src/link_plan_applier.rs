use std::sync::Arc;

use async_trait::async_trait;
use provisio_application::{AccountPlanApplier, ApplicationCatalog};
use provisio_core::AppResult;
use provisio_domain::identity_attributes::IDENTITY_APPLICATION;
use provisio_domain::{
    AbstractRequest, AccountOperation, AttributeOperation, GenericRequest, Identity, Link, Plan,
    ProvisioningStatus, RequestKind, ValueMatcher, arguments, is_empty_value,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Mirrors committed account changes onto the identity's cached links.
///
/// Only changes whose effective result is `Committed` are applied. Secret
/// values never reach the link cache.
#[derive(Clone)]
pub struct LinkPlanApplier {
    applications: Arc<dyn ApplicationCatalog>,
}

impl LinkPlanApplier {
    /// Creates the applier.
    #[must_use]
    pub fn new(applications: Arc<dyn ApplicationCatalog>) -> Self {
        Self { applications }
    }

    async fn matcher_for(&self, application: &str) -> AppResult<ValueMatcher> {
        Ok(self
            .applications
            .find_application(application)
            .await?
            .map_or_else(ValueMatcher::exact, |definition| definition.matcher()))
    }
}

fn committed(plan: &Plan, request: &AbstractRequest, generic: Option<&GenericRequest>) -> bool {
    plan.effective_result(request, generic)
        .is_some_and(|result| result.status == ProvisioningStatus::Committed)
}

fn apply_change(attributes: &mut Map<String, Value>, generic: &GenericRequest, matcher: &ValueMatcher) {
    let mut current = attributes.get(generic.name.as_str()).cloned();
    match generic.operation {
        AttributeOperation::Retain => return,
        AttributeOperation::Set => current = generic.value.clone(),
        AttributeOperation::Add => matcher.union(&mut current, generic.value.as_ref()),
        AttributeOperation::Remove | AttributeOperation::Revoke => {
            let _ = matcher.subtract(&mut current, generic.value.as_ref());
        }
    }

    match current {
        Some(value) if !is_empty_value(Some(&value)) => {
            attributes.insert(generic.name.clone(), value);
        }
        _ => {
            attributes.remove(generic.name.as_str());
        }
    }
}

#[async_trait]
impl AccountPlanApplier for LinkPlanApplier {
    async fn apply_account_plans(&self, identity: &mut Identity, plans: &[Plan]) -> AppResult<()> {
        for plan in plans {
            for request in &plan.requests {
                if request.kind != RequestKind::Account
                    || request.application == IDENTITY_APPLICATION
                    || !committed(plan, request, None)
                {
                    continue;
                }
                let Some(native_identity) = request.native_identity.as_deref() else {
                    warn!(
                        identity = %identity.name,
                        application = %request.application,
                        "committed request without native identity"
                    );
                    continue;
                };
                let instance = request.instance.as_deref();

                match request.effective_operation() {
                    AccountOperation::Delete => {
                        if identity
                            .remove_link(request.application.as_str(), instance, native_identity)
                            .is_some()
                        {
                            debug!(
                                identity = %identity.name,
                                application = %request.application,
                                native_identity = %native_identity,
                                "link removed"
                            );
                        }
                        continue;
                    }
                    AccountOperation::Create => {
                        if identity
                            .find_link(request.application.as_str(), instance, native_identity)
                            .is_none()
                        {
                            let mut link = Link::new(request.application.as_str(), native_identity);
                            link.instance = request.instance.clone();
                            identity.links.push(link);
                        }
                    }
                    _ => {}
                }

                let matcher = self.matcher_for(request.application.as_str()).await?;
                let Some(link) =
                    identity.find_link_mut(request.application.as_str(), instance, native_identity)
                else {
                    warn!(
                        application = %request.application,
                        native_identity = %native_identity,
                        "no cached link for committed changes"
                    );
                    continue;
                };
                for (_, generic) in request.all_generic_requests() {
                    if generic.flag(arguments::SECRET) || !committed(plan, request, Some(generic)) {
                        continue;
                    }
                    apply_change(&mut link.attributes, generic, &matcher);
                }
            }
        }
        Ok(())
    }
}
