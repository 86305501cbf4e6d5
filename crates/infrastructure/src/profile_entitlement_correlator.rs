use std::sync::Arc;

use async_trait::async_trait;
use provisio_application::{ApplicationCatalog, EntitlementCorrelator};
use provisio_core::AppResult;
use provisio_domain::{
    EntitlementProfile, Identity, Link, RoleDefinition, RoleDetection, RoleTarget, ValueMatcher,
    to_list,
};
use tracing::debug;

use crate::in_memory_catalog::InMemoryCatalog;

/// Detects roles whose every entitlement profile is held by some account.
///
/// Roles without profiles and disabled roles are never detected.
#[derive(Clone)]
pub struct ProfileEntitlementCorrelator {
    catalog: Arc<InMemoryCatalog>,
}

impl ProfileEntitlementCorrelator {
    /// Creates a correlator over the catalog's roles.
    #[must_use]
    pub fn new(catalog: Arc<InMemoryCatalog>) -> Self {
        Self { catalog }
    }

    async fn matcher_for(&self, application: &str) -> AppResult<ValueMatcher> {
        Ok(self
            .catalog
            .find_application(application)
            .await?
            .map_or_else(ValueMatcher::exact, |definition| definition.matcher()))
    }

    async fn detect(&self, role: &RoleDefinition, identity: &Identity) -> AppResult<Option<RoleDetection>> {
        if role.disabled || role.profiles.is_empty() {
            return Ok(None);
        }

        let mut targets: Vec<RoleTarget> = Vec::new();
        for profile in &role.profiles {
            let matcher = self.matcher_for(profile.application.as_str()).await?;
            let holders: Vec<&Link> = identity
                .links
                .iter()
                .filter(|link| link.application == profile.application && holds(link, profile, &matcher))
                .collect();
            if holders.is_empty() {
                return Ok(None);
            }
            for link in holders {
                let target = RoleTarget {
                    application: link.application.clone(),
                    instance: link.instance.clone(),
                    native_identity: link.native_identity.clone(),
                };
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }

        Ok(Some(RoleDetection {
            role_name: role.name.clone(),
            targets,
        }))
    }
}

fn holds(link: &Link, profile: &EntitlementProfile, matcher: &ValueMatcher) -> bool {
    let held = to_list(link.attribute(profile.name.as_str()));
    profile
        .values
        .iter()
        .all(|required| matcher.contains(held.as_slice(), required))
}

#[async_trait]
impl EntitlementCorrelator for ProfileEntitlementCorrelator {
    async fn detect_roles(&self, identity: &Identity) -> AppResult<Vec<RoleDetection>> {
        let mut detections = Vec::new();
        for role in self.catalog.list_roles().await {
            if let Some(detection) = self.detect(&role, identity).await? {
                detections.push(detection);
            }
        }
        debug!(
            identity = %identity.name,
            detected = detections.len(),
            "entitlement correlation finished"
        );
        Ok(detections)
    }
}
