use std::collections::HashMap;

use async_trait::async_trait;
use provisio_application::{ApplicationCatalog, IntegrationConfigFinder, RoleCatalog};
use provisio_core::{AppError, AppResult};
use provisio_domain::{ApplicationDefinition, AttributeSyncTarget, IntegrationConfig, RoleDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Serialized catalog content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Role definitions.
    #[serde(default)]
    pub roles: Vec<RoleDefinition>,
    /// Application definitions.
    #[serde(default)]
    pub applications: Vec<ApplicationDefinition>,
    /// Identity attribute synchronization targets.
    #[serde(default)]
    pub sync_targets: Vec<AttributeSyncTarget>,
    /// Backend integrations.
    #[serde(default)]
    pub integrations: Vec<IntegrationConfig>,
}

/// In-memory roles, applications and integrations.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    roles: RwLock<HashMap<String, RoleDefinition>>,
    applications: RwLock<HashMap<String, ApplicationDefinition>>,
    sync_targets: RwLock<Vec<AttributeSyncTarget>>,
    integrations: RwLock<Vec<IntegrationConfig>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from a document, rejecting duplicate names.
    pub fn from_document(document: CatalogDocument) -> AppResult<Self> {
        let mut roles = HashMap::new();
        for role in document.roles {
            let name = role.name.clone();
            if roles.insert(name.clone(), role).is_some() {
                return Err(AppError::Conflict(format!("role '{name}' is defined twice")));
            }
        }

        let mut applications = HashMap::new();
        for application in document.applications {
            let name = application.name.clone();
            if applications.insert(name.clone(), application).is_some() {
                return Err(AppError::Conflict(format!(
                    "application '{name}' is defined twice"
                )));
            }
        }

        for (index, integration) in document.integrations.iter().enumerate() {
            if document.integrations[..index]
                .iter()
                .any(|earlier| earlier.name == integration.name)
            {
                return Err(AppError::Conflict(format!(
                    "integration '{}' is defined twice",
                    integration.name
                )));
            }
        }

        Ok(Self {
            roles: RwLock::new(roles),
            applications: RwLock::new(applications),
            sync_targets: RwLock::new(document.sync_targets),
            integrations: RwLock::new(document.integrations),
        })
    }

    /// Adds or replaces a role.
    pub async fn save_role(&self, role: RoleDefinition) {
        self.roles.write().await.insert(role.name.clone(), role);
    }

    /// Adds or replaces an application.
    pub async fn save_application(&self, application: ApplicationDefinition) {
        self.applications
            .write()
            .await
            .insert(application.name.clone(), application);
    }

    /// Adds or replaces an integration.
    pub async fn save_integration(&self, integration: IntegrationConfig) {
        let mut integrations = self.integrations.write().await;
        integrations.retain(|existing| existing.name != integration.name);
        integrations.push(integration);
    }

    /// Lists every role, sorted by name.
    pub async fn list_roles(&self) -> Vec<RoleDefinition> {
        let mut roles: Vec<RoleDefinition> = self.roles.read().await.values().cloned().collect();
        roles.sort_by(|left, right| left.name.cmp(&right.name));
        roles
    }
}

#[async_trait]
impl RoleCatalog for InMemoryCatalog {
    async fn find_role(&self, name: &str) -> AppResult<Option<RoleDefinition>> {
        Ok(self.roles.read().await.get(name).cloned())
    }
}

#[async_trait]
impl ApplicationCatalog for InMemoryCatalog {
    async fn find_application(&self, name: &str) -> AppResult<Option<ApplicationDefinition>> {
        Ok(self.applications.read().await.get(name).cloned())
    }

    async fn list_sync_targets(
        &self,
        identity_attribute: &str,
    ) -> AppResult<Vec<AttributeSyncTarget>> {
        Ok(self
            .sync_targets
            .read()
            .await
            .iter()
            .filter(|target| target.identity_attribute == identity_attribute)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IntegrationConfigFinder for InMemoryCatalog {
    async fn list_integrations(&self) -> AppResult<Vec<IntegrationConfig>> {
        Ok(self.integrations.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use provisio_domain::EntitlementProfile;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn documents_load_into_lookups() -> AppResult<()> {
        let document: CatalogDocument = serde_json::from_value(json!({
            "roles": [],
            "applications": [],
            "sync_targets": [
                {"identity_attribute": "department", "application": "AD", "account_attribute": "dept"},
                {"identity_attribute": "title", "application": "AD", "account_attribute": "title"}
            ]
        }))
        .map_err(|error| AppError::Validation(error.to_string()))?;
        let catalog = InMemoryCatalog::from_document(document)?;
        catalog
            .save_role(
                RoleDefinition::new("Engineer")?
                    .with_profile(EntitlementProfile::attribute("AD", "groups", ["eng"])),
            )
            .await;
        catalog
            .save_integration(IntegrationConfig::new("ad-connector", "simulated")?.managing("AD"))
            .await;

        assert!(catalog.find_role("Engineer").await?.is_some());
        assert!(catalog.find_application("AD").await?.is_none());
        let targets = catalog.list_sync_targets("department").await?;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].account_attribute, "dept");
        assert_eq!(catalog.list_integrations().await?.len(), 1);
        Ok(())
    }

    #[test]
    fn duplicate_names_are_rejected() -> AppResult<()> {
        let document = CatalogDocument {
            applications: vec![
                ApplicationDefinition::new("AD")?,
                ApplicationDefinition::new("AD")?,
            ],
            ..CatalogDocument::default()
        };
        assert!(matches!(
            InMemoryCatalog::from_document(document),
            Err(AppError::Conflict(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn saving_an_integration_replaces_it() -> AppResult<()> {
        let catalog = InMemoryCatalog::new();
        catalog
            .save_integration(IntegrationConfig::new("ad-connector", "simulated")?)
            .await;
        catalog
            .save_integration(IntegrationConfig::new("ad-connector", "ldap")?)
            .await;

        let integrations = catalog.list_integrations().await?;
        assert_eq!(integrations.len(), 1);
        assert_eq!(integrations[0].executor, "ldap");
        Ok(())
    }
}
