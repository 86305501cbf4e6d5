use async_trait::async_trait;
use provisio_core::AppResult;
use provisio_domain::{ApplicationDefinition, AttributeSyncTarget, IntegrationConfig, RoleDefinition};

/// Lookup port for role definitions.
#[async_trait]
pub trait RoleCatalog: Send + Sync {
    /// Returns one role by name.
    async fn find_role(&self, name: &str) -> AppResult<Option<RoleDefinition>>;
}

/// Lookup port for application definitions.
#[async_trait]
pub trait ApplicationCatalog: Send + Sync {
    /// Returns one application by name.
    async fn find_application(&self, name: &str) -> AppResult<Option<ApplicationDefinition>>;

    /// Lists the account attributes mirroring one identity attribute.
    async fn list_sync_targets(&self, identity_attribute: &str)
    -> AppResult<Vec<AttributeSyncTarget>>;
}

/// Lookup port for backend integrations.
#[async_trait]
pub trait IntegrationConfigFinder: Send + Sync {
    /// Lists every configured integration.
    async fn list_integrations(&self) -> AppResult<Vec<IntegrationConfig>>;
}
