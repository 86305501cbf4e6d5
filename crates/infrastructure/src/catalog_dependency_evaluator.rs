use std::sync::Arc;

use async_trait::async_trait;
use provisio_application::{ApplicationCatalog, DependencyEvaluator};
use provisio_core::AppResult;
use provisio_domain::{AccountOperation, Plan, RequestKind};

/// Orders plans by the required applications of the accounts they create.
///
/// Only account creations wait for their dependencies; changes to existing
/// accounts run in any order.
#[derive(Clone)]
pub struct CatalogDependencyEvaluator {
    applications: Arc<dyn ApplicationCatalog>,
}

impl CatalogDependencyEvaluator {
    /// Creates the evaluator.
    #[must_use]
    pub fn new(applications: Arc<dyn ApplicationCatalog>) -> Self {
        Self { applications }
    }
}

#[async_trait]
impl DependencyEvaluator for CatalogDependencyEvaluator {
    async fn required_applications(&self, plan: &Plan) -> AppResult<Vec<String>> {
        let mut required: Vec<String> = Vec::new();
        for request in &plan.requests {
            if request.kind != RequestKind::Account
                || request.operation != Some(AccountOperation::Create)
            {
                continue;
            }
            let Some(definition) = self
                .applications
                .find_application(request.application.as_str())
                .await?
            else {
                continue;
            };
            for dependency in definition.dependencies {
                if dependency != request.application && !required.contains(&dependency) {
                    required.push(dependency);
                }
            }
        }
        Ok(required)
    }
}
