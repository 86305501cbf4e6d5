use async_trait::async_trait;
use provisio_core::AppResult;
use serde_json::{Map, Value};

/// Port for value transforms and plan initializer hooks.
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    /// Runs a script with named arguments and returns its value.
    async fn run(&self, script: &str, arguments: &Map<String, Value>) -> AppResult<Value>;
}
