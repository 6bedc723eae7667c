//! Sets a workflow variable visible to every later node

use crate::{
    error::NodeError,
    nodes::{parse_config, NodeHandler, NodeOutcome},
    runtime::context::ExecutionContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct VariableConfig {
    key: String,
    #[serde(default)]
    value: Value,
}

pub struct VariableHandler;

#[async_trait]
impl NodeHandler for VariableHandler {
    async fn execute(&self, config: &Value, ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let config: VariableConfig = parse_config(config)?;
        let key = config.key.trim();
        if key.is_empty() {
            return Err(NodeError::InvalidConfig("variable key must not be empty".into()));
        }

        tracing::debug!("📝 Setting variable '{}'", key);
        ctx.variables.insert(key.to_string(), config.value.clone());
        Ok(NodeOutcome::success(json!({ "key": key, "value": config.value })))
    }
}
