//! `loop`: opens a loop frame over an array
//!
//! The handler only pushes the frame. Re-running the body once per item is
//! the executor's job, since only it knows which nodes sit downstream.

use crate::{
    error::NodeError,
    nodes::{parse_config, NodeHandler, NodeOutcome},
    runtime::{
        context::{ExecutionContext, LoopFrame},
        resolver,
    },
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoopConfig {
    /// Array, path (`variables.rows`, `fetch.output.items`) or JSON text
    source: Value,
    #[serde(default = "default_loop_variable")]
    loop_variable: String,
}

fn default_loop_variable() -> String {
    "item".to_string()
}

pub struct LoopHandler;

impl LoopHandler {
    fn resolve_items(source: &Value, ctx: &ExecutionContext) -> Result<Vec<Value>, NodeError> {
        match source {
            Value::Array(items) => Ok(items.clone()),
            Value::String(text) => {
                let text = text.trim();
                if let Some(found) = resolver::lookup(text, ctx) {
                    return match found {
                        Value::Array(items) => Ok(items),
                        Value::String(encoded) => parse_json_array(&encoded),
                        other => Err(not_an_array(&other)),
                    };
                }
                parse_json_array(text)
            }
            other => Err(not_an_array(other)),
        }
    }
}

fn parse_json_array(text: &str) -> Result<Vec<Value>, NodeError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(not_an_array(&other)),
        Err(_) => Err(NodeError::InvalidLoopSource(format!(
            "'{}' is neither a known path nor a JSON array",
            text
        ))),
    }
}

fn not_an_array(value: &Value) -> NodeError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Object(_) => "an object",
        Value::Array(_) => "an array",
    };
    NodeError::InvalidLoopSource(format!("expected an array, got {}", kind))
}

#[async_trait]
impl NodeHandler for LoopHandler {
    async fn execute(&self, config: &Value, ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let config: LoopConfig = parse_config(config)?;
        let items = Self::resolve_items(&config.source, ctx)?;
        let item_count = items.len();

        let source_expression = match &config.source {
            Value::String(s) => s.clone(),
            _ => "<inline array>".to_string(),
        };
        tracing::debug!("🔁 Loop over '{}' with {} items", source_expression, item_count);

        ctx.loop_stack
            .push(LoopFrame::new(items, config.loop_variable, source_expression));

        Ok(NodeOutcome::success(json!({
            "itemCount": item_count,
            "loopInitiated": true,
        })))
    }
}
