//! `condition` / `ifElse`: picks the `"true"` or `"false"` branch

use crate::{
    error::NodeError,
    nodes::{parse_config, NodeHandler, NodeOutcome},
    runtime::{condition, context::ExecutionContext},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    condition: Value,
}

pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(&self, config: &Value, _ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let config: ConditionConfig = parse_config(config)?;

        // a whole-template condition may already have resolved to a boolean
        let (result, expression) = match &config.condition {
            Value::Bool(b) => (*b, b.to_string()),
            Value::String(expr) => (condition::evaluate(expr)?, expr.clone()),
            other => return Err(NodeError::InvalidExpression(other.to_string())),
        };

        tracing::debug!("🔀 Condition '{}' evaluated to {}", expression, result);
        Ok(NodeOutcome::success(json!({
            "branch": if result { "true" } else { "false" },
            "result": result,
            "expression": expression,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(config: Value) -> Result<NodeOutcome, NodeError> {
        let mut ctx = ExecutionContext::new("u1", json!({}));
        ConditionHandler.execute(&config, &mut ctx).await
    }

    #[tokio::test]
    async fn test_branch_output() {
        let outcome = run(json!({ "condition": "15 > 10" })).await.unwrap();
        assert_eq!(outcome.output["branch"], "true");
        assert_eq!(outcome.output["result"], true);

        let outcome = run(json!({ "condition": "5 > 10" })).await.unwrap();
        assert_eq!(outcome.output["branch"], "false");
        assert_eq!(outcome.output["expression"], "5 > 10");
    }

    #[tokio::test]
    async fn test_boolean_condition() {
        let outcome = run(json!({ "condition": false })).await.unwrap();
        assert_eq!(outcome.output["branch"], "false");
    }

    #[tokio::test]
    async fn test_invalid_expression_is_a_handler_failure() {
        let err = run(json!({ "condition": "not an expr" })).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid expression: not an expr");
        assert!(run(json!({ "condition": 3 })).await.is_err());
        assert!(run(json!({})).await.is_err());
    }
}
