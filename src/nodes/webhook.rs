//! Entry node: exposes the trigger payload as its output

use crate::{
    error::NodeError,
    nodes::{NodeHandler, NodeOutcome},
    runtime::context::ExecutionContext,
};
use async_trait::async_trait;
use serde_json::Value;

pub struct WebhookHandler;

#[async_trait]
impl NodeHandler for WebhookHandler {
    async fn execute(&self, _config: &Value, ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::success(ctx.trigger.clone()))
    }
}
