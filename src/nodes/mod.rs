//! Node handlers and the type → handler registry
//!
//! Each node type is one stateless `NodeHandler`. The closed `NodeKind`
//! enum is the registration table: adding a variant without wiring a
//! handler in `builtin_handler` does not compile. The `type` string on a
//! stored node is only the lookup key.

pub mod condition;
pub mod delay;
pub mod email;
pub mod http;
pub mod loop_node;
pub mod sheets;
pub mod slack;
pub mod variable;
pub mod webhook;

use crate::{
    config::IntegrationConfig, credentials::CredentialStore, error::NodeError,
    runtime::context::ExecutionContext,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// What a handler reports back to the executor
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    /// Handler asks the executor to proceed even though it failed
    pub continue_on_error: bool,
}

impl NodeOutcome {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            continue_on_error: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(message.into()),
            continue_on_error: false,
        }
    }
}

/// One node type's capability
///
/// `config` is already template-resolved. Returning `Err` is the same as
/// returning a failed outcome: the executor applies continue-on-error either
/// way.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, config: &Value, ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError>;
}

/// Deserialize a resolved config into the handler's own struct
pub fn parse_config<T: DeserializeOwned>(config: &Value) -> Result<T, NodeError> {
    Ok(serde_json::from_value(config.clone())?)
}

/// Body of a third-party API response as JSON, non-2xx as `Upstream`
pub(crate) async fn upstream_json(service: &str, response: reqwest::Response) -> Result<Value, NodeError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(NodeError::Upstream {
            service: service.to_string(),
            message: format!("{}: {}", status, text),
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| NodeError::Upstream {
        service: service.to_string(),
        message: format!("invalid JSON response: {}", e),
    })
}

/// Every built-in node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Webhook,
    Trigger,
    Http,
    Delay,
    Condition,
    IfElse,
    Variable,
    Loop,
    Slack,
    Email,
    Sheets,
}

impl NodeKind {
    pub const ALL: [NodeKind; 11] = [
        NodeKind::Webhook,
        NodeKind::Trigger,
        NodeKind::Http,
        NodeKind::Delay,
        NodeKind::Condition,
        NodeKind::IfElse,
        NodeKind::Variable,
        NodeKind::Loop,
        NodeKind::Slack,
        NodeKind::Email,
        NodeKind::Sheets,
    ];

    /// Storage discriminator
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Webhook => "webhook",
            NodeKind::Trigger => "trigger",
            NodeKind::Http => "http",
            NodeKind::Delay => "delay",
            NodeKind::Condition => "condition",
            NodeKind::IfElse => "ifElse",
            NodeKind::Variable => "variable",
            NodeKind::Loop => "loop",
            NodeKind::Slack => "slack",
            NodeKind::Email => "email",
            NodeKind::Sheets => "sheets",
        }
    }

    pub fn from_type(node_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == node_type)
    }

    /// Kinds whose output `branch` decides which outgoing edges are live
    pub fn is_branching(&self) -> bool {
        matches!(self, NodeKind::Condition | NodeKind::IfElse)
    }
}

/// Shared clients the integration handlers need
#[derive(Clone)]
pub struct HandlerDeps {
    pub http: reqwest::Client,
    pub credentials: Arc<dyn CredentialStore>,
    pub integrations: IntegrationConfig,
}

fn builtin_handler(kind: NodeKind, deps: &HandlerDeps) -> Arc<dyn NodeHandler> {
    match kind {
        NodeKind::Webhook | NodeKind::Trigger => Arc::new(webhook::WebhookHandler),
        NodeKind::Http => Arc::new(http::HttpHandler::new(deps.http.clone())),
        NodeKind::Delay => Arc::new(delay::DelayHandler),
        NodeKind::Condition | NodeKind::IfElse => Arc::new(condition::ConditionHandler),
        NodeKind::Variable => Arc::new(variable::VariableHandler),
        NodeKind::Loop => Arc::new(loop_node::LoopHandler),
        NodeKind::Slack => Arc::new(slack::SlackHandler::new(
            deps.http.clone(),
            Arc::clone(&deps.credentials),
            deps.integrations.slack_api_base.clone(),
        )),
        NodeKind::Email => Arc::new(email::EmailHandler::new(
            deps.http.clone(),
            Arc::clone(&deps.credentials),
            deps.integrations.gmail_api_base.clone(),
        )),
        NodeKind::Sheets => Arc::new(sheets::SheetsHandler::new(
            deps.http.clone(),
            Arc::clone(&deps.credentials),
            deps.integrations.sheets_api_base.clone(),
        )),
    }
}

/// Node type string → handler
#[derive(Default, Clone)]
pub struct NodeHandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl NodeHandlerRegistry {
    /// Empty registry, mostly for tests that register stubs
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler per `NodeKind`
    pub fn with_builtins(deps: HandlerDeps) -> Self {
        let mut registry = Self::new();
        for kind in NodeKind::ALL {
            registry.register(kind.as_str(), builtin_handler(kind, &deps));
        }
        tracing::info!("🧩 Registered {} node handlers", registry.handlers.len());
        registry
    }

    /// Add or replace the handler for `node_type`
    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }
}
