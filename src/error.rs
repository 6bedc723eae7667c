//! Error taxonomy for the execution engine
//!
//! `EngineError` covers everything that can abort a run (graph problems,
//! missing handlers, fatal node failures, store failures). `NodeError` is what
//! an individual handler reports; the executor turns it into a failed node and
//! then applies the continue-on-error policy.

use thiserror::Error;

/// Run-level errors raised by the graph orderer and the workflow executor
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("Workflow '{0}' has no nodes")]
    EmptyWorkflow(String),

    #[error("Workflow contains a cycle ({ordered} of {total} nodes could be ordered)")]
    Cycle { ordered: usize, total: usize },

    #[error("Edge '{edge_id}' references unknown node: {node_id}")]
    UnknownNode { edge_id: String, node_id: String },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("No handler registered for node type '{node_type}' (node '{node_id}')")]
    MissingHandler { node_id: String, node_type: String },

    #[error("Invalid loop source for node '{node_id}': {message}")]
    InvalidLoopSource { node_id: String, message: String },

    #[error("Node '{node_id}' ({node_type}) failed: {message}")]
    NodeExecution {
        node_id: String,
        node_type: String,
        message: String,
    },

    #[error("Output for node '{0}' was already recorded in this scope")]
    OutputAlreadyRecorded(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    /// Node id the error is attributed to, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            EngineError::MissingHandler { node_id, .. }
            | EngineError::InvalidLoopSource { node_id, .. }
            | EngineError::NodeExecution { node_id, .. } => Some(node_id),
            EngineError::OutputAlreadyRecorded(node_id) => Some(node_id),
            _ => None,
        }
    }
}

/// Failure of a whole run as seen by the job queue
///
/// `execution_id` is `None` only when the execution record itself could not
/// be created.
#[derive(Debug, Error)]
#[error("Execution {} failed: {source}", execution_id.as_deref().unwrap_or("<unrecorded>"))]
pub struct ExecutionFailed {
    pub execution_id: Option<String>,
    #[source]
    pub source: EngineError,
}

/// Errors reported by node handlers
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid loop source: {0}")]
    InvalidLoopSource(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("No '{service}' connection for user {user_id}")]
    MissingConnection { user_id: String, service: String },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error: {message}")]
    Upstream { service: String, message: String },
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::InvalidConfig(e.to_string())
    }
}
