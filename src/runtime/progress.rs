//! Live run progress, fire-and-forget
//!
//! Events are routed by owning user. Publishing never fails from the
//! executor's point of view: a publisher with no listeners drops events.

use crate::execution::{ExecutionStatus, NodeStatus};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub user_id: String,
    pub workflow_id: String,
    pub execution_id: String,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressKind {
    Started {
        total_nodes: usize,
    },
    Progress {
        completed: usize,
        total: usize,
        current_node: String,
    },
    NodeCompleted {
        node_id: String,
        node_type: String,
        status: NodeStatus,
        duration_ms: i64,
    },
    Completed {
        status: ExecutionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Drops everything
pub struct NoopPublisher;

impl ProgressPublisher for NoopPublisher {
    fn publish(&self, _event: ProgressEvent) {}
}

/// Progress bus using a tokio broadcast channel
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Events of one user's runs only
    pub fn subscribe_user(&self, user_id: impl Into<String>) -> UserProgress {
        UserProgress {
            user_id: user_id.into(),
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, event: ProgressEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }
}

pub struct UserProgress {
    user_id: String,
    rx: broadcast::Receiver<ProgressEvent>,
}

impl UserProgress {
    /// Next event for this user; `None` once the publisher is gone
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.user_id == self.user_id => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("⚠️ Progress subscriber for {} lagged, {} events dropped", self.user_id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Per-run handle the executor emits through
#[derive(Clone)]
pub struct ProgressReporter {
    publisher: Arc<dyn ProgressPublisher>,
    user_id: String,
    workflow_id: String,
    execution_id: String,
}

impl ProgressReporter {
    pub fn new(
        publisher: Arc<dyn ProgressPublisher>,
        user_id: &str,
        workflow_id: &str,
        execution_id: &str,
    ) -> Self {
        Self {
            publisher,
            user_id: user_id.to_string(),
            workflow_id: workflow_id.to_string(),
            execution_id: execution_id.to_string(),
        }
    }

    fn emit(&self, kind: ProgressKind) {
        self.publisher.publish(ProgressEvent {
            user_id: self.user_id.clone(),
            workflow_id: self.workflow_id.clone(),
            execution_id: self.execution_id.clone(),
            kind,
        });
    }

    pub fn emit_started(&self, total_nodes: usize) {
        self.emit(ProgressKind::Started { total_nodes });
    }

    pub fn emit_progress(&self, completed: usize, total: usize, current_node: &str) {
        self.emit(ProgressKind::Progress {
            completed,
            total,
            current_node: current_node.to_string(),
        });
    }

    pub fn emit_node_completed(&self, node_id: &str, node_type: &str, status: NodeStatus, duration_ms: i64) {
        self.emit(ProgressKind::NodeCompleted {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status,
            duration_ms,
        });
    }

    pub fn emit_completed(&self, status: ExecutionStatus, error: Option<String>) {
        self.emit(ProgressKind::Completed { status, error });
    }
}
