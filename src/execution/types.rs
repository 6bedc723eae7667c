//! Execution record and node log types

use crate::workflow::types::TriggerSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of one run: `pending → running → {success | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failed)
    }

    /// Allowed moves of the one-way status machine
    ///
    /// `pending -> failed` covers runs that abort before they start.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Running)
                | (ExecutionStatus::Pending, ExecutionStatus::Failed)
                | (ExecutionStatus::Running, ExecutionStatus::Success)
                | (ExecutionStatus::Running, ExecutionStatus::Failed)
        )
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown execution status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Success => "success",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(NodeStatus::Success),
            "failed" => Ok(NodeStatus::Failed),
            "skipped" => Ok(NodeStatus::Skipped),
            other => Err(anyhow::anyhow!("Unknown node status: {}", other)),
        }
    }
}

/// One entry per node execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLog {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    /// Config after template resolution, as passed to the handler
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt_number: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

impl NodeLog {
    /// Log for a node that was not executed on this path
    pub fn skipped(node_id: &str, node_type: &str, attempt: u32) -> Self {
        let now = Utc::now();
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: NodeStatus::Skipped,
            input: Value::Null,
            output: None,
            error: None,
            attempt_number: attempt,
            start_time: now,
            end_time: now,
            duration_ms: 0,
        }
    }
}

/// Persisted status and history of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub user_id: String,
    pub status: ExecutionStatus,
    pub trigger_payload: Value,
    pub trigger_source: TriggerSource,
    pub attempt: u32,
    pub logs: Vec<NodeLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// Fields needed to open a record
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub workflow_id: String,
    pub user_id: String,
    pub trigger_payload: Value,
    pub trigger_source: TriggerSource,
    pub attempt: u32,
}

impl ExecutionRecord {
    pub fn open(id: String, new: NewExecution) -> Self {
        Self {
            id,
            workflow_id: new.workflow_id,
            user_id: new.user_id,
            status: ExecutionStatus::Pending,
            trigger_payload: new.trigger_payload,
            trigger_source: new.trigger_source,
            attempt: new.attempt,
            logs: Vec::new(),
            error: None,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
        }
    }

    /// Apply a status change, stamping end time and duration on terminal states
    pub fn transition(&mut self, next: ExecutionStatus) -> anyhow::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(anyhow::anyhow!(
                "Invalid status transition for execution {}: {} -> {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            ));
        }
        self.status = next;
        if next.is_terminal() {
            let end = Utc::now();
            self.end_time = Some(end);
            self.duration_ms = Some((end - self.start_time).num_milliseconds());
        }
        Ok(())
    }
}
