//! Core workflow type definitions
//!
//! Workflows are stored as JSON documents and turned into a petgraph DAG at
//! run time. Node configuration stays a loose JSON map here; each handler
//! deserializes its own strict config after variable resolution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A complete workflow document as stored and served by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier
    pub id: String,
    /// Owning user. Runs execute with this user's credentials
    #[serde(default)]
    pub user_id: String,
    /// Human-readable workflow name
    pub name: String,
    /// How the workflow is started besides manual calls
    #[serde(default)]
    pub trigger: TriggerConfig,
    /// Inactive workflows ignore webhook and cron triggers
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

fn default_active() -> bool {
    true
}

impl Workflow {
    /// Immutable per-run view of the graph
    pub fn graph(&self) -> WorkflowGraph {
        WorkflowGraph {
            name: self.name.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Cron expression when the workflow is scheduled
    pub fn cron_schedule(&self) -> Option<&str> {
        match &self.trigger {
            TriggerConfig::Schedule { cron } => Some(cron.as_str()),
            _ => None,
        }
    }
}

/// Snapshot of the nodes and edges taken at run start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
}

/// A single step in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node identifier within the workflow (e.g. "http", "send-mail")
    pub id: String,
    /// Handler discriminator ("http", "condition", "loop", ...)
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    /// Node parameters, may contain `{{...}}` templates
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Directed connection between two nodes
///
/// `source_handle` is only meaningful on edges leaving a condition node,
/// where it names the branch ("true"/"false") the edge belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSpec {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

/// Automatic trigger attached to a workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Only started through the API
    #[default]
    Manual,
    /// Started by `/webhook/{workflow_id}`
    Webhook,
    /// Started by the cron scheduler, e.g. `{"type":"schedule","cron":"0 */5 * * * *"}`
    Schedule { cron: String },
}

/// Where a run request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Webhook,
    Schedule,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Webhook => "webhook",
            TriggerSource::Schedule => "schedule",
        }
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "webhook" => Ok(TriggerSource::Webhook),
            "schedule" => Ok(TriggerSource::Schedule),
            other => Err(anyhow::anyhow!("Unknown trigger source: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_from_editor_json() {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": "wf-1",
            "userId": "u-1",
            "name": "Notify",
            "trigger": { "type": "schedule", "cron": "0 0 * * * *" },
            "nodes": [
                { "id": "check", "type": "condition", "config": { "condition": "1 > 0" } },
                { "id": "notify", "type": "slack", "label": "Ping", "config": {} }
            ],
            "edges": [
                { "id": "e1", "source": "check", "target": "notify", "sourceHandle": "true" }
            ]
        }))
        .unwrap();

        assert!(workflow.active);
        assert_eq!(workflow.cron_schedule(), Some("0 0 * * * *"));
        assert_eq!(workflow.nodes[0].node_type, "condition");
        assert_eq!(workflow.edges[0].source_handle.as_deref(), Some("true"));
    }

    #[test]
    fn test_trigger_defaults_to_manual() {
        let workflow: Workflow =
            serde_json::from_value(json!({ "id": "wf", "name": "n" })).unwrap();
        assert_eq!(workflow.trigger, TriggerConfig::Manual);
        assert!(workflow.cron_schedule().is_none());
        assert!(workflow.nodes.is_empty());
    }

    #[test]
    fn test_trigger_source_round_trips_through_str() {
        for source in [TriggerSource::Manual, TriggerSource::Webhook, TriggerSource::Schedule] {
            assert_eq!(source.as_str().parse::<TriggerSource>().unwrap(), source);
        }
        assert!("cron".parse::<TriggerSource>().is_err());
    }
}
