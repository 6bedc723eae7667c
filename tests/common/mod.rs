#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use flowrunner::{
    config::IntegrationConfig,
    credentials::MemoryCredentialStore,
    error::{ExecutionFailed, NodeError},
    execution::{ExecutionRecord, MemoryExecutionStore},
    nodes::{HandlerDeps, NodeHandler, NodeHandlerRegistry, NodeOutcome},
    runtime::{progress::BroadcastPublisher, queue::RunJob, ExecutionContext, WorkflowExecutor},
    workflow::{TriggerSource, Workflow, WorkflowRegistry},
};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

pub const USER: &str = "alice";
pub const WORKFLOW_ID: &str = "wf";

/// Serve `app` on an ephemeral port and return its base URL
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Built-in handlers talking to local stubs
pub fn builtins(api_base: &str, credentials: MemoryCredentialStore) -> NodeHandlerRegistry {
    NodeHandlerRegistry::with_builtins(HandlerDeps {
        http: reqwest::Client::new(),
        credentials: Arc::new(credentials),
        integrations: IntegrationConfig {
            slack_api_base: api_base.to_string(),
            gmail_api_base: api_base.to_string(),
            sheets_api_base: api_base.to_string(),
            oauth_clients: HashMap::new(),
        },
    })
}

/// Echoes its resolved config as output and remembers every call
#[derive(Clone, Default)]
pub struct Recorder {
    pub seen: Arc<Mutex<Vec<Value>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeHandler for Recorder {
    async fn execute(&self, config: &Value, _ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        self.seen.lock().unwrap().push(config.clone());
        Ok(NodeOutcome::success(config.clone()))
    }
}

/// Returns a fixed output
pub struct Fixed(pub Value);

#[async_trait]
impl NodeHandler for Fixed {
    async fn execute(&self, _config: &Value, _ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::success(self.0.clone()))
    }
}

/// Always reports failure
pub struct Failing;

#[async_trait]
impl NodeHandler for Failing {
    async fn execute(&self, _config: &Value, _ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::failure("boom"))
    }
}

/// Fails but asks the executor to keep going
pub struct Tolerated;

#[async_trait]
impl NodeHandler for Tolerated {
    async fn execute(&self, _config: &Value, _ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome {
            continue_on_error: true,
            ..NodeOutcome::failure("rate limited")
        })
    }
}

pub struct Harness {
    pub registry: Arc<WorkflowRegistry>,
    pub store: MemoryExecutionStore,
    pub progress: Arc<BroadcastPublisher>,
    executor: WorkflowExecutor,
}

impl Harness {
    pub fn new(handlers: NodeHandlerRegistry) -> Self {
        let registry = Arc::new(WorkflowRegistry::detached());
        let store = MemoryExecutionStore::new();
        let progress = Arc::new(BroadcastPublisher::default());
        let executor = WorkflowExecutor::new(
            registry.clone(),
            Arc::new(store.clone()),
            Arc::new(handlers),
            progress.clone(),
        );
        Self {
            registry,
            store,
            progress,
            executor,
        }
    }

    /// Install the workflow `wf` owned by alice
    pub fn install(&self, nodes: Value, edges: Value) {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": WORKFLOW_ID,
            "userId": USER,
            "name": "test workflow",
            "nodes": nodes,
            "edges": edges,
        }))
        .unwrap();
        self.registry.upsert(workflow);
    }

    pub async fn run(&self, trigger: Value) -> (Result<String, ExecutionFailed>, ExecutionRecord) {
        self.run_as(USER, trigger).await
    }

    pub async fn run_as(&self, user: &str, trigger: Value) -> (Result<String, ExecutionFailed>, ExecutionRecord) {
        let job = RunJob::new(WORKFLOW_ID, user, trigger, TriggerSource::Manual);
        let result = self.executor.execute_workflow(&job).await;
        let record = self.store.records().pop().unwrap();
        (result, record)
    }
}

pub fn node(id: &str, node_type: &str, config: Value) -> Value {
    json!({ "id": id, "type": node_type, "config": config })
}

pub fn edge(source: &str, target: &str) -> Value {
    json!({ "id": format!("{}->{}", source, target), "source": source, "target": target })
}

pub fn branch(source: &str, target: &str, handle: &str) -> Value {
    json!({
        "id": format!("{}->{}", source, target),
        "source": source,
        "target": target,
        "sourceHandle": handle,
    })
}

/// (node id, status) of every log in order
pub fn statuses(record: &ExecutionRecord) -> Vec<(String, String)> {
    record
        .logs
        .iter()
        .map(|log| (log.node_id.clone(), log.status.as_str().to_string()))
        .collect()
}

pub fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
        .iter()
        .map(|(id, status)| (id.to_string(), status.to_string()))
        .collect()
}
