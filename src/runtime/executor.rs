//! Workflow executor: walks the ordered DAG for one run
//!
//! Every run gets a fresh `ExecutionContext` and a petgraph view of the
//! workflow snapshot. Nodes execute strictly in topological order. A node
//! runs only if it has no incoming edges or at least one live incoming edge;
//! an edge is live when its source executed and, for condition sources, the
//! edge's `sourceHandle` is absent or matches the chosen branch. Nodes that
//! are not reached this way are logged as `skipped`.
//!
//! A `loop` node owns every node reachable from it. Nodes outside the loop
//! that the body depends on run first, ahead of the loop node. After the loop handler
//! pushes its frame, that body is walked once per item with fresh
//! per-iteration state. When the loop finishes, each body node's
//! per-iteration outputs are recorded in the enclosing scope as one array.

use crate::{
    error::{EngineError, ExecutionFailed, NodeError},
    execution::{ExecutionLogSink, ExecutionStatus, NewExecution, NodeLog, NodeStatus},
    nodes::{NodeHandlerRegistry, NodeKind, NodeOutcome},
    runtime::{
        context::ExecutionContext,
        graph::ExecutionGraph,
        progress::{ProgressPublisher, ProgressReporter},
        queue::RunJob,
        resolver,
    },
    workflow::registry::WorkflowStore,
};
use chrono::Utc;
use petgraph::graph::NodeIndex;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Instant,
};

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

/// Drives runs through the handler registry and records their history
pub struct WorkflowExecutor {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionLogSink>,
    handlers: Arc<NodeHandlerRegistry>,
    progress: Arc<dyn ProgressPublisher>,
}

/// Mutable state of one walk, shared by nested loop walks
struct RunState<'g> {
    graph: &'g ExecutionGraph,
    execution_id: String,
    attempt: u32,
    ctx: ExecutionContext,
    /// Nodes that ran in the current scope (success or continued failure)
    executed: HashSet<NodeIndex>,
    /// Branch chosen by each executed condition node; `None` if it failed
    branches: HashMap<NodeIndex, Option<String>>,
    /// Ids of nodes that succeeded, in execution order
    completed: Vec<String>,
    steps: usize,
    reporter: ProgressReporter,
}

/// Why a run stopped, with whatever diagnostics were available
struct RunFailure {
    error: EngineError,
    failed_node_type: Option<String>,
    completed: Vec<String>,
    context: Option<Value>,
}

impl From<EngineError> for RunFailure {
    fn from(error: EngineError) -> Self {
        Self {
            error,
            failed_node_type: None,
            completed: Vec::new(),
            context: None,
        }
    }
}

impl WorkflowExecutor {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionLogSink>,
        handlers: Arc<NodeHandlerRegistry>,
        progress: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self {
            workflows,
            executions,
            handlers,
            progress,
        }
    }

    /// Execute one run request end to end
    ///
    /// Returns the execution id. Any fatal abort marks the record `failed`
    /// and is returned as `ExecutionFailed` so the queue can redeliver.
    pub async fn execute_workflow(&self, job: &RunJob) -> Result<String, ExecutionFailed> {
        let execution_id = self
            .executions
            .create_record(NewExecution {
                workflow_id: job.workflow_id.clone(),
                user_id: job.user_id.clone(),
                trigger_payload: job.trigger_payload.clone(),
                trigger_source: job.trigger_source,
                attempt: job.attempt,
            })
            .await
            .map_err(|e| ExecutionFailed {
                execution_id: None,
                source: EngineError::Store(e),
            })?;

        let reporter = ProgressReporter::new(
            Arc::clone(&self.progress),
            &job.user_id,
            &job.workflow_id,
            &execution_id,
        );
        let started = Instant::now();
        tracing::info!(
            "🚀 Starting workflow execution {} for workflow {} (attempt {}, source {})",
            execution_id,
            job.workflow_id,
            job.attempt,
            job.trigger_source.as_str()
        );

        match self.run(&execution_id, job, &reporter).await {
            Ok(()) => {
                reporter.emit_completed(ExecutionStatus::Success, None);
                tracing::info!(
                    "🎉 Workflow '{}' execution {} completed successfully in {:?}",
                    job.workflow_id,
                    execution_id,
                    started.elapsed()
                );
                Ok(execution_id)
            }
            Err(failure) => {
                self.record_failure(&execution_id, job, &failure).await;
                reporter.emit_completed(ExecutionStatus::Failed, Some(failure.error.to_string()));
                tracing::error!(
                    "❌ Workflow '{}' execution {} failed after {:?}: {}",
                    job.workflow_id,
                    execution_id,
                    started.elapsed(),
                    failure.error
                );
                Err(ExecutionFailed {
                    execution_id: Some(execution_id),
                    source: failure.error,
                })
            }
        }
    }

    async fn run(&self, execution_id: &str, job: &RunJob, reporter: &ProgressReporter) -> Result<(), RunFailure> {
        self.executions
            .set_status(execution_id, ExecutionStatus::Running)
            .await
            .map_err(EngineError::Store)?;

        let snapshot = self
            .workflows
            .load_graph(&job.workflow_id, &job.user_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or_else(|| EngineError::WorkflowNotFound {
                workflow_id: job.workflow_id.clone(),
            })?;
        if snapshot.nodes.is_empty() {
            return Err(EngineError::EmptyWorkflow(snapshot.name).into());
        }

        let graph = ExecutionGraph::build(&snapshot)?;
        let order = graph.topological_order()?;
        if order.is_empty() {
            return Err(EngineError::EmptyWorkflow(snapshot.name).into());
        }
        tracing::debug!(
            "📋 Execution order: {:?}",
            order.iter().map(|&i| graph.node(i).id.as_str()).collect::<Vec<_>>()
        );

        reporter.emit_started(graph.node_count());
        let mut state = RunState {
            graph: &graph,
            execution_id: execution_id.to_string(),
            attempt: job.attempt,
            ctx: ExecutionContext::new(job.user_id.clone(), job.trigger_payload.clone()),
            executed: HashSet::new(),
            branches: HashMap::new(),
            completed: Vec::new(),
            steps: 0,
            reporter: reporter.clone(),
        };

        let walked = match self.walk(&mut state, &order).await {
            Ok(()) => self
                .executions
                .set_status(execution_id, ExecutionStatus::Success)
                .await
                .map_err(EngineError::Store),
            Err(error) => Err(error),
        };

        walked.map_err(|error| RunFailure {
            failed_node_type: error
                .node_id()
                .and_then(|id| graph.index_of(id))
                .map(|index| graph.node(index).node_type.clone()),
            error,
            completed: std::mem::take(&mut state.completed),
            context: Some(state.ctx.sanitized_snapshot()),
        })
    }

    /// Persist the structured failure payload and the terminal status
    ///
    /// Store problems here are logged only; the run is already failing.
    async fn record_failure(&self, execution_id: &str, job: &RunJob, failure: &RunFailure) {
        let payload = json!({
            "message": failure.error.to_string(),
            "failedNodeId": failure.error.node_id(),
            "failedNodeType": failure.failed_node_type,
            "completedNodes": failure.completed,
            "context": failure.context,
            "attempt": job.attempt,
        });
        if let Err(e) = self.executions.set_error(execution_id, payload).await {
            tracing::warn!("⚠️ Could not store error for execution {}: {}", execution_id, e);
        }
        if let Err(e) = self.executions.set_status(execution_id, ExecutionStatus::Failed).await {
            tracing::warn!("⚠️ Could not mark execution {} failed: {}", execution_id, e);
        }
    }

    /// Walk `order` once, running loop bodies as they are reached
    fn walk<'a, 'g: 'a>(&'a self, state: &'a mut RunState<'g>, order: &'a [NodeIndex]) -> WalkFuture<'a> {
        Box::pin(async move {
            let graph = state.graph;
            // loop bodies already handled by their loop node in this walk
            let mut consumed: HashSet<NodeIndex> = HashSet::new();

            for (position, &index) in order.iter().enumerate() {
                if consumed.contains(&index) {
                    continue;
                }
                if !is_active(state, index) {
                    self.log_skipped(state, index).await?;
                    continue;
                }

                let is_loop = NodeKind::from_type(&graph.node(index).node_type) == Some(NodeKind::Loop);
                if is_loop {
                    // body inputs from outside the loop must exist before the first iteration
                    let prerequisites = outside_prerequisites(graph, &order[position + 1..], index, &consumed);
                    if !prerequisites.is_empty() {
                        tracing::debug!(
                            "📋 Loop '{}' waits on {:?}",
                            graph.node(index).id,
                            prerequisites.iter().map(|&i| graph.node(i).id.as_str()).collect::<Vec<_>>()
                        );
                        consumed.extend(prerequisites.iter().copied());
                        self.walk(state, &prerequisites).await?;
                    }
                }

                let depth = state.ctx.scope_depth();
                let succeeded = self.execute_node(state, index).await?;
                let opened_loop = state.ctx.scope_depth() > depth;
                if !opened_loop && !is_loop {
                    continue;
                }

                let reachable = graph.descendants(index);
                let body: Vec<NodeIndex> = order[position + 1..]
                    .iter()
                    .copied()
                    .filter(|i| reachable.contains(i))
                    .collect();
                consumed.extend(body.iter().copied());

                if succeeded && opened_loop {
                    self.run_loop(state, index, &body).await?;
                } else {
                    for &skipped in &body {
                        self.log_skipped(state, skipped).await?;
                    }
                }
            }
            Ok(())
        })
    }

    async fn run_loop(&self, state: &mut RunState<'_>, loop_index: NodeIndex, body: &[NodeIndex]) -> Result<(), EngineError> {
        let graph = state.graph;
        let loop_id = &graph.node(loop_index).id;
        let count = state.ctx.current_loop().map(|frame| frame.item_count()).unwrap_or(0);
        tracing::info!("🔁 Loop '{}' running {} body nodes over {} items", loop_id, body.len(), count);

        if count == 0 {
            state.ctx.loop_stack.pop();
            for &skipped in body {
                self.log_skipped(state, skipped).await?;
            }
            return Ok(());
        }

        let mut per_node: Vec<Vec<Value>> = vec![Vec::with_capacity(count); body.len()];
        for iteration in 0..count {
            if let Some(frame) = state.ctx.current_loop_mut() {
                frame.enter_iteration(iteration);
            }
            for index in body {
                state.executed.remove(index);
                state.branches.remove(index);
            }
            tracing::debug!("🔁 Loop '{}' iteration {}/{}", loop_id, iteration + 1, count);

            // on error the frame stays pushed so the failure snapshot shows the position
            self.walk(state, body).await?;

            for (slot, &index) in body.iter().enumerate() {
                let output = state
                    .ctx
                    .current_loop()
                    .and_then(|frame| frame.scope_output(&graph.node(index).id))
                    .cloned()
                    .unwrap_or(Value::Null);
                per_node[slot].push(output);
            }
        }
        state.ctx.loop_stack.pop();

        for (slot, &index) in body.iter().enumerate() {
            let outputs = std::mem::take(&mut per_node[slot]);
            if outputs.iter().any(|output| !output.is_null()) {
                state.ctx.record_output(&graph.node(index).id, Value::Array(outputs))?;
            }
        }
        Ok(())
    }

    /// Run one node; `Ok(false)` means it failed but the run continues
    async fn execute_node(&self, state: &mut RunState<'_>, index: NodeIndex) -> Result<bool, EngineError> {
        let graph = state.graph;
        let node = graph.node(index);

        let config = resolver::resolve_deep(&Value::Object(node.config.clone()), &state.ctx);
        let handler = self
            .handlers
            .get(&node.node_type)
            .ok_or_else(|| EngineError::MissingHandler {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            })?;

        state.steps += 1;
        state.reporter.emit_progress(state.steps, graph.node_count(), &node.id);
        tracing::info!("📍 Step {}: executing node '{}' (type: {})", state.steps, node.id, node.node_type);

        let depth = state.ctx.scope_depth();
        let start_time = Utc::now();
        let timer = Instant::now();
        let (outcome, invalid_loop_source) = match handler.execute(&config, &mut state.ctx).await {
            Ok(outcome) => (outcome, false),
            Err(e) => {
                let invalid_loop_source = matches!(e, NodeError::InvalidLoopSource(_));
                (NodeOutcome::failure(e.to_string()), invalid_loop_source)
            }
        };
        let duration_ms = timer.elapsed().as_millis() as i64;
        let branching = NodeKind::from_type(&node.node_type)
            .map(|kind| kind.is_branching())
            .unwrap_or(false);

        let mut log = NodeLog {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Success,
            input: config.clone(),
            output: None,
            error: None,
            attempt_number: state.attempt,
            start_time,
            end_time: Utc::now(),
            duration_ms,
        };

        if outcome.success {
            state.ctx.record_output_at(depth, &node.id, outcome.output.clone())?;
            state.executed.insert(index);
            if branching {
                let branch = outcome.output.get("branch").and_then(Value::as_str).map(str::to_string);
                state.branches.insert(index, branch);
            }

            log.output = Some(outcome.output);
            self.executions.append_log(&state.execution_id, &log).await?;
            state.completed.push(node.id.clone());
            state
                .reporter
                .emit_node_completed(&node.id, &node.node_type, NodeStatus::Success, duration_ms);
            tracing::info!("✅ Node '{}' completed in {}ms", node.id, duration_ms);
            return Ok(true);
        }

        let message = outcome.error.clone().unwrap_or_else(|| "node reported failure".to_string());
        let continue_on_error = outcome.continue_on_error || is_truthy(config.get("continueOnError"));

        log.status = NodeStatus::Failed;
        log.error = Some(message.clone());
        log.output = if continue_on_error {
            Some(json!({ "error": true, "message": message }))
        } else if outcome.output.is_null() {
            None
        } else {
            Some(outcome.output.clone())
        };
        self.executions.append_log(&state.execution_id, &log).await?;
        state
            .reporter
            .emit_node_completed(&node.id, &node.node_type, NodeStatus::Failed, duration_ms);

        if continue_on_error {
            tracing::warn!("⚠️ Node '{}' failed, continuing on error: {}", node.id, message);
            state
                .ctx
                .record_output_at(depth, &node.id, json!({ "error": true, "message": message }))?;
            state.executed.insert(index);
            if branching {
                state.branches.insert(index, None);
            }
            return Ok(false);
        }

        tracing::error!("❌ Node '{}' failed: {}", node.id, message);
        Err(if invalid_loop_source {
            EngineError::InvalidLoopSource {
                node_id: node.id.clone(),
                message,
            }
        } else {
            EngineError::NodeExecution {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                message,
            }
        })
    }

    async fn log_skipped(&self, state: &mut RunState<'_>, index: NodeIndex) -> Result<(), EngineError> {
        let node = state.graph.node(index);
        tracing::debug!("⏭️ Skipping node '{}': no live incoming edge", node.id);
        let log = NodeLog::skipped(&node.id, &node.node_type, state.attempt);
        self.executions.append_log(&state.execution_id, &log).await?;
        state
            .reporter
            .emit_node_completed(&node.id, &node.node_type, NodeStatus::Skipped, 0);
        Ok(())
    }
}

/// Nodes in `rest` outside the loop body that some body node depends on
///
/// Returned in `rest` order, which is topological.
fn outside_prerequisites(
    graph: &ExecutionGraph,
    rest: &[NodeIndex],
    loop_index: NodeIndex,
    consumed: &HashSet<NodeIndex>,
) -> Vec<NodeIndex> {
    let body = graph.descendants(loop_index);
    let upstream: HashSet<NodeIndex> = rest
        .iter()
        .filter(|index| body.contains(index))
        .flat_map(|&index| graph.ancestors(index))
        .collect();
    rest.iter()
        .copied()
        .filter(|index| upstream.contains(index) && !body.contains(index) && !consumed.contains(index))
        .collect()
}

/// Roots always run; other nodes need one live incoming edge
fn is_active(state: &RunState<'_>, index: NodeIndex) -> bool {
    if !state.graph.has_incoming(index) {
        return true;
    }
    state.graph.incoming(index).any(|(source, edge)| {
        if !state.executed.contains(&source) {
            return false;
        }
        match (state.branches.get(&source), &edge.source_handle) {
            (None, _) | (Some(_), None) => true,
            (Some(chosen), Some(handle)) => chosen.as_deref() == Some(handle.as_str()),
        }
    })
}

/// `true`, `"true"` or a non-zero number
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
        _ => false,
    }
}
