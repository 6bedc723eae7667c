//! Per-run execution context
//!
//! Owned by exactly one in-flight run and threaded mutably through the walk.
//! Node outputs are single-assignment: at the top level once per run, inside
//! a loop once per iteration (the iteration scope lives on the `LoopFrame`).

use crate::error::EngineError;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// State of one active loop
#[derive(Debug, Clone)]
pub struct LoopFrame {
    pub items: Vec<Value>,
    pub current_index: usize,
    pub current_item: Value,
    /// Alias usable as `{{loop.<name>}}` for the current item
    pub loop_variable: String,
    /// The source as configured on the loop node, for logs and diagnostics
    pub source_expression: String,
    /// Outputs recorded by body nodes during the current iteration
    scope_outputs: HashMap<String, Value>,
}

impl LoopFrame {
    pub fn new(items: Vec<Value>, loop_variable: String, source_expression: String) -> Self {
        let current_item = items.first().cloned().unwrap_or(Value::Null);
        Self {
            items,
            current_index: 0,
            current_item,
            loop_variable,
            source_expression,
            scope_outputs: HashMap::new(),
        }
    }

    /// Move to item `index` and start a fresh iteration scope
    pub fn enter_iteration(&mut self, index: usize) {
        self.current_index = index;
        self.current_item = self.items.get(index).cloned().unwrap_or(Value::Null);
        self.scope_outputs.clear();
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn scope_output(&self, node_id: &str) -> Option<&Value> {
        self.scope_outputs.get(node_id)
    }
}

/// Mutable state of a single workflow run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Values set by `variable` nodes
    pub variables: Map<String, Value>,
    /// Raw payload that started the run
    pub trigger: Value,
    /// Owner of the run
    pub user_id: String,
    /// Active loops, innermost last
    pub loop_stack: Vec<LoopFrame>,
    node_outputs: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(user_id: impl Into<String>, trigger: Value) -> Self {
        Self {
            variables: Map::new(),
            trigger,
            user_id: user_id.into(),
            loop_stack: Vec::new(),
            node_outputs: HashMap::new(),
        }
    }

    /// The innermost active loop
    pub fn current_loop(&self) -> Option<&LoopFrame> {
        self.loop_stack.last()
    }

    pub fn current_loop_mut(&mut self) -> Option<&mut LoopFrame> {
        self.loop_stack.last_mut()
    }

    /// Current scope depth: 0 at top level, n inside n nested loops
    pub fn scope_depth(&self) -> usize {
        self.loop_stack.len()
    }

    /// Output of a node as visible from the current scope
    ///
    /// Loop iteration scopes shadow outer scopes, innermost first.
    pub fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.loop_stack
            .iter()
            .rev()
            .find_map(|frame| frame.scope_output(node_id))
            .or_else(|| self.node_outputs.get(node_id))
    }

    /// Record a node output in the scope at `depth`
    ///
    /// Fails if the node already wrote an output in that scope.
    pub fn record_output_at(
        &mut self,
        depth: usize,
        node_id: &str,
        output: Value,
    ) -> Result<(), EngineError> {
        let scope = if depth == 0 {
            &mut self.node_outputs
        } else {
            match self.loop_stack.get_mut(depth - 1) {
                Some(frame) => &mut frame.scope_outputs,
                None => &mut self.node_outputs,
            }
        };

        if scope.contains_key(node_id) {
            return Err(EngineError::OutputAlreadyRecorded(node_id.to_string()));
        }
        scope.insert(node_id.to_string(), output);
        Ok(())
    }

    /// Record a node output in the current scope
    pub fn record_output(&mut self, node_id: &str, output: Value) -> Result<(), EngineError> {
        self.record_output_at(self.scope_depth(), node_id, output)
    }

    /// Top-level outputs, keyed by node id
    pub fn node_outputs(&self) -> &HashMap<String, Value> {
        &self.node_outputs
    }

    /// Context as JSON with credential-shaped keys redacted
    pub fn sanitized_snapshot(&self) -> Value {
        let loops: Vec<Value> = self
            .loop_stack
            .iter()
            .map(|frame| {
                json!({
                    "source": frame.source_expression,
                    "loopVariable": frame.loop_variable,
                    "index": frame.current_index,
                    "count": frame.item_count(),
                })
            })
            .collect();

        let snapshot = json!({
            "userId": self.user_id,
            "variables": self.variables,
            "trigger": self.trigger,
            "nodeOutputs": self.node_outputs,
            "loops": loops,
        });
        redact(&snapshot)
    }
}

const SENSITIVE_KEY_PARTS: [&str; 6] = ["password", "secret", "token", "key", "auth", "credential"];

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

/// Replace the values of credential-shaped keys with `"[REDACTED]"`, recursively
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}
