//! Petgraph-backed workflow DAG
//!
//! Builds a `DiGraph` from a graph snapshot, orders it with Kahn's algorithm
//! and answers the reachability questions the executor asks while walking
//! (branch liveness, loop bodies).

use crate::error::EngineError;
use crate::workflow::types::{EdgeSpec, NodeSpec, WorkflowGraph};
use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, EdgeRef, Reversed},
    Direction,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Edge payload kept on the petgraph edge
#[derive(Debug, Clone)]
pub struct EdgeMeta {
    pub id: String,
    pub source_handle: Option<String>,
}

/// A workflow graph ready for ordering and traversal
///
/// Node indices follow the insertion order of `WorkflowGraph::nodes`.
#[derive(Debug)]
pub struct ExecutionGraph {
    graph: DiGraph<NodeSpec, EdgeMeta>,
    index_by_id: HashMap<String, NodeIndex>,
}

impl ExecutionGraph {
    /// Build the DAG, rejecting duplicate node ids and dangling edges
    pub fn build(snapshot: &WorkflowGraph) -> Result<Self, EngineError> {
        tracing::debug!(
            "🏗️ Building workflow graph '{}' with {} nodes and {} edges",
            snapshot.name,
            snapshot.nodes.len(),
            snapshot.edges.len()
        );

        let mut graph = DiGraph::with_capacity(snapshot.nodes.len(), snapshot.edges.len());
        let mut index_by_id = HashMap::with_capacity(snapshot.nodes.len());

        for node in &snapshot.nodes {
            if index_by_id.contains_key(&node.id) {
                return Err(EngineError::DuplicateNode(node.id.clone()));
            }
            let index = graph.add_node(node.clone());
            index_by_id.insert(node.id.clone(), index);
        }

        for edge in &snapshot.edges {
            let source = lookup(&index_by_id, edge, &edge.source)?;
            let target = lookup(&index_by_id, edge, &edge.target)?;
            graph.add_edge(
                source,
                target,
                EdgeMeta {
                    id: edge.id.clone(),
                    source_handle: edge.source_handle.clone(),
                },
            );
        }

        Ok(Self { graph, index_by_id })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, index: NodeIndex) -> &NodeSpec {
        &self.graph[index]
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.index_by_id.get(node_id).copied()
    }

    /// Kahn's algorithm with a FIFO queue
    ///
    /// Nodes that become ready at the same step are enqueued in insertion
    /// order, so the result is fully deterministic. A cycle yields
    /// `EngineError::Cycle` and no partial order.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, EngineError> {
        let total = self.graph.node_count();
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| self.graph.edges_directed(index, Direction::Incoming).count())
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|index| in_degree[index.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(total);

        while let Some(current) = queue.pop_front() {
            order.push(current);

            let mut ready = Vec::new();
            for edge in self.graph.edges_directed(current, Direction::Outgoing) {
                let target = edge.target();
                in_degree[target.index()] -= 1;
                if in_degree[target.index()] == 0 {
                    ready.push(target);
                }
            }
            ready.sort();
            queue.extend(ready);
        }

        if order.len() < total {
            tracing::error!("❌ Workflow contains cycles - must be a DAG");
            return Err(EngineError::Cycle {
                ordered: order.len(),
                total,
            });
        }

        Ok(order)
    }

    /// Incoming edges of a node as (source, edge payload)
    pub fn incoming(&self, index: NodeIndex) -> impl Iterator<Item = (NodeIndex, &EdgeMeta)> {
        self.graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| (edge.source(), edge.weight()))
    }

    pub fn has_incoming(&self, index: NodeIndex) -> bool {
        self.graph
            .edges_directed(index, Direction::Incoming)
            .next()
            .is_some()
    }

    /// Every node reachable from `start`, excluding `start` itself
    pub fn descendants(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut dfs = Dfs::new(&self.graph, start);
        let mut reachable = HashSet::new();
        while let Some(next) = dfs.next(&self.graph) {
            if next != start {
                reachable.insert(next);
            }
        }
        reachable
    }

    /// Every node `target` is reachable from, excluding `target` itself
    pub fn ancestors(&self, target: NodeIndex) -> HashSet<NodeIndex> {
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, target);
        let mut upstream = HashSet::new();
        while let Some(next) = dfs.next(reversed) {
            if next != target {
                upstream.insert(next);
            }
        }
        upstream
    }
}

fn lookup(
    index_by_id: &HashMap<String, NodeIndex>,
    edge: &EdgeSpec,
    node_id: &str,
) -> Result<NodeIndex, EngineError> {
    index_by_id
        .get(node_id)
        .copied()
        .ok_or_else(|| EngineError::UnknownNode {
            edge_id: edge.id.clone(),
            node_id: node_id.to_string(),
        })
}

/// Order node ids of `nodes`/`edges` so that every node follows its dependencies
pub fn order(nodes: &[NodeSpec], edges: &[EdgeSpec]) -> Result<Vec<String>, EngineError> {
    let snapshot = WorkflowGraph {
        name: String::new(),
        nodes: nodes.to_vec(),
        edges: edges.to_vec(),
    };
    let graph = ExecutionGraph::build(&snapshot)?;
    Ok(graph
        .topological_order()?
        .into_iter()
        .map(|index| graph.node(index).id.clone())
        .collect())
}
