//! Progress tracking for a single execution.
//!
//! The progress graph mirrors the workflow graph and tracks per-node step
//! status as the run advances:
//!
//! - An edge *delivers* when its source succeeded and the edge is either
//!   unlabeled or matches the branch outcome the source selected.
//! - A pending node is **ready** when all predecessors are terminal and at
//!   least one incoming edge delivers (entry nodes are ready immediately).
//! - A pending node is **skippable** when all predecessors are terminal
//!   and no incoming edge delivers: its upstream failed, was skipped, or a
//!   condition chose another branch. Skips cascade, which is what drains
//!   the graph gracefully after a failure.

use crate::edge::BranchOutcome;
use crate::execution::StepStatus;
use crate::graph::WorkflowGraph;
use crate::node::NodeId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// Tracks which nodes of a run have executed, and with what result.
#[derive(Debug, Clone)]
pub struct ProgressGraph {
    /// Mirror of the workflow graph: node weights are NodeIds, edge
    /// weights are the branch labels.
    graph: DiGraph<NodeId, Option<BranchOutcome>>,
    /// Map from NodeId to graph index for O(1) lookup.
    node_to_index: HashMap<NodeId, NodeIndex>,
    /// Per-node step status.
    status: HashMap<NodeId, StepStatus>,
    /// Branch outcome selected by each finished condition node.
    outcomes: HashMap<NodeId, BranchOutcome>,
}

impl ProgressGraph {
    /// Creates a progress graph from a workflow graph.
    ///
    /// Initially all nodes are pending.
    #[must_use]
    pub fn from_workflow(workflow_graph: &WorkflowGraph) -> Self {
        let mut graph = DiGraph::new();
        let mut node_to_index = HashMap::new();
        let mut status = HashMap::new();

        for node in workflow_graph.nodes() {
            let idx = graph.add_node(node.id);
            node_to_index.insert(node.id, idx);
            status.insert(node.id, StepStatus::Pending);
        }

        for node in workflow_graph.nodes() {
            let source_idx = node_to_index[&node.id];
            for (successor, edge) in workflow_graph.successors(node.id) {
                let target_idx = node_to_index[&successor.id];
                graph.add_edge(source_idx, target_idx, edge.branch);
            }
        }

        Self {
            graph,
            node_to_index,
            status,
            outcomes: HashMap::new(),
        }
    }

    /// Marks a node as currently executing.
    pub fn mark_running(&mut self, node_id: NodeId) {
        self.status.insert(node_id, StepStatus::Running);
    }

    /// Marks a node as succeeded.
    pub fn mark_success(&mut self, node_id: NodeId) {
        self.status.insert(node_id, StepStatus::Success);
    }

    /// Marks a condition node as succeeded with the selected branch.
    pub fn mark_success_with_outcome(&mut self, node_id: NodeId, outcome: BranchOutcome) {
        self.status.insert(node_id, StepStatus::Success);
        self.outcomes.insert(node_id, outcome);
    }

    /// Marks a node as failed.
    pub fn mark_failed(&mut self, node_id: NodeId) {
        self.status.insert(node_id, StepStatus::Failed);
    }

    /// Marks a node as skipped.
    pub fn mark_skipped(&mut self, node_id: NodeId) {
        self.status.insert(node_id, StepStatus::Skipped);
    }

    /// Returns the current status of a node.
    #[must_use]
    pub fn status(&self, node_id: NodeId) -> Option<StepStatus> {
        self.status.get(&node_id).copied()
    }

    /// Returns true when an incoming edge delivers to its target.
    fn edge_delivers(&self, source_id: NodeId, label: Option<BranchOutcome>) -> bool {
        if self.status.get(&source_id) != Some(&StepStatus::Success) {
            return false;
        }
        match label {
            None => true,
            Some(label) => self.outcomes.get(&source_id) == Some(&label),
        }
    }

    /// Classifies a pending node once all its predecessors are terminal.
    ///
    /// Returns `None` while a predecessor is still pending or running.
    fn resolve_pending(&self, idx: NodeIndex) -> Option<bool> {
        let mut any_incoming = false;
        let mut any_delivers = false;

        for edge in self.graph.edges_directed(idx, Direction::Incoming) {
            any_incoming = true;
            let source_id = self.graph[edge.source()];
            let source_status = self.status.get(&source_id).copied()?;
            if !source_status.is_terminal() {
                return None;
            }
            if self.edge_delivers(source_id, *edge.weight()) {
                any_delivers = true;
            }
        }

        // Entry nodes run unconditionally.
        Some(!any_incoming || any_delivers)
    }

    /// Returns pending nodes that are ready to execute, in declaration order.
    #[must_use]
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.pending_resolved(true)
    }

    /// Returns pending nodes that can never receive input and must be
    /// skipped, in declaration order.
    #[must_use]
    pub fn skippable_nodes(&self) -> Vec<NodeId> {
        self.pending_resolved(false)
    }

    fn pending_resolved(&self, runnable: bool) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter_map(|idx| {
                let node_id = self.graph[idx];
                if self.status.get(&node_id) != Some(&StepStatus::Pending) {
                    return None;
                }
                (self.resolve_pending(idx)? == runnable).then_some(node_id)
            })
            .collect()
    }

    /// Returns nodes that are currently running, in declaration order.
    #[must_use]
    pub fn running_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx])
            .filter(|id| self.status.get(id) == Some(&StepStatus::Running))
            .collect()
    }

    /// Returns nodes that have not reached a terminal state, in
    /// declaration order.
    #[must_use]
    pub fn non_terminal_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx])
            .filter(|id| {
                self.status
                    .get(id)
                    .is_some_and(|status| !status.is_terminal())
            })
            .collect()
    }

    /// Returns true when every node is terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.values().all(StepStatus::is_terminal)
    }

    /// Returns true if any node has failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.status.values().any(|s| *s == StepStatus::Failed)
    }
}
