//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed acyclic graphs where nodes are typed steps and
//! edges carry optional condition branch labels. The graph structure
//! serializes as `{nodes, edges}` JSON for storage and transport.
//!
//! Node declaration order is significant: it breaks ties in the
//! topological order, making execution scheduling deterministic.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::{Node, NodeId, NodeKind};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    #[serde(with = "graph_serde")]
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    #[serde(skip)]
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
        }
    }

    /// Adds a node to the graph.
    ///
    /// Returns the node ID.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let node_id = node.id;
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        node_id
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight(*index)
    }

    /// Adds an edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DanglingEdge`] if either endpoint is not in
    /// the graph.
    pub fn add_edge(
        &mut self,
        source_id: NodeId,
        target_id: NodeId,
        edge: Edge,
    ) -> Result<(), GraphError> {
        let source_index = *self.node_index_map.get(&source_id).ok_or(
            GraphError::DanglingEdge {
                from: Some(source_id),
                to: Some(target_id),
            },
        )?;
        let target_index = *self.node_index_map.get(&target_id).ok_or(
            GraphError::DanglingEdge {
                from: Some(source_id),
                to: Some(target_id),
            },
        )?;

        self.graph.add_edge(source_index, target_index, edge);
        Ok(())
    }

    /// Returns all nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the trigger node, if the graph has exactly one.
    #[must_use]
    pub fn trigger_node(&self) -> Option<&Node> {
        let mut triggers = self.nodes().filter(|n| n.kind() == NodeKind::Trigger);
        let first = triggers.next()?;
        if triggers.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Returns nodes that have no outgoing edges, in declaration order.
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Outgoing).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns the successors (downstream nodes) of a given node.
    pub fn successors(&self, node_id: NodeId) -> Vec<(&Node, &Edge)> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(index, Direction::Outgoing)
            .filter_map(|edge| {
                let target = self.graph.node_weight(edge.target())?;
                Some((target, edge.weight()))
            })
            .collect()
    }

    /// Returns the predecessors (upstream nodes) of a given node.
    pub fn predecessors(&self, node_id: NodeId) -> Vec<(&Node, &Edge)> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(index, Direction::Incoming)
            .filter_map(|edge| {
                let source = self.graph.node_weight(edge.source())?;
                Some((source, edge.weight()))
            })
            .collect()
    }

    /// Validates the workflow graph.
    ///
    /// Checks, in order:
    /// - No cycles
    /// - Exactly one trigger node, with no incoming edges
    /// - All other nodes reachable from the trigger
    /// - Branch labels only on edges out of condition nodes
    /// - Condition nodes cover both outcomes or provide a default edge
    ///
    /// Dangling edges are rejected at construction by [`Self::add_edge`]
    /// and during deserialization, so they cannot exist here.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> Result<(), GraphError> {
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(GraphError::Cycle);
        }

        let trigger_indices: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .node_weight(idx)
                    .is_some_and(|n| n.kind() == NodeKind::Trigger)
            })
            .collect();

        let [trigger_index] = trigger_indices[..] else {
            return Err(GraphError::MultipleOrZeroTriggers {
                count: trigger_indices.len(),
            });
        };

        if self
            .graph
            .edges_directed(trigger_index, Direction::Incoming)
            .count()
            > 0
        {
            let node_id = self.graph[trigger_index].id;
            return Err(GraphError::TriggerNotEntry { node_id });
        }

        self.check_reachability(trigger_index)?;
        self.check_branches()?;

        Ok(())
    }

    /// BFS from the trigger; every other node must be visited.
    fn check_reachability(&self, trigger_index: NodeIndex) -> Result<(), GraphError> {
        let mut visited = vec![false; self.graph.node_count()];
        visited[trigger_index.index()] = true;
        let mut queue = VecDeque::from([trigger_index]);

        while let Some(idx) = queue.pop_front() {
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                let target = edge.target();
                if !visited[target.index()] {
                    visited[target.index()] = true;
                    queue.push_back(target);
                }
            }
        }

        // Report the first unreachable node in declaration order.
        for idx in self.graph.node_indices() {
            if !visited[idx.index()] {
                return Err(GraphError::Unreachable {
                    node_id: self.graph[idx].id,
                });
            }
        }

        Ok(())
    }

    /// Branch labels belong on condition out-edges only, and each
    /// condition must cover both outcomes or carry a default.
    fn check_branches(&self) -> Result<(), GraphError> {
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let is_condition = node.kind() == NodeKind::Condition;

            let mut has_true = false;
            let mut has_false = false;
            let mut has_default = false;

            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                match edge.weight().branch {
                    Some(crate::edge::BranchOutcome::True) => has_true = true,
                    Some(crate::edge::BranchOutcome::False) => has_false = true,
                    Some(crate::edge::BranchOutcome::Default) => has_default = true,
                    None => {}
                }
                if edge.weight().branch.is_some() && !is_condition {
                    return Err(GraphError::BranchEdgeOnNonCondition { node_id: node.id });
                }
            }

            if is_condition && !(has_default || (has_true && has_false)) {
                return Err(GraphError::MissingConditionBranch { node_id: node.id });
            }
        }

        Ok(())
    }

    /// Returns the node IDs in topological order.
    ///
    /// Uses Kahn's algorithm; ties between simultaneously-ready nodes are
    /// broken by declaration order, so the result is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.edges_directed(idx, Direction::Incoming).count())
            .collect();

        // BTreeSet keeps ready nodes sorted by index (declaration order).
        let mut ready: BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(idx) = ready.pop_first() {
            order.push(self.graph[idx].id);
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                let target = edge.target();
                in_degree[target.index()] -= 1;
                if in_degree[target.index()] == 0 {
                    ready.insert(target);
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(GraphError::Cycle);
        }

        Ok(order)
    }

    /// Rebuilds the node index map after deserialization.
    pub fn rebuild_index_map(&mut self) {
        self.node_index_map.clear();
        for index in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(index) {
                self.node_index_map.insert(node.id, index);
            }
        }
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom serde for petgraph DiGraph.
mod graph_serde {
    use super::*;
    use serde::de::{Error as DeError, MapAccess, Visitor};
    use serde::ser::SerializeStruct;

    pub fn serialize<S>(graph: &DiGraph<Node, Edge>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let nodes: Vec<_> = graph.node_weights().cloned().collect();
        let edges: Vec<_> = graph
            .edge_references()
            .map(|e| {
                let source_id = graph.node_weight(e.source()).map(|n| n.id);
                let target_id = graph.node_weight(e.target()).map(|n| n.id);
                (source_id, target_id, e.weight().clone())
            })
            .collect();

        let mut state = serializer.serialize_struct("Graph", 2)?;
        state.serialize_field("nodes", &nodes)?;
        state.serialize_field("edges", &edges)?;
        state.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DiGraph<Node, Edge>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        type EdgeTuple = (Option<NodeId>, Option<NodeId>, Edge);

        struct GraphVisitor;

        impl<'de> Visitor<'de> for GraphVisitor {
            type Value = DiGraph<Node, Edge>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a workflow graph with nodes and edges")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut nodes: Option<Vec<Node>> = None;
                let mut edges: Option<Vec<EdgeTuple>> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "nodes" => nodes = Some(map.next_value()?),
                        "edges" => edges = Some(map.next_value()?),
                        _ => {
                            let _ = map.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }

                let nodes = nodes.unwrap_or_default();
                let edges = edges.unwrap_or_default();

                let mut graph = DiGraph::new();
                let mut id_to_index = HashMap::new();

                for node in nodes {
                    let id = node.id;
                    let index = graph.add_node(node);
                    id_to_index.insert(id, index);
                }

                for (source_id, target_id, edge) in edges {
                    let source_idx = source_id.and_then(|id| id_to_index.get(&id).copied());
                    let target_idx = target_id.and_then(|id| id_to_index.get(&id).copied());
                    let (Some(source_idx), Some(target_idx)) = (source_idx, target_idx) else {
                        return Err(M::Error::custom(GraphError::DanglingEdge {
                            from: source_id,
                            to: target_id,
                        }));
                    };
                    graph.add_edge(source_idx, target_idx, edge);
                }

                Ok(graph)
            }
        }

        deserializer.deserialize_struct("Graph", &["nodes", "edges"], GraphVisitor)
    }
}
