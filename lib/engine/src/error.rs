//! Error types for the engine crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `GraphError`: Structural workflow validation failures
//! - `ExprParseError`: Condition expression parse failures
//! - `DispatchError`: Trigger dispatch failures (no execution created)
//! - `HandlerError`: Node handler failures (absorbed into step state)
//! - `StoreError`: Persistence failures
//! - `EventSinkError`: Event publication failures

use crate::node::{NodeId, NodeKind};
use flowline_core::{ExecutionId, WorkflowId};
use std::fmt;

/// Errors from workflow graph validation.
///
/// These errors contain only information available at the graph layer.
/// Workflow-level context (like workflow_id) should be added by the caller
/// using `.context()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An edge references a node that is not in the graph.
    DanglingEdge {
        from: Option<NodeId>,
        to: Option<NodeId>,
    },
    /// Graph contains a cycle.
    Cycle,
    /// Graph does not have exactly one trigger node.
    MultipleOrZeroTriggers { count: usize },
    /// The trigger node has incoming edges.
    TriggerNotEntry { node_id: NodeId },
    /// A non-trigger node is not reachable from the trigger.
    Unreachable { node_id: NodeId },
    /// A branch-labeled edge leaves a node that is not a condition.
    BranchEdgeOnNonCondition { node_id: NodeId },
    /// A condition node's outgoing edges do not cover both outcomes
    /// and provide no default.
    MissingConditionBranch { node_id: NodeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingEdge { from, to } => {
                let from = from.map_or_else(|| "?".to_string(), |id| id.to_string());
                let to = to.map_or_else(|| "?".to_string(), |id| id.to_string());
                write!(f, "edge references unknown node: {from} -> {to}")
            }
            Self::Cycle => write!(f, "graph contains a cycle"),
            Self::MultipleOrZeroTriggers { count } => {
                write!(f, "expected exactly one trigger node, found {count}")
            }
            Self::TriggerNotEntry { node_id } => {
                write!(f, "trigger node {node_id} has incoming edges")
            }
            Self::Unreachable { node_id } => {
                write!(f, "node {node_id} is not reachable from the trigger")
            }
            Self::BranchEdgeOnNonCondition { node_id } => {
                write!(f, "branch-labeled edge leaves non-condition node {node_id}")
            }
            Self::MissingConditionBranch { node_id } => {
                write!(
                    f,
                    "condition node {node_id} does not cover both outcomes or provide a default"
                )
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from parsing a condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprParseError {
    /// The expression has no recognizable comparison operator.
    MissingOperator { expression: String },
    /// The expression is missing a path or value operand.
    MissingOperand { expression: String },
}

impl fmt::Display for ExprParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOperator { expression } => {
                write!(f, "no comparison operator in expression '{expression}'")
            }
            Self::MissingOperand { expression } => {
                write!(f, "missing operand in expression '{expression}'")
            }
        }
    }
}

impl std::error::Error for ExprParseError {}

/// Errors from trigger dispatch.
///
/// Dispatch errors are returned synchronously to the trigger source;
/// no execution record is created when dispatch fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The workflow ID does not resolve.
    UnknownWorkflow { workflow_id: WorkflowId },
    /// The workflow is inactive and the trigger kind requires it active.
    WorkflowInactive { workflow_id: WorkflowId },
    /// The workflow graph failed validation.
    InvalidGraph {
        workflow_id: WorkflowId,
        source: GraphError,
    },
    /// Persistence failed while creating the execution.
    Store(StoreError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownWorkflow { workflow_id } => {
                write!(f, "unknown workflow: {workflow_id}")
            }
            Self::WorkflowInactive { workflow_id } => {
                write!(f, "workflow is inactive: {workflow_id}")
            }
            Self::InvalidGraph {
                workflow_id,
                source,
            } => {
                write!(f, "invalid graph for workflow {workflow_id}: {source}")
            }
            Self::Store(e) => write!(f, "dispatch store failure: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidGraph { source, .. } => Some(source),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors from node handler execution.
///
/// Handler errors never propagate out of the runner; after retries are
/// exhausted they become the step's terminal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler failed.
    Failed { reason: String },
    /// The handler exceeded the node's timeout.
    Timeout { seconds: u64 },
    /// No handler is registered for the node kind.
    Unsupported { kind: NodeKind },
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "{reason}"),
            Self::Timeout { seconds } => write!(f, "timed out after {seconds}s"),
            Self::Unsupported { kind } => write!(f, "no handler registered for {kind} nodes"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Execution not found.
    ExecutionNotFound { execution_id: ExecutionId },
    /// Backend operation failed.
    Backend { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::Backend { reason } => write!(f, "store backend failure: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from event sink operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSinkError {
    /// Failed to connect to the sink.
    ConnectionFailed { message: String },
    /// Failed to publish an event.
    PublishFailed { message: String },
    /// Failed to load events.
    LoadFailed { message: String },
}

impl fmt::Display for EventSinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "event sink connection failed: {message}")
            }
            Self::PublishFailed { message } => write!(f, "event publish failed: {message}"),
            Self::LoadFailed { message } => write!(f, "event load failed: {message}"),
        }
    }
}

impl std::error::Error for EventSinkError {}
