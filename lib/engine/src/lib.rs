//! Workflow orchestration and execution engine for the flowline platform.
//!
//! This crate provides:
//!
//! - **Graph Model**: Directed acyclic graphs using petgraph with typed nodes and edges
//! - **Node Types**: Trigger, Connector, Agent, Skill, Action, Condition, Delay
//! - **Condition Expressions**: Typed comparison AST evaluated against the run context
//! - **Trigger Dispatcher**: Fire-and-return handoff from triggers to executions
//! - **Execution**: Per-run state machine with retries, branching, and cancellation
//! - **State Store**: Injected persistence traits with in-memory implementations
//! - **Event Sink**: Versioned lifecycle events, optionally streamed to NATS JetStream

pub mod definition;
pub mod dispatcher;
pub mod edge;
pub mod error;
pub mod events;
pub mod execution;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod handlers;
pub mod nats;
pub mod node;
pub mod progress;
pub mod store;

pub use definition::{Workflow, WorkflowSummary};
pub use dispatcher::{
    AuditEntry, AuditLog, DispatchOutcome, Dispatcher, FireRequest, TracingAuditLog, TriggerKind,
};
pub use edge::{BranchOutcome, Edge};
pub use error::{
    DispatchError, EventSinkError, ExprParseError, GraphError, HandlerError, StoreError,
};
pub use events::{Envelope, EventSink, ExecutionEvent, InMemoryEventSink};
pub use execution::{Execution, ExecutionStatus, ExecutionStep, StepStatus};
pub use executor::{CancelToken, ExecutionRunner, HANDLER_TIMEOUT};
pub use expr::{CompareOp, ConditionExpr};
pub use graph::WorkflowGraph;
pub use handlers::{
    CapabilityService, ConnectorService, EchoHandler, HandlerRegistry, NodeHandler, Notifier,
};
pub use nats::{NatsConfig, NatsEventSink};
pub use node::{Node, NodeConfig, NodeId, NodeKind, RetryPolicy};
pub use store::{
    ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowStore, WorkflowStore,
};
