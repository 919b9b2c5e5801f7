//! Execution state machines.
//!
//! An `Execution` tracks one run of a workflow:
//! pending -> running -> success | failed | cancelled.
//!
//! An `ExecutionStep` tracks one node within an execution:
//! pending -> running -> success | failed | skipped.
//!
//! Transition methods keep the record consistent: `completed_at` is set
//! exactly when the state turns terminal, and output and error are
//! mutually exclusive.

use crate::node::NodeId;
use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, StepId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The overall state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, waiting for the runner to pick it up.
    Pending,
    /// Actively executing.
    Running,
    /// All steps finished without failure.
    Success,
    /// At least one step failed.
    Failed,
    /// Cancelled by user or system.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// The state of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for predecessors.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Success,
    /// Failed after exhausting retries.
    Failed,
    /// Skipped (failed upstream, or branch not taken).
    Skipped,
}

impl StepStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// A record of a single workflow execution.
///
/// Execution records are append-only: they are never deleted, and a
/// terminal record is never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for this execution.
    pub id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Current status.
    pub status: ExecutionStatus,
    /// Input data that triggered the execution.
    pub input: JsonValue,
    /// Final output (success only).
    pub output: Option<JsonValue>,
    /// Error message (failed only).
    pub error: Option<String>,
    /// When the execution was created.
    pub queued_at: DateTime<Utc>,
    /// When the execution started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Who fired the execution, for manual triggers.
    pub executed_by: Option<UserId>,
}

impl Execution {
    /// Creates a new execution in pending state.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, input: JsonValue, executed_by: Option<UserId>) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            executed_by,
        }
    }

    /// Marks the execution as running.
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the execution as succeeded with the given output.
    pub fn succeed(&mut self, output: JsonValue) {
        self.status = ExecutionStatus::Success;
        self.completed_at = Some(Utc::now());
        self.output = Some(output);
        self.error = None;
    }

    /// Marks the execution as failed with the given error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        self.output = None;
    }

    /// Marks the execution as cancelled.
    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Returns the duration of the execution, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// Execution record for a single node within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Unique identifier for this step.
    pub id: StepId,
    /// The execution this step belongs to.
    pub execution_id: ExecutionId,
    /// The node being executed.
    pub node_id: NodeId,
    /// Current status.
    pub status: StepStatus,
    /// How many handler attempts have been made.
    pub attempts: u32,
    /// Context snapshot the handler received.
    pub input: Option<JsonValue>,
    /// Output produced on success.
    pub output: Option<JsonValue>,
    /// Error message on failure.
    pub error: Option<String>,
    /// When execution of this step started.
    pub started_at: Option<DateTime<Utc>>,
    /// When this step reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionStep {
    /// Creates a new step in pending state.
    #[must_use]
    pub fn new(execution_id: ExecutionId, node_id: NodeId) -> Self {
        Self {
            id: StepId::new(),
            execution_id,
            node_id,
            status: StepStatus::Pending,
            attempts: 0,
            input: None,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Marks the step as running with the given context snapshot.
    pub fn start(&mut self, input: JsonValue) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        self.input = Some(input);
    }

    /// Marks the step as succeeded.
    pub fn succeed(&mut self, output: JsonValue, attempts: u32) {
        self.status = StepStatus::Success;
        self.completed_at = Some(Utc::now());
        self.output = Some(output);
        self.attempts = attempts;
    }

    /// Marks the step as failed.
    pub fn fail(&mut self, error: impl Into<String>, attempts: u32) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        self.attempts = attempts;
    }

    /// Marks the step as skipped.
    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }
}
