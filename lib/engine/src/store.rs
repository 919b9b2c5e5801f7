//! Persistence traits and in-memory implementations.
//!
//! The dispatcher and executor speak to storage only through these
//! traits, so a database-backed deployment can swap implementations
//! without touching the engine. The in-memory stores back tests and
//! single-process deployments.

use crate::definition::{Workflow, WorkflowSummary};
use crate::error::StoreError;
use crate::execution::{Execution, ExecutionStep};
use async_trait::async_trait;
use flowline_core::{ExecutionId, WorkflowId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Storage for workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Inserts or replaces a workflow.
    async fn put(&self, workflow: Workflow) -> Result<(), StoreError>;

    /// Fetches a workflow by ID.
    async fn get(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, StoreError>;

    /// Lists all workflows, in insertion order.
    async fn list(&self) -> Result<Vec<WorkflowSummary>, StoreError>;

    /// Finds the workflow whose trigger listens on the given webhook path.
    async fn find_by_webhook_path(&self, path: &str) -> Result<Option<Workflow>, StoreError>;

    /// Lists active workflows that carry a cron schedule.
    async fn list_scheduled(&self) -> Result<Vec<Workflow>, StoreError>;
}

/// Storage for execution records and their steps.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts a new execution record.
    async fn insert(&self, execution: Execution) -> Result<(), StoreError>;

    /// Fetches an execution by ID.
    async fn get(&self, execution_id: ExecutionId) -> Result<Option<Execution>, StoreError>;

    /// Replaces an existing execution record.
    async fn update(&self, execution: Execution) -> Result<(), StoreError>;

    /// Inserts a step, or replaces it if a step with the same ID exists.
    async fn upsert_step(&self, step: ExecutionStep) -> Result<(), StoreError>;

    /// Returns the steps of an execution, in insertion order.
    async fn steps(&self, execution_id: ExecutionId) -> Result<Vec<ExecutionStep>, StoreError>;

    /// Returns executions of a workflow, most recently queued first.
    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<Execution>, StoreError>;
}

/// In-memory workflow store.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<Vec<Workflow>>,
}

impl InMemoryWorkflowStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn put(&self, workflow: Workflow) -> Result<(), StoreError> {
        let mut workflows = self
            .workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = workflows.iter_mut().find(|w| w.id == workflow.id) {
            *existing = workflow;
        } else {
            workflows.push(workflow);
        }
        Ok(())
    }

    async fn get(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|w| w.id == workflow_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        Ok(self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(WorkflowSummary::from)
            .collect())
    }

    async fn find_by_webhook_path(&self, path: &str) -> Result<Option<Workflow>, StoreError> {
        Ok(self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|w| w.webhook_path() == Some(path))
            .cloned())
    }

    async fn list_scheduled(&self) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.is_active && w.schedule.is_some())
            .cloned()
            .collect())
    }
}

/// In-memory execution store.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
    steps: RwLock<Vec<ExecutionStep>>,
}

impl InMemoryExecutionStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: Execution) -> Result<(), StoreError> {
        self.executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution.id, execution);
        Ok(())
    }

    async fn get(&self, execution_id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        Ok(self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .cloned())
    }

    async fn update(&self, execution: Execution) -> Result<(), StoreError> {
        let mut executions = self
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(existing) = executions.get_mut(&execution.id) else {
            return Err(StoreError::ExecutionNotFound {
                execution_id: execution.id,
            });
        };
        *existing = execution;
        Ok(())
    }

    async fn upsert_step(&self, step: ExecutionStep) -> Result<(), StoreError> {
        let mut steps = self.steps.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = steps.iter_mut().find(|s| s.id == step.id) {
            *existing = step;
        } else {
            steps.push(step);
        }
        Ok(())
    }

    async fn steps(&self, execution_id: ExecutionId) -> Result<Vec<ExecutionStep>, StoreError> {
        Ok(self
            .steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<Execution>, StoreError> {
        let mut executions: Vec<Execution> = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        Ok(executions)
    }
}
