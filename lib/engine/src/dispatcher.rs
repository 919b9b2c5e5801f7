//! The trigger dispatcher.
//!
//! All four trigger sources (manual, webhook, schedule, rule) converge
//! here. Firing a workflow validates its graph, creates a pending
//! execution record, and hands the run off to a spawned
//! [`ExecutionRunner`]; the caller gets the execution ID back
//! immediately and follows progress through the store or the event
//! sink.

use crate::definition::Workflow;
use crate::error::{DispatchError, StoreError};
use crate::events::{Envelope, EventSink, ExecutionEvent};
use crate::execution::Execution;
use crate::executor::{CancelToken, ExecutionRunner};
use crate::handlers::HandlerRegistry;
use crate::store::{ExecutionStore, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

/// The source that fired a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fired by a user.
    Manual,
    /// Fired by an inbound HTTP webhook.
    Webhook,
    /// Fired by the cron scheduler.
    Schedule,
    /// Fired by an email rule match.
    Rule,
}

impl TriggerKind {
    /// System-originated triggers are suppressed, not rejected, when the
    /// workflow is inactive.
    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::Schedule | Self::Rule)
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::Webhook => "webhook",
            Self::Schedule => "schedule",
            Self::Rule => "rule",
        };
        f.write_str(name)
    }
}

/// A request to fire a workflow.
#[derive(Debug, Clone)]
pub struct FireRequest {
    /// What fired the workflow.
    pub trigger: TriggerKind,
    /// Input passed to the trigger node as the run's seed context.
    pub input: JsonValue,
    /// The user behind a manual fire.
    pub executed_by: Option<UserId>,
}

impl FireRequest {
    /// A manual fire on behalf of a user.
    #[must_use]
    pub fn manual(input: JsonValue, executed_by: Option<UserId>) -> Self {
        Self {
            trigger: TriggerKind::Manual,
            input,
            executed_by,
        }
    }

    /// A webhook-originated fire.
    #[must_use]
    pub fn webhook(input: JsonValue) -> Self {
        Self {
            trigger: TriggerKind::Webhook,
            input,
            executed_by: None,
        }
    }

    /// A scheduler-originated fire.
    #[must_use]
    pub fn schedule() -> Self {
        Self {
            trigger: TriggerKind::Schedule,
            input: JsonValue::Object(serde_json::Map::new()),
            executed_by: None,
        }
    }

    /// A rule-originated fire carrying the matched email as input.
    #[must_use]
    pub fn rule(input: JsonValue) -> Self {
        Self {
            trigger: TriggerKind::Rule,
            input,
            executed_by: None,
        }
    }
}

/// The result of a fire request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An execution was created and handed to a runner.
    Started(ExecutionId),
    /// The workflow is inactive; the system-originated fire was dropped.
    Suppressed,
}

/// One audited dispatch decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub trigger: TriggerKind,
    pub executed_by: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

/// Records who fired what, when.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Records a dispatch.
    async fn record(&self, entry: AuditEntry);
}

/// Audit log that writes structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, entry: AuditEntry) {
        let executed_by = entry
            .executed_by
            .map_or_else(|| "system".to_string(), |u| u.to_string());
        info!(
            workflow_id = %entry.workflow_id,
            execution_id = %entry.execution_id,
            trigger = %entry.trigger,
            %executed_by,
            "workflow fired"
        );
    }
}

/// Routes trigger fires into executions.
pub struct Dispatcher {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    events: Arc<dyn EventSink>,
    handlers: HandlerRegistry,
    audit: Arc<dyn AuditLog>,
    cancellations: Arc<Mutex<HashMap<ExecutionId, Arc<CancelToken>>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given stores and services.
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        events: Arc<dyn EventSink>,
        handlers: HandlerRegistry,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            workflows,
            executions,
            events,
            handlers,
            audit,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fires a workflow.
    ///
    /// Returns as soon as the execution record exists and a runner owns
    /// it; the run itself proceeds in the background.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::UnknownWorkflow`] if the workflow does not exist
    /// - [`DispatchError::WorkflowInactive`] for user-originated fires of
    ///   an inactive workflow (system-originated fires are suppressed
    ///   silently instead)
    /// - [`DispatchError::InvalidGraph`] if the graph fails validation
    pub async fn fire(
        &self,
        workflow_id: WorkflowId,
        request: FireRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or(DispatchError::UnknownWorkflow { workflow_id })?;

        if !workflow.is_active {
            if request.trigger.is_system() {
                info!(%workflow_id, trigger = %request.trigger, "suppressed fire of inactive workflow");
                return Ok(DispatchOutcome::Suppressed);
            }
            return Err(DispatchError::WorkflowInactive { workflow_id });
        }

        workflow
            .validate()
            .map_err(|source| DispatchError::InvalidGraph {
                workflow_id,
                source,
            })?;

        let execution = Execution::new(workflow.id, request.input, request.executed_by);
        let execution_id = execution.id;
        self.executions.insert(execution.clone()).await?;

        if let Err(sink_error) = self
            .events
            .publish(Envelope::new(ExecutionEvent::Queued {
                execution_id,
                workflow_id,
                input: execution.input.clone(),
                timestamp: Utc::now(),
            }))
            .await
        {
            error!(%execution_id, %sink_error, "failed to publish queued event");
        }

        self.audit
            .record(AuditEntry {
                workflow_id,
                execution_id,
                trigger: request.trigger,
                executed_by: execution.executed_by,
                timestamp: Utc::now(),
            })
            .await;

        let token = Arc::new(CancelToken::new());
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution_id, token.clone());

        let runner = ExecutionRunner::new(
            self.executions.clone(),
            self.events.clone(),
            self.handlers.clone(),
            token,
        );
        let cancellations = self.cancellations.clone();
        tokio::spawn(async move {
            runner.run(workflow, execution).await;
            cancellations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&execution_id);
        });

        Ok(DispatchOutcome::Started(execution_id))
    }

    /// Requests cancellation of an execution.
    ///
    /// Returns `Ok(true)` if cancellation was requested, `Ok(false)` if
    /// the execution had already reached a terminal state.
    ///
    /// # Errors
    ///
    /// Returns a store error if the execution does not exist.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<bool, DispatchError> {
        let execution = self
            .executions
            .get(execution_id)
            .await?
            .ok_or(DispatchError::Store(StoreError::ExecutionNotFound {
                execution_id,
            }))?;

        if execution.status.is_terminal() {
            return Ok(false);
        }

        let token = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .cloned();

        if let Some(token) = token {
            token.cancel();
            return Ok(true);
        }

        // No live runner (e.g. the process restarted mid-run). Close the
        // record directly so it does not stay running forever.
        let mut execution = execution;
        execution.cancel();
        self.executions.update(execution).await?;
        if let Err(sink_error) = self
            .events
            .publish(Envelope::new(ExecutionEvent::Cancelled {
                execution_id,
                timestamp: Utc::now(),
            }))
            .await
        {
            error!(%execution_id, %sink_error, "failed to publish cancelled event");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::events::InMemoryEventSink;
    use crate::execution::ExecutionStatus;
    use crate::node::{ActionConfig, LogLevel, Node, NodeConfig, NodeKind, TriggerConfig};
    use crate::store::{InMemoryExecutionStore, InMemoryWorkflowStore};
    use serde_json::json;
    use std::time::Duration;

    struct World {
        workflows: Arc<InMemoryWorkflowStore>,
        executions: Arc<InMemoryExecutionStore>,
        dispatcher: Dispatcher,
    }

    fn world() -> World {
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let executions = Arc::new(InMemoryExecutionStore::new());
        let events = Arc::new(InMemoryEventSink::new());
        let handlers = HandlerRegistry::new().with(
            NodeKind::Action,
            Arc::new(crate::handlers::EchoHandler) as Arc<dyn crate::handlers::NodeHandler>,
        );
        let dispatcher = Dispatcher::new(
            workflows.clone(),
            executions.clone(),
            events,
            handlers,
            Arc::new(TracingAuditLog),
        );
        World {
            workflows,
            executions,
            dispatcher,
        }
    }

    fn valid_workflow() -> Workflow {
        let mut workflow = Workflow::new("Dispatchable");
        let t = workflow
            .graph
            .add_node(Node::new("Start", NodeConfig::Trigger(TriggerConfig::Manual)));
        let a = workflow.graph.add_node(Node::new(
            "Log",
            NodeConfig::Action(ActionConfig::Log {
                level: LogLevel::Info,
            }),
        ));
        workflow.graph.add_edge(t, a, Edge::new()).unwrap();
        workflow
    }

    async fn wait_terminal(
        executions: &InMemoryExecutionStore,
        execution_id: ExecutionId,
    ) -> Execution {
        for _ in 0..200 {
            if let Some(execution) = executions.get(execution_id).await.unwrap() {
                if execution.status.is_terminal() {
                    return execution;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution never reached a terminal state");
    }

    #[tokio::test]
    async fn fire_unknown_workflow() {
        let world = world();
        let result = world
            .dispatcher
            .fire(WorkflowId::new(), FireRequest::manual(json!({}), None))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::UnknownWorkflow { .. })
        ));
    }

    #[tokio::test]
    async fn fire_runs_to_completion() {
        let world = world();
        let workflow = valid_workflow();
        let workflow_id = workflow.id;
        world.workflows.put(workflow).await.unwrap();

        let outcome = world
            .dispatcher
            .fire(workflow_id, FireRequest::manual(json!({"n": 1}), None))
            .await
            .unwrap();
        let DispatchOutcome::Started(execution_id) = outcome else {
            panic!("expected a started execution");
        };

        let done = wait_terminal(&world.executions, execution_id).await;
        assert_eq!(done.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn concurrent_fires_keep_independent_contexts() {
        let world = world();
        let workflow = valid_workflow();
        let workflow_id = workflow.id;
        world.workflows.put(workflow).await.unwrap();

        let mut execution_ids = Vec::new();
        for n in [1, 2] {
            let outcome = world
                .dispatcher
                .fire(workflow_id, FireRequest::manual(json!({"n": n}), None))
                .await
                .unwrap();
            let DispatchOutcome::Started(execution_id) = outcome else {
                panic!("expected a started execution");
            };
            execution_ids.push(execution_id);
        }

        // Each run echoes its own trigger input, never the other's
        for (execution_id, n) in execution_ids.into_iter().zip([1, 2]) {
            let done = wait_terminal(&world.executions, execution_id).await;
            assert_eq!(done.status, ExecutionStatus::Success);
            let output = done.output.unwrap();
            let echoed: Vec<i64> = output
                .as_object()
                .unwrap()
                .values()
                .map(|v| v["echo"]["trigger"]["n"].as_i64().unwrap())
                .collect();
            assert_eq!(echoed, vec![n]);
        }
    }

    #[tokio::test]
    async fn inactive_workflow_rejects_manual_fire() {
        let world = world();
        let mut workflow = valid_workflow();
        workflow.deactivate();
        let workflow_id = workflow.id;
        world.workflows.put(workflow).await.unwrap();

        let result = world
            .dispatcher
            .fire(workflow_id, FireRequest::manual(json!({}), None))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::WorkflowInactive { .. })
        ));

        let result = world
            .dispatcher
            .fire(workflow_id, FireRequest::webhook(json!({})))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::WorkflowInactive { .. })
        ));
    }

    #[tokio::test]
    async fn inactive_workflow_suppresses_system_fires() {
        let world = world();
        let mut workflow = valid_workflow();
        workflow.deactivate();
        let workflow_id = workflow.id;
        world.workflows.put(workflow).await.unwrap();

        let outcome = world
            .dispatcher
            .fire(workflow_id, FireRequest::schedule())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Suppressed);

        let outcome = world
            .dispatcher
            .fire(workflow_id, FireRequest::rule(json!({"from": "a@b.c"})))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Suppressed);
    }

    #[tokio::test]
    async fn fire_rejects_invalid_graph() {
        let world = world();
        // No trigger node at all
        let mut workflow = Workflow::new("Broken");
        workflow.graph.add_node(Node::new(
            "Log",
            NodeConfig::Action(ActionConfig::Log {
                level: LogLevel::Info,
            }),
        ));
        let workflow_id = workflow.id;
        world.workflows.put(workflow).await.unwrap();

        let result = world
            .dispatcher
            .fire(workflow_id, FireRequest::manual(json!({}), None))
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidGraph { .. })));

        // No execution record was created for the rejected fire
        assert!(world
            .executions
            .list_for_workflow(workflow_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn cancel_is_noop_on_terminal_execution() {
        let world = world();
        let workflow = valid_workflow();
        let workflow_id = workflow.id;
        world.workflows.put(workflow).await.unwrap();

        let DispatchOutcome::Started(execution_id) = world
            .dispatcher
            .fire(workflow_id, FireRequest::manual(json!({}), None))
            .await
            .unwrap()
        else {
            panic!("expected a started execution");
        };
        wait_terminal(&world.executions, execution_id).await;

        assert_eq!(world.dispatcher.cancel(execution_id).await.unwrap(), false);
    }

    #[tokio::test]
    async fn cancel_unknown_execution_errors() {
        let world = world();
        let result = world.dispatcher.cancel(ExecutionId::new()).await;
        assert!(matches!(
            result,
            Err(DispatchError::Store(StoreError::ExecutionNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn cancel_without_live_runner_closes_the_record() {
        let world = world();
        let execution = Execution::new(WorkflowId::new(), json!({}), None);
        let execution_id = execution.id;
        world.executions.insert(execution).await.unwrap();

        assert!(world.dispatcher.cancel(execution_id).await.unwrap());
        let closed = world.executions.get(execution_id).await.unwrap().unwrap();
        assert_eq!(closed.status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn trigger_kind_display() {
        assert_eq!(TriggerKind::Manual.to_string(), "manual");
        assert_eq!(TriggerKind::Schedule.to_string(), "schedule");
        assert!(TriggerKind::Schedule.is_system());
        assert!(!TriggerKind::Webhook.is_system());
    }
}
