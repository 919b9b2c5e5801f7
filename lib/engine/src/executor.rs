//! The execution runner.
//!
//! One runner drives one execution from pending to a terminal state. It
//! is the single writer for that execution's records: node handlers run
//! concurrently in a [`JoinSet`], but every store write and every
//! lifecycle event goes through the runner's loop.
//!
//! Scheduling follows the progress graph: ready nodes are launched as
//! soon as their inputs deliver, nodes that can never receive input are
//! skipped, and a failure drains the rest of the graph instead of
//! aborting it.

use crate::definition::{Workflow, is_external_kind};
use crate::edge::BranchOutcome;
use crate::events::{Envelope, EventSink, ExecutionEvent};
use crate::execution::{Execution, ExecutionStep};
use crate::graph::WorkflowGraph;
use crate::handlers::HandlerRegistry;
use crate::node::{Node, NodeConfig, NodeId, NodeKind};
use crate::progress::ProgressGraph;
use crate::store::ExecutionStore;
use chrono::Utc;
use flowline_core::ExecutionId;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Wall-clock budget for a single handler attempt on nodes that perform
/// externally visible work.
pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation handle shared between the dispatcher and a
/// runner.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates a new token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes the runner.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until cancellation is requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

struct NodeTaskOutput {
    node_id: NodeId,
    attempts: u32,
    result: Result<NodeSuccess, String>,
}

struct NodeSuccess {
    output: JsonValue,
    /// The boolean a condition node evaluated to.
    condition_result: Option<bool>,
}

/// Drives a single execution to completion.
pub struct ExecutionRunner {
    executions: Arc<dyn ExecutionStore>,
    events: Arc<dyn EventSink>,
    handlers: HandlerRegistry,
    cancel: Arc<CancelToken>,
}

impl ExecutionRunner {
    /// Creates a runner for one execution.
    #[must_use]
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        events: Arc<dyn EventSink>,
        handlers: HandlerRegistry,
        cancel: Arc<CancelToken>,
    ) -> Self {
        Self {
            executions,
            events,
            handlers,
            cancel,
        }
    }

    /// Runs the execution to a terminal state.
    ///
    /// Never panics and never returns early: internal failures are
    /// recorded on the execution itself.
    pub async fn run(self, workflow: Workflow, mut execution: Execution) {
        let execution_id = execution.id;
        info!(%execution_id, workflow_id = %workflow.id, "execution started");

        execution.start();
        self.record_execution(&execution).await;
        self.publish(ExecutionEvent::Started {
            execution_id,
            timestamp: Utc::now(),
        })
        .await;

        let mut context = JsonMap::new();
        context.insert("trigger".to_string(), execution.input.clone());

        let mut progress = ProgressGraph::from_workflow(&workflow.graph);
        let mut steps: HashMap<NodeId, ExecutionStep> = HashMap::new();
        let mut errors: HashMap<NodeId, String> = HashMap::new();
        let mut in_flight: JoinSet<NodeTaskOutput> = JoinSet::new();

        loop {
            self.sweep_skips(&mut progress, &mut steps, execution_id)
                .await;

            for node_id in progress.ready_nodes() {
                let Some(node) = workflow.graph.get_node(node_id) else {
                    continue;
                };
                let snapshot = JsonValue::Object(context.clone());

                let mut step = ExecutionStep::new(execution_id, node_id);
                step.start(snapshot.clone());
                self.record_step(&step).await;
                steps.insert(node_id, step);
                progress.mark_running(node_id);

                let node = node.clone();
                let handlers = self.handlers.clone();
                let events = self.events.clone();
                in_flight.spawn(run_node(node, snapshot, handlers, events, execution_id));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                () = self.cancel.wait() => {
                    in_flight.abort_all();
                    self.finish_cancelled(execution, progress, steps).await;
                    return;
                }
                Some(joined) = in_flight.join_next() => {
                    let task = match joined {
                        Ok(task) => task,
                        Err(join_error) => {
                            error!(%execution_id, %join_error, "node task panicked");
                            execution.fail(format!("internal error: {join_error}"));
                            self.record_execution(&execution).await;
                            self.publish(ExecutionEvent::Failed {
                                execution_id,
                                error: format!("internal error: {join_error}"),
                                timestamp: Utc::now(),
                            })
                            .await;
                            return;
                        }
                    };
                    self.apply_task_output(
                        task,
                        execution_id,
                        &workflow.graph,
                        &mut progress,
                        &mut context,
                        &mut steps,
                        &mut errors,
                    )
                    .await;
                }
            }
        }

        if self.cancel.is_cancelled() {
            self.finish_cancelled(execution, progress, steps).await;
            return;
        }

        if progress.has_failures() {
            let message = first_failure(&workflow.graph, &errors);
            execution.fail(&message);
            self.record_execution(&execution).await;
            self.publish(ExecutionEvent::Failed {
                execution_id,
                error: message.clone(),
                timestamp: Utc::now(),
            })
            .await;
            info!(%execution_id, error = %message, "execution failed");
        } else {
            let output = final_output(&workflow.graph, &progress, &context);
            execution.succeed(output.clone());
            self.record_execution(&execution).await;
            self.publish(ExecutionEvent::Succeeded {
                execution_id,
                output,
                timestamp: Utc::now(),
            })
            .await;
            info!(%execution_id, "execution succeeded");
        }
    }

    /// Applies a finished node task to the progress graph and store.
    async fn apply_task_output(
        &self,
        task: NodeTaskOutput,
        execution_id: ExecutionId,
        graph: &WorkflowGraph,
        progress: &mut ProgressGraph,
        context: &mut JsonMap<String, JsonValue>,
        steps: &mut HashMap<NodeId, ExecutionStep>,
        errors: &mut HashMap<NodeId, String>,
    ) {
        let node_id = task.node_id;

        match task.result {
            Ok(success) => {
                context.insert(node_id.to_string(), success.output.clone());

                match success.condition_result {
                    Some(result) => {
                        let outcome = condition_outcome(graph, node_id, result);
                        progress.mark_success_with_outcome(node_id, outcome);
                    }
                    None => progress.mark_success(node_id),
                }

                if let Some(step) = steps.get_mut(&node_id) {
                    step.succeed(success.output, task.attempts);
                    self.record_step(step).await;
                }
                self.publish(ExecutionEvent::StepSucceeded {
                    execution_id,
                    node_id,
                    timestamp: Utc::now(),
                })
                .await;
            }
            Err(message) => {
                warn!(%execution_id, %node_id, error = %message, "step failed");
                progress.mark_failed(node_id);
                errors.insert(node_id, message.clone());

                if let Some(step) = steps.get_mut(&node_id) {
                    step.fail(&message, task.attempts);
                    self.record_step(step).await;
                }
                self.publish(ExecutionEvent::StepFailed {
                    execution_id,
                    node_id,
                    error: message,
                    timestamp: Utc::now(),
                })
                .await;
            }
        }
    }

    /// Skips every pending node whose inputs can never deliver, until
    /// the sweep reaches a fixed point.
    async fn sweep_skips(
        &self,
        progress: &mut ProgressGraph,
        steps: &mut HashMap<NodeId, ExecutionStep>,
        execution_id: ExecutionId,
    ) {
        loop {
            let skippable = progress.skippable_nodes();
            if skippable.is_empty() {
                return;
            }
            for node_id in skippable {
                progress.mark_skipped(node_id);
                let step = steps
                    .entry(node_id)
                    .or_insert_with(|| ExecutionStep::new(execution_id, node_id));
                step.skip();
                self.record_step(step).await;
                self.publish(ExecutionEvent::StepSkipped {
                    execution_id,
                    node_id,
                    reason: "upstream did not deliver".to_string(),
                    timestamp: Utc::now(),
                })
                .await;
            }
        }
    }

    /// Finalizes a cancelled execution: every non-terminal step is
    /// skipped and the record turns cancelled.
    async fn finish_cancelled(
        &self,
        mut execution: Execution,
        mut progress: ProgressGraph,
        mut steps: HashMap<NodeId, ExecutionStep>,
    ) {
        let execution_id = execution.id;

        for node_id in progress.non_terminal_nodes() {
            progress.mark_skipped(node_id);
            let step = steps
                .entry(node_id)
                .or_insert_with(|| ExecutionStep::new(execution_id, node_id));
            step.skip();
            self.record_step(step).await;
            self.publish(ExecutionEvent::StepSkipped {
                execution_id,
                node_id,
                reason: "execution cancelled".to_string(),
                timestamp: Utc::now(),
            })
            .await;
        }

        execution.cancel();
        self.record_execution(&execution).await;
        self.publish(ExecutionEvent::Cancelled {
            execution_id,
            timestamp: Utc::now(),
        })
        .await;
        info!(%execution_id, "execution cancelled");
    }

    async fn record_execution(&self, execution: &Execution) {
        if let Err(store_error) = self.executions.update(execution.clone()).await {
            error!(execution_id = %execution.id, %store_error, "failed to persist execution");
        }
    }

    async fn record_step(&self, step: &ExecutionStep) {
        if let Err(store_error) = self.executions.upsert_step(step.clone()).await {
            error!(execution_id = %step.execution_id, %store_error, "failed to persist step");
        }
    }

    async fn publish(&self, event: ExecutionEvent) {
        if let Err(sink_error) = self.events.publish(Envelope::new(event)).await {
            error!(%sink_error, "failed to publish execution event");
        }
    }
}

/// Maps a condition's boolean result to the branch outcome its edges
/// select: the matching label when one exists, otherwise the default.
fn condition_outcome(graph: &WorkflowGraph, node_id: NodeId, result: bool) -> BranchOutcome {
    let wanted = if result {
        BranchOutcome::True
    } else {
        BranchOutcome::False
    };
    let labeled = graph
        .successors(node_id)
        .iter()
        .any(|(_, edge)| edge.branch == Some(wanted));
    if labeled { wanted } else { BranchOutcome::Default }
}

/// Returns the error of the first failed node in topological order.
fn first_failure(graph: &WorkflowGraph, errors: &HashMap<NodeId, String>) -> String {
    let ordered = graph.topological_order().unwrap_or_default();
    for node_id in ordered {
        if let Some(message) = errors.get(&node_id) {
            let name = graph.get_node(node_id).map_or("", |n| n.name.as_str());
            return format!("step '{name}' failed: {message}");
        }
    }
    // Fall back to any recorded error
    errors
        .values()
        .next()
        .cloned()
        .unwrap_or_else(|| "execution failed".to_string())
}

/// Collects the outputs of succeeded terminal nodes, keyed by node ID.
fn final_output(
    graph: &WorkflowGraph,
    progress: &ProgressGraph,
    context: &JsonMap<String, JsonValue>,
) -> JsonValue {
    let mut output = JsonMap::new();
    for node in graph.terminal_nodes() {
        if progress.status(node.id) != Some(crate::execution::StepStatus::Success) {
            continue;
        }
        let key = node.id.to_string();
        if let Some(value) = context.get(&key) {
            output.insert(key, value.clone());
        }
    }
    JsonValue::Object(output)
}

/// Executes one node, including its retry loop, and reports the result.
async fn run_node(
    node: Node,
    context: JsonValue,
    handlers: HandlerRegistry,
    events: Arc<dyn EventSink>,
    execution_id: ExecutionId,
) -> NodeTaskOutput {
    let node_id = node.id;
    let kind = node.kind();

    let publish_started = |attempt: u32| {
        let events = events.clone();
        async move {
            if let Err(sink_error) = events
                .publish(Envelope::new(ExecutionEvent::StepStarted {
                    execution_id,
                    node_id,
                    attempt,
                    timestamp: Utc::now(),
                }))
                .await
            {
                error!(%sink_error, "failed to publish step event");
            }
        }
    };

    match &node.config {
        NodeConfig::Trigger(_) => {
            publish_started(1).await;
            let output = context.get("trigger").cloned().unwrap_or(JsonValue::Null);
            NodeTaskOutput {
                node_id,
                attempts: 1,
                result: Ok(NodeSuccess {
                    output,
                    condition_result: None,
                }),
            }
        }
        NodeConfig::Condition(config) => {
            publish_started(1).await;
            let result = config.expression.eval(&context);
            NodeTaskOutput {
                node_id,
                attempts: 1,
                result: Ok(NodeSuccess {
                    output: json!({"result": result}),
                    condition_result: Some(result),
                }),
            }
        }
        NodeConfig::Delay(config) => {
            publish_started(1).await;
            tokio::time::sleep(Duration::from_secs(config.duration_secs)).await;
            NodeTaskOutput {
                node_id,
                attempts: 1,
                result: Ok(NodeSuccess {
                    output: json!({"delayed_secs": config.duration_secs}),
                    condition_result: None,
                }),
            }
        }
        _ => {
            let handler = match handlers.handler_for(kind) {
                Ok(handler) => handler,
                Err(handler_error) => {
                    return NodeTaskOutput {
                        node_id,
                        attempts: 0,
                        result: Err(handler_error.to_string()),
                    };
                }
            };

            let policy = node.retry_policy();
            let mut attempt = 0;
            loop {
                attempt += 1;
                publish_started(attempt).await;

                let run = handler.execute(&node, &context);
                let result = if is_external_kind(kind) {
                    match tokio::time::timeout(HANDLER_TIMEOUT, run).await {
                        Ok(result) => result,
                        Err(_) => Err(crate::error::HandlerError::Timeout {
                            seconds: HANDLER_TIMEOUT.as_secs(),
                        }),
                    }
                } else {
                    run.await
                };

                match result {
                    Ok(output) => {
                        return NodeTaskOutput {
                            node_id,
                            attempts: attempt,
                            result: Ok(NodeSuccess {
                                output,
                                condition_result: None,
                            }),
                        };
                    }
                    Err(handler_error) if attempt < policy.max_attempts => {
                        let backoff = policy.backoff_for(attempt);
                        warn!(
                            %execution_id, %node_id, %attempt, error = %handler_error,
                            backoff_ms = backoff.as_millis(), "step attempt failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(handler_error) => {
                        return NodeTaskOutput {
                            node_id,
                            attempts: attempt,
                            result: Err(handler_error.to_string()),
                        };
                    }
                }
            }
        }
    }
}
