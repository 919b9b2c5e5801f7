//! HTTP routes.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use flowline_core::{AccountId, EventId, ExecutionId, RuleId, UserId, WorkflowId};
use flowline_engine::definition::{Workflow, WorkflowSummary};
use flowline_engine::dispatcher::{DispatchOutcome, FireRequest};
use flowline_engine::events::ExecutionEvent;
use flowline_engine::execution::{Execution, ExecutionStep};
use flowline_rules::matcher::match_rule;
use flowline_rules::rule::{EmailRule, InboundEmail, RuleActions, RuleConditions};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// Builds the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/workflows", post(create_workflow).get(list_workflows))
        .route("/workflows/{id}/fire", post(fire_workflow))
        .route("/hooks/{path}", post(webhook))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/events", get(get_execution_events))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .route("/accounts/{id}/rules", post(create_rule).get(list_rules))
        .route("/accounts/{id}/rules/match", post(match_account_rule))
        .route("/rules/{id}/matches", post(record_rule_match))
        .with_state(state)
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(mut workflow): Json<Workflow>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    workflow.graph.rebuild_index_map();
    workflow
        .validate()
        .map_err(|e| ApiError::UnprocessableEntity(e.to_string()))?;

    let id = workflow.id;
    state.workflows.put(workflow).await?;
    Ok((StatusCode::CREATED, Json(json!({"id": id.to_string()}))))
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WorkflowSummary>>, ApiError> {
    Ok(Json(state.workflows.list().await?))
}

#[derive(Debug, Default, Deserialize)]
struct FireBody {
    #[serde(default = "empty_object")]
    input: JsonValue,
    #[serde(default)]
    executed_by: Option<String>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

async fn fire_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<FireBody>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let workflow_id: WorkflowId = id.parse()?;
    let executed_by: Option<UserId> = body
        .executed_by
        .as_deref()
        .map(str::parse)
        .transpose()?;

    let outcome = state
        .dispatcher
        .fire(workflow_id, FireRequest::manual(body.input, executed_by))
        .await?;
    started_response(outcome)
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(input): Json<JsonValue>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let workflow = state
        .workflows
        .find_by_webhook_path(&path)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no workflow listens on hook '{path}'")))?;

    let outcome = state
        .dispatcher
        .fire(workflow.id, FireRequest::webhook(input))
        .await?;
    started_response(outcome)
}

fn started_response(outcome: DispatchOutcome) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    match outcome {
        DispatchOutcome::Started(execution_id) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({"execution_id": execution_id.to_string()})),
        )),
        // User-originated fires of inactive workflows error instead, so
        // this only covers races with concurrent deactivation.
        DispatchOutcome::Suppressed => {
            Err(ApiError::Conflict("workflow is inactive".to_string()))
        }
    }
}

/// Point-in-time view of an execution and its steps.
#[derive(Debug, Serialize)]
struct ExecutionSnapshot {
    #[serde(flatten)]
    execution: Execution,
    steps: Vec<ExecutionStep>,
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionSnapshot>, ApiError> {
    let execution_id: ExecutionId = id.parse()?;
    let execution = state
        .executions
        .get(execution_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("execution not found: {execution_id}")))?;
    let steps = state.executions.steps(execution_id).await?;

    Ok(Json(ExecutionSnapshot { execution, steps }))
}

async fn get_execution_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ExecutionEvent>>, ApiError> {
    let execution_id: ExecutionId = id.parse()?;
    Ok(Json(state.events.load_events(execution_id).await?))
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let execution_id: ExecutionId = id.parse()?;
    let cancelled = state.dispatcher.cancel(execution_id).await?;
    Ok(Json(json!({"cancelled": cancelled})))
}

#[derive(Debug, Deserialize)]
struct CreateRuleBody {
    name: String,
    #[serde(default)]
    conditions: RuleConditions,
    #[serde(default)]
    actions: RuleActions,
    #[serde(default)]
    workflow_id: Option<String>,
    #[serde(default = "default_priority")]
    priority: i32,
}

fn default_priority() -> i32 {
    100
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CreateRuleBody>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let account_id: AccountId = id.parse()?;
    let workflow_id: Option<WorkflowId> = body
        .workflow_id
        .as_deref()
        .map(str::parse)
        .transpose()?;

    let mut rule = EmailRule::new(body.name, account_id, body.priority)
        .with_conditions(body.conditions)
        .with_actions(body.actions);
    rule.workflow_id = workflow_id;

    let rule_id = rule.id;
    state.rules.put(rule).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"id": rule_id.to_string()})),
    ))
}

async fn list_rules(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EmailRule>>, ApiError> {
    let account_id: AccountId = id.parse()?;
    Ok(Json(state.rules.list_for_account(account_id).await?))
}

#[derive(Debug, Deserialize)]
struct MatchBody {
    /// Event ID of the inbound email; generated when absent (dry run).
    #[serde(default)]
    id: Option<String>,
    sender: String,
    subject: String,
    #[serde(default)]
    has_attachments: bool,
    #[serde(default)]
    attachment_types: Vec<String>,
}

async fn match_account_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<MatchBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let account_id: AccountId = id.parse()?;
    let event_id: EventId = match body.id.as_deref() {
        Some(raw) => raw.parse()?,
        None => EventId::new(),
    };

    let email = InboundEmail {
        id: event_id,
        account_id,
        sender: body.sender,
        subject: body.subject,
        has_attachments: body.has_attachments,
        attachment_types: body.attachment_types,
    };

    let rules = state.rules.list_for_account(account_id).await?;
    let rule_id = match_rule(&rules, &email);
    Ok(Json(json!({"rule_id": rule_id.map(|r| r.to_string())})))
}

#[derive(Debug, Deserialize)]
struct RecordMatchBody {
    event_id: String,
}

async fn record_rule_match(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RecordMatchBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let rule_id: RuleId = id.parse()?;
    let event_id: EventId = body.event_id.parse()?;
    let recorded = state.rules.record_match(rule_id, event_id).await?;
    Ok(Json(json!({"recorded": recorded})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_engine::dispatcher::{Dispatcher, TracingAuditLog};
    use flowline_engine::edge::Edge;
    use flowline_engine::events::InMemoryEventSink;
    use flowline_engine::handlers::{EchoHandler, HandlerRegistry, NodeHandler};
    use flowline_engine::node::{
        ActionConfig, LogLevel, Node, NodeConfig, NodeKind, TriggerConfig,
    };
    use flowline_engine::store::{InMemoryExecutionStore, InMemoryWorkflowStore};
    use flowline_rules::store::InMemoryRuleStore;
    use std::time::Duration;

    fn app_state() -> Arc<AppState> {
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let executions = Arc::new(InMemoryExecutionStore::new());
        let events = Arc::new(InMemoryEventSink::new());
        let rules = Arc::new(InMemoryRuleStore::new());
        let handlers = HandlerRegistry::new().with(
            NodeKind::Action,
            Arc::new(EchoHandler) as Arc<dyn NodeHandler>,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            workflows.clone(),
            executions.clone(),
            events.clone(),
            handlers,
            Arc::new(TracingAuditLog),
        ));
        Arc::new(AppState::new(
            workflows, executions, events, rules, dispatcher,
        ))
    }

    fn webhook_workflow(path: &str) -> Workflow {
        let mut workflow = Workflow::new("Hooked");
        let t = workflow.graph.add_node(Node::new(
            "Start",
            NodeConfig::Trigger(TriggerConfig::Webhook {
                path: path.to_string(),
            }),
        ));
        let a = workflow.graph.add_node(Node::new(
            "Log",
            NodeConfig::Action(ActionConfig::Log {
                level: LogLevel::Info,
            }),
        ));
        workflow.graph.add_edge(t, a, Edge::new()).unwrap();
        workflow
    }

    async fn wait_terminal(state: &AppState, execution_id: ExecutionId) {
        for _ in 0..200 {
            if let Some(execution) = state.executions.get(execution_id).await.unwrap() {
                if execution.status.is_terminal() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution never reached a terminal state");
    }

    #[tokio::test]
    async fn fire_unknown_workflow_is_404() {
        let state = app_state();
        let result = fire_workflow(
            State(state),
            Path(WorkflowId::new().to_string()),
            Json(FireBody::default()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn fire_with_bad_id_is_400() {
        let state = app_state();
        let result = fire_workflow(
            State(state),
            Path("not-an-id".to_string()),
            Json(FireBody::default()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn create_workflow_validates_the_graph() {
        let state = app_state();

        // A workflow with no trigger node is rejected
        let mut invalid = Workflow::new("No trigger");
        invalid.graph.add_node(Node::new(
            "Log",
            NodeConfig::Action(ActionConfig::Log {
                level: LogLevel::Info,
            }),
        ));
        let result = create_workflow(State(state.clone()), Json(invalid)).await;
        assert!(matches!(result, Err(ApiError::UnprocessableEntity(_))));

        let (status, _) = create_workflow(State(state.clone()), Json(webhook_workflow("hook")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(
            list_workflows(State(state)).await.unwrap().0.len(),
            1
        );
    }

    #[tokio::test]
    async fn webhook_routes_by_path_and_fires() {
        let state = app_state();
        let workflow = webhook_workflow("invoice-received");
        state.workflows.put(workflow).await.unwrap();

        let result = webhook(
            State(state.clone()),
            Path("unknown-hook".to_string()),
            Json(json!({})),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let (status, Json(body)) = webhook(
            State(state.clone()),
            Path("invoice-received".to_string()),
            Json(json!({"invoice": 42})),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        let execution_id: ExecutionId = body["execution_id"].as_str().unwrap().parse().unwrap();
        wait_terminal(&state, execution_id).await;

        let Json(snapshot) = get_execution(State(state), Path(execution_id.to_string()))
            .await
            .unwrap();
        assert!(snapshot.execution.status.is_terminal());
        assert_eq!(snapshot.steps.len(), 2);
    }

    #[tokio::test]
    async fn cancel_after_completion_reports_false() {
        let state = app_state();
        let workflow = webhook_workflow("hook");
        let workflow_id = workflow.id;
        state.workflows.put(workflow).await.unwrap();

        let outcome = state
            .dispatcher
            .fire(workflow_id, FireRequest::manual(json!({}), None))
            .await
            .unwrap();
        let DispatchOutcome::Started(execution_id) = outcome else {
            panic!("expected a started execution");
        };
        wait_terminal(&state, execution_id).await;

        let Json(body) = cancel_execution(State(state), Path(execution_id.to_string()))
            .await
            .unwrap();
        assert_eq!(body["cancelled"], false);
    }

    #[tokio::test]
    async fn rule_match_and_record_flow() {
        let state = app_state();
        let account_id = AccountId::new();

        let (status, Json(created)) = create_rule(
            State(state.clone()),
            Path(account_id.to_string()),
            Json(CreateRuleBody {
                name: "Invoices".to_string(),
                conditions: RuleConditions {
                    subject_contains: Some("Invoice".to_string()),
                    ..RuleConditions::default()
                },
                actions: RuleActions::default(),
                workflow_id: None,
                priority: 1,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let rule_id = created["id"].as_str().unwrap().to_string();

        // Matching is a pure dry run
        let event_id = EventId::new();
        let Json(matched) = match_account_rule(
            State(state.clone()),
            Path(account_id.to_string()),
            Json(MatchBody {
                id: Some(event_id.to_string()),
                sender: "billing@acme.example".to_string(),
                subject: "Invoice #42".to_string(),
                has_attachments: false,
                attachment_types: Vec::new(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(matched["rule_id"].as_str().unwrap(), rule_id);

        // Recording is explicit and idempotent per event
        let Json(first) = record_rule_match(
            State(state.clone()),
            Path(rule_id.clone()),
            Json(RecordMatchBody {
                event_id: event_id.to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(first["recorded"], true);

        let Json(second) = record_rule_match(
            State(state),
            Path(rule_id),
            Json(RecordMatchBody {
                event_id: event_id.to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(second["recorded"], false);
    }

    #[tokio::test]
    async fn record_match_unknown_rule_is_404() {
        let state = app_state();
        let result = record_rule_match(
            State(state),
            Path(RuleId::new().to_string()),
            Json(RecordMatchBody {
                event_id: EventId::new().to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
