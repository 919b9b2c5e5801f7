mod config;
mod error;
mod routes;
mod state;

use config::ServerConfig;
use flowline_engine::dispatcher::{Dispatcher, TracingAuditLog};
use flowline_engine::events::{EventSink, InMemoryEventSink};
use flowline_engine::handlers::{EchoHandler, HandlerRegistry, NodeHandler};
use flowline_engine::nats::NatsEventSink;
use flowline_engine::node::NodeKind;
use flowline_engine::store::{InMemoryExecutionStore, InMemoryWorkflowStore};
use flowline_rules::store::InMemoryRuleStore;
use flowline_scheduler::Scheduler;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let workflows = Arc::new(InMemoryWorkflowStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());
    let rules = Arc::new(InMemoryRuleStore::new());

    let events: Arc<dyn EventSink> = match config.nats {
        Some(nats_config) => {
            tracing::info!(url = %nats_config.url, "Connecting to NATS...");
            Arc::new(
                NatsEventSink::new(nats_config)
                    .await
                    .expect("failed to connect to NATS"),
            )
        }
        None => {
            tracing::info!("No NATS configured, keeping execution events in memory");
            Arc::new(InMemoryEventSink::new())
        }
    };

    // Backend integrations are stubbed until connector and agent
    // services land; external node kinds echo their context.
    let echo = Arc::new(EchoHandler) as Arc<dyn NodeHandler>;
    let handlers = HandlerRegistry::new()
        .with(NodeKind::Connector, echo.clone())
        .with(NodeKind::Agent, echo.clone())
        .with(NodeKind::Skill, echo.clone())
        .with(NodeKind::Action, echo);

    let dispatcher = Arc::new(Dispatcher::new(
        workflows.clone(),
        executions.clone(),
        events.clone(),
        handlers,
        Arc::new(TracingAuditLog),
    ));

    let scheduler = Scheduler::new(
        workflows.clone(),
        dispatcher.clone(),
        Duration::from_secs(config.scheduler.tick_seconds),
    );
    tokio::spawn(scheduler.run());

    let app_state = Arc::new(AppState::new(
        workflows, executions, events, rules, dispatcher,
    ));

    let app = routes::router(app_state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
