//! Shared application state.

use flowline_engine::dispatcher::Dispatcher;
use flowline_engine::events::EventSink;
use flowline_engine::store::{ExecutionStore, WorkflowStore};
use flowline_rules::store::RuleStore;
use std::sync::Arc;

/// State shared across all request handlers.
pub struct AppState {
    pub workflows: Arc<dyn WorkflowStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub events: Arc<dyn EventSink>,
    pub rules: Arc<dyn RuleStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Creates the application state.
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        events: Arc<dyn EventSink>,
        rules: Arc<dyn RuleStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            workflows,
            executions,
            events,
            rules,
            dispatcher,
        }
    }
}
