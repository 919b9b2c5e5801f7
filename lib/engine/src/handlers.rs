//! Node handlers.
//!
//! The executor runs trigger, condition, and delay nodes itself. Every
//! other node kind performs externally visible work and is dispatched
//! through a [`NodeHandler`] looked up by kind in the [`HandlerRegistry`].
//! Handlers wrap collaborator services (connector runtime, agent and
//! skill runtime, notification channels) so the engine stays independent
//! of how those are backed.

use crate::error::HandlerError;
use crate::node::{ActionConfig, LogLevel, Node, NodeConfig, NodeKind};
use async_trait::async_trait;
use flowline_core::{AgentId, ConnectorId, SkillId};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Executes a single node against the accumulated run context.
///
/// Handlers must be idempotent where possible: the executor retries
/// failed attempts according to the node's retry policy.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Runs the node and returns its output.
    async fn execute(&self, node: &Node, context: &JsonValue) -> Result<JsonValue, HandlerError>;
}

/// Invokes connector operations against external systems.
#[async_trait]
pub trait ConnectorService: Send + Sync {
    /// Performs one connector operation.
    async fn invoke(
        &self,
        connector_id: ConnectorId,
        operation: &str,
        parameters: &JsonValue,
        context: &JsonValue,
    ) -> Result<JsonValue, HandlerError>;
}

/// Runs agents and skills.
#[async_trait]
pub trait CapabilityService: Send + Sync {
    /// Runs an agent against the context.
    async fn run_agent(
        &self,
        agent_id: AgentId,
        context: &JsonValue,
    ) -> Result<JsonValue, HandlerError>;

    /// Runs a skill with the given parameters.
    async fn run_skill(
        &self,
        skill_id: SkillId,
        parameters: &JsonValue,
        context: &JsonValue,
    ) -> Result<JsonValue, HandlerError>;
}

/// Delivers outbound notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends an email.
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        context: &JsonValue,
    ) -> Result<(), HandlerError>;

    /// Posts a templated message to a channel.
    async fn notify(
        &self,
        channel: &str,
        template: &str,
        context: &JsonValue,
    ) -> Result<(), HandlerError>;
}

/// Maps node kinds to their handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a node kind, replacing any existing one.
    pub fn register(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Builder-style [`Self::register`].
    #[must_use]
    pub fn with(mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Returns the handler for a kind.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Unsupported`] if no handler is registered.
    pub fn handler_for(&self, kind: NodeKind) -> Result<Arc<dyn NodeHandler>, HandlerError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or(HandlerError::Unsupported { kind })
    }

    /// Creates a registry backed by the given services.
    #[must_use]
    pub fn with_services(
        connectors: Arc<dyn ConnectorService>,
        capabilities: Arc<dyn CapabilityService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let capability_handler = Arc::new(CapabilityHandler::new(capabilities));
        Self::new()
            .with(NodeKind::Connector, Arc::new(ConnectorHandler::new(connectors)))
            .with(NodeKind::Agent, capability_handler.clone())
            .with(NodeKind::Skill, capability_handler)
            .with(NodeKind::Action, Arc::new(ActionHandler::new(notifier)))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Handler for connector nodes.
pub struct ConnectorHandler {
    service: Arc<dyn ConnectorService>,
}

impl ConnectorHandler {
    #[must_use]
    pub fn new(service: Arc<dyn ConnectorService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl NodeHandler for ConnectorHandler {
    async fn execute(&self, node: &Node, context: &JsonValue) -> Result<JsonValue, HandlerError> {
        let NodeConfig::Connector(config) = &node.config else {
            return Err(HandlerError::Unsupported { kind: node.kind() });
        };
        self.service
            .invoke(
                config.connector_id,
                &config.operation,
                &config.parameters,
                context,
            )
            .await
    }
}

/// Handler for agent and skill nodes.
pub struct CapabilityHandler {
    service: Arc<dyn CapabilityService>,
}

impl CapabilityHandler {
    #[must_use]
    pub fn new(service: Arc<dyn CapabilityService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl NodeHandler for CapabilityHandler {
    async fn execute(&self, node: &Node, context: &JsonValue) -> Result<JsonValue, HandlerError> {
        match &node.config {
            NodeConfig::Agent(config) => self.service.run_agent(config.agent_id, context).await,
            NodeConfig::Skill(config) => {
                self.service
                    .run_skill(config.skill_id, &config.parameters, context)
                    .await
            }
            _ => Err(HandlerError::Unsupported { kind: node.kind() }),
        }
    }
}

/// Handler for action nodes.
///
/// Log actions are served in-process via tracing; email and notify are
/// delegated to the [`Notifier`].
pub struct ActionHandler {
    notifier: Arc<dyn Notifier>,
}

impl ActionHandler {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl NodeHandler for ActionHandler {
    async fn execute(&self, node: &Node, context: &JsonValue) -> Result<JsonValue, HandlerError> {
        let NodeConfig::Action(config) = &node.config else {
            return Err(HandlerError::Unsupported { kind: node.kind() });
        };

        match config {
            ActionConfig::Email { recipient, subject } => {
                self.notifier.send_email(recipient, subject, context).await?;
                Ok(json!({"sent": true, "recipient": recipient}))
            }
            ActionConfig::Notify { channel, template } => {
                self.notifier.notify(channel, template, context).await?;
                Ok(json!({"notified": true, "channel": channel}))
            }
            ActionConfig::Log { level } => {
                match level {
                    LogLevel::Debug => tracing::debug!(node = %node.name, %context, "log action"),
                    LogLevel::Info => tracing::info!(node = %node.name, %context, "log action"),
                    LogLevel::Warn => tracing::warn!(node = %node.name, %context, "log action"),
                    LogLevel::Error => tracing::error!(node = %node.name, %context, "log action"),
                }
                Ok(json!({"logged": true}))
            }
        }
    }
}

/// Handler that echoes its input back.
///
/// Useful in tests and as a placeholder while wiring a deployment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl NodeHandler for EchoHandler {
    async fn execute(&self, node: &Node, context: &JsonValue) -> Result<JsonValue, HandlerError> {
        Ok(json!({
            "node": node.name,
            "echo": context,
        }))
    }
}
