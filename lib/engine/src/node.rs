//! Workflow node types and configurations.
//!
//! Nodes are the building blocks of workflows. Each node has:
//! - A unique ID within the workflow
//! - A kind (Trigger, Connector, Agent, Skill, Action, Condition, Delay)
//! - Configuration specific to its kind
//! - An optional retry policy override

use crate::expr::ConditionExpr;
use flowline_core::{AgentId, ConnectorId, RuleId, SkillId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// A unique identifier for a node within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// The kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point that initiates workflow execution.
    Trigger,
    /// Call into an external system through a connector.
    Connector,
    /// Delegate to an agent.
    Agent,
    /// Invoke a reusable skill.
    Skill,
    /// Terminal side effect (email, notification, log).
    Action,
    /// Branch on a condition expression evaluated against the context.
    Condition,
    /// Pause execution for a fixed duration.
    Delay,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Trigger => "trigger",
            Self::Connector => "connector",
            Self::Agent => "agent",
            Self::Skill => "skill",
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Delay => "delay",
        };
        f.write_str(name)
    }
}

/// Configuration for trigger nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Cron-style scheduled trigger.
    Schedule {
        /// Cron expression (e.g., "0 7 * * *" for 7am daily).
        cron: String,
        /// Timezone for the schedule.
        timezone: Option<String>,
    },
    /// HTTP webhook trigger.
    Webhook {
        /// The webhook path (e.g., "invoice-received").
        path: String,
    },
    /// Email rule trigger.
    Rule {
        /// The rule expected to route into this workflow, if pinned.
        rule_id: Option<RuleId>,
    },
    /// Manual trigger (user-initiated).
    Manual,
}

/// Configuration for connector nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// The connector to invoke.
    pub connector_id: ConnectorId,
    /// The operation to perform (e.g., "fetch_invoices", "create_record").
    pub operation: String,
    /// Operation-specific parameters.
    pub parameters: JsonValue,
}

/// Configuration for agent nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The agent to delegate to.
    pub agent_id: AgentId,
}

/// Configuration for skill nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillConfig {
    /// The skill to invoke.
    pub skill_id: SkillId,
    /// Skill-specific parameters.
    pub parameters: JsonValue,
}

/// Configuration for action nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    /// Send an email.
    Email {
        /// Recipient address.
        recipient: String,
        /// Subject line template.
        subject: String,
    },
    /// Send a notification.
    Notify {
        /// Notification channel (e.g., "slack", "push").
        channel: String,
        /// Template for the notification body.
        template: String,
    },
    /// Log to execution history.
    Log {
        /// Log level.
        level: LogLevel,
    },
}

/// Log level for log actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Configuration for condition nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// The expression evaluated against the run context.
    pub expression: ConditionExpr,
}

/// Configuration for delay nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// How long to pause, in seconds.
    pub duration_secs: u64,
}

/// Configuration for a node, varying by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Trigger node configuration.
    Trigger(TriggerConfig),
    /// Connector node configuration.
    Connector(ConnectorConfig),
    /// Agent node configuration.
    Agent(AgentConfig),
    /// Skill node configuration.
    Skill(SkillConfig),
    /// Action node configuration.
    Action(ActionConfig),
    /// Condition node configuration.
    Condition(ConditionConfig),
    /// Delay node configuration.
    Delay(DelayConfig),
}

impl NodeConfig {
    /// Returns the kind of this node configuration.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Trigger(_) => NodeKind::Trigger,
            Self::Connector(_) => NodeKind::Connector,
            Self::Agent(_) => NodeKind::Agent,
            Self::Skill(_) => NodeKind::Skill,
            Self::Action(_) => NodeKind::Action,
            Self::Condition(_) => NodeKind::Condition,
            Self::Delay(_) => NodeKind::Delay,
        }
    }
}

/// Retry policy for a node's handler invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the backoff after each retry.
    pub backoff_multiplier: f64,
    /// Upper bound on the backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Returns the backoff duration before the given retry.
    ///
    /// `attempt` is 1-based: the backoff after the first failed attempt
    /// is `backoff_for(1)`.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.saturating_sub(1);
        let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
        let capped = ms.min(self.max_backoff_ms as f64);
        std::time::Duration::from_millis(capped as u64)
    }
}

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name for this node.
    pub name: String,
    /// Node configuration (determines kind and behavior).
    pub config: NodeConfig,
    /// Per-node retry policy override. Falls back to the default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl Node {
    /// Creates a new node with the given configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            config,
            retry: None,
        }
    }

    /// Creates a new node with a specific ID.
    #[must_use]
    pub fn with_id(id: NodeId, name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id,
            name: name.into(),
            config,
            retry: None,
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns the kind of this node.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Returns the effective retry policy for this node.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        let id = NodeId::new();
        let display = id.to_string();
        assert!(display.starts_with("node_"));
    }

    #[test]
    fn node_kind_from_config() {
        let node = Node::new(
            "Nightly",
            NodeConfig::Trigger(TriggerConfig::Schedule {
                cron: "0 7 * * *".to_string(),
                timezone: None,
            }),
        );
        assert_eq!(node.kind(), NodeKind::Trigger);

        let node = Node::new(
            "Wait",
            NodeConfig::Delay(DelayConfig { duration_secs: 30 }),
        );
        assert_eq!(node.kind(), NodeKind::Delay);
    }

    #[test]
    fn retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff_ms, 1_000);
    }

    #[test]
    fn retry_backoff_is_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1).as_millis(), 1_000);
        assert_eq!(policy.backoff_for(2).as_millis(), 2_000);
        assert_eq!(policy.backoff_for(3).as_millis(), 4_000);
        // Far past the cap
        assert_eq!(policy.backoff_for(30).as_millis(), 60_000);
    }

    #[test]
    fn node_retry_override() {
        let node = Node::new(
            "Flaky connector",
            NodeConfig::Connector(ConnectorConfig {
                connector_id: ConnectorId::new(),
                operation: "fetch".to_string(),
                parameters: serde_json::json!({}),
            }),
        )
        .with_retry(RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        });

        assert_eq!(node.retry_policy().max_attempts, 5);
    }

    #[test]
    fn node_serde_roundtrip() {
        let node = Node::new(
            "Send summary",
            NodeConfig::Action(ActionConfig::Email {
                recipient: "ops@example.com".to_string(),
                subject: "Daily summary".to_string(),
            }),
        );
        let json = serde_json::to_string(&node).expect("serialize");
        let parsed: Node = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(node, parsed);
    }

    #[test]
    fn node_config_json_tagging() {
        let config = NodeConfig::Trigger(TriggerConfig::Webhook {
            path: "invoice-received".to_string(),
        });
        let json = serde_json::to_value(&config).expect("to_value");
        assert_eq!(json["kind"], "trigger");
        assert_eq!(json["type"], "webhook");
        assert_eq!(json["path"], "invoice-received");
    }
}
