//! Workflow definition types.
//!
//! A workflow is a named automation owning a directed acyclic graph of
//! typed nodes. Only active workflows may be fired by schedules, rules,
//! webhooks, or manual triggers.

use crate::graph::WorkflowGraph;
use crate::node::{NodeKind, TriggerConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use flowline_core::{UserId, WorkflowId};

/// A complete workflow definition.
///
/// This is the source of truth for a workflow. The schedule field is
/// denormalized from the trigger node for efficient due-schedule scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// Whether this workflow may be fired.
    pub is_active: bool,
    /// Cron expression for schedule-triggered workflows.
    pub schedule: Option<String>,
    /// The workflow graph (nodes and edges).
    pub graph: WorkflowGraph,
    /// Who created this workflow.
    pub created_by: Option<UserId>,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a new active workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: None,
            is_active: true,
            schedule: None,
            graph: WorkflowGraph::new(),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a workflow with a specific ID.
    #[must_use]
    pub fn with_id(id: WorkflowId, name: impl Into<String>) -> Self {
        let mut workflow = Self::new(name);
        workflow.id = id;
        workflow
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the schedule.
    #[must_use]
    pub fn with_schedule(mut self, cron: impl Into<String>) -> Self {
        self.schedule = Some(cron.into());
        self
    }

    /// Activates the workflow.
    pub fn activate(&mut self) {
        self.is_active = true;
        self.touch();
    }

    /// Deactivates the workflow.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.touch();
    }

    /// Validates the workflow graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow graph is invalid.
    pub fn validate(&self) -> Result<(), crate::error::GraphError> {
        self.graph.validate()
    }

    /// Returns the webhook path of this workflow's trigger, if any.
    #[must_use]
    pub fn webhook_path(&self) -> Option<&str> {
        let trigger = self.graph.trigger_node()?;
        match &trigger.config {
            crate::node::NodeConfig::Trigger(TriggerConfig::Webhook { path }) => Some(path),
            _ => None,
        }
    }

    /// Marks the workflow as updated (bumps updated_at timestamp).
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Workflow name.
    pub name: String,
    /// Description, if any.
    pub description: Option<String>,
    /// Whether the workflow may be fired.
    pub is_active: bool,
    /// Cron schedule, if any.
    pub schedule: Option<String>,
    /// Number of nodes in the graph.
    pub node_count: usize,
    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            is_active: workflow.is_active,
            schedule: workflow.schedule.clone(),
            node_count: workflow.graph.node_count(),
            updated_at: workflow.updated_at,
        }
    }
}

/// Returns true if the node kind performs externally visible work.
///
/// Used by the executor to decide which kinds get a default timeout.
#[must_use]
pub fn is_external_kind(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Connector | NodeKind::Agent | NodeKind::Skill | NodeKind::Action
    )
}
