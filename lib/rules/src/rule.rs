//! Email rule and inbound email types.

use chrono::{DateTime, Utc};
use flowline_core::{AccountId, EventId, RuleId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Conditions an inbound email must satisfy for a rule to match.
///
/// Unset fields are wildcards. Set fields are a strict conjunction: all
/// of them must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Case-sensitive substring the sender address must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_contains: Option<String>,
    /// Case-sensitive substring the subject must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_contains: Option<String>,
    /// Whether the email must (or must not) carry attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_attachments: Option<bool>,
    /// Attachment categories; non-empty means the email must carry at
    /// least one attachment of a listed category.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_types: Vec<String>,
}

/// What happens when a rule matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleActions {
    /// Extract structured data from the email.
    #[serde(default)]
    pub extract_data: bool,
    /// Forward the email to downstream processing.
    #[serde(default)]
    pub forward_downstream: bool,
    /// Notify the account owner.
    #[serde(default)]
    pub notify: bool,
}

/// A rule routing inbound emails into a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRule {
    /// Unique identifier.
    pub id: RuleId,
    /// Human-readable name.
    pub name: String,
    /// The email account this rule watches.
    pub account_id: AccountId,
    /// Match conditions.
    pub conditions: RuleConditions,
    /// Actions taken on match.
    pub actions: RuleActions,
    /// Workflow fired on match, if any.
    pub workflow_id: Option<WorkflowId>,
    /// Evaluation order: lower numbers are evaluated first.
    pub priority: i32,
    /// Inactive rules never match.
    pub is_active: bool,
    /// How many emails this rule has matched.
    pub trigger_count: u64,
    /// When this rule last matched.
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// When this rule was created. Breaks priority ties.
    pub created_at: DateTime<Utc>,
}

impl EmailRule {
    /// Creates a new active rule with default conditions and actions.
    #[must_use]
    pub fn new(name: impl Into<String>, account_id: AccountId, priority: i32) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            account_id,
            conditions: RuleConditions::default(),
            actions: RuleActions::default(),
            workflow_id: None,
            priority,
            is_active: true,
            trigger_count: 0,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the match conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: RuleConditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Sets the actions.
    #[must_use]
    pub fn with_actions(mut self, actions: RuleActions) -> Self {
        self.actions = actions;
        self
    }

    /// Sets the workflow fired on match.
    #[must_use]
    pub fn with_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }
}

/// An inbound email event presented to the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Unique event identifier; `record_match` dedupes on it.
    pub id: EventId,
    /// The receiving account.
    pub account_id: AccountId,
    /// Sender address.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// Whether the email carries attachments.
    pub has_attachments: bool,
    /// Categories of the attachments (e.g. "pdf", "image").
    pub attachment_types: Vec<String>,
}

impl InboundEmail {
    /// Creates an email event without attachments.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        sender: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            account_id,
            sender: sender.into(),
            subject: subject.into(),
            has_attachments: false,
            attachment_types: Vec::new(),
        }
    }

    /// Adds attachments of the given categories.
    #[must_use]
    pub fn with_attachments(mut self, attachment_types: Vec<String>) -> Self {
        self.has_attachments = !attachment_types.is_empty();
        self.attachment_types = attachment_types;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rule_is_active_with_wildcards() {
        let rule = EmailRule::new("Invoices", AccountId::new(), 10);
        assert!(rule.is_active);
        assert_eq!(rule.trigger_count, 0);
        assert_eq!(rule.conditions, RuleConditions::default());
    }

    #[test]
    fn email_with_attachments() {
        let email = InboundEmail::new(AccountId::new(), "a@b.c", "Invoice")
            .with_attachments(vec!["pdf".to_string()]);
        assert!(email.has_attachments);
        assert_eq!(email.attachment_types, vec!["pdf"]);
    }

    #[test]
    fn rule_serde_roundtrip() {
        let rule = EmailRule::new("Invoices", AccountId::new(), 10)
            .with_conditions(RuleConditions {
                sender_contains: Some("billing@".to_string()),
                ..RuleConditions::default()
            })
            .with_workflow(WorkflowId::new());
        let json = serde_json::to_string(&rule).expect("serialize");
        let parsed: EmailRule = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(rule, parsed);
    }
}
