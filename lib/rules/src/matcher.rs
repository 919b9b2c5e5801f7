//! First-match-wins rule evaluation.
//!
//! Pure functions with no side effects: recording a match lives in the
//! store, never here, so evaluation can be re-run safely (dry runs,
//! tests, replays).

use crate::rule::{EmailRule, InboundEmail};
use flowline_core::RuleId;

/// Returns the rule that matches the email, if any.
///
/// Active rules of the email's account are evaluated in
/// `(priority asc, created_at asc)` order; the first match wins and
/// evaluation stops.
#[must_use]
pub fn match_rule(rules: &[EmailRule], email: &InboundEmail) -> Option<RuleId> {
    let mut candidates: Vec<&EmailRule> = rules
        .iter()
        .filter(|rule| rule.is_active && rule.account_id == email.account_id)
        .collect();
    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
    });

    candidates
        .into_iter()
        .find(|rule| matches(rule, email))
        .map(|rule| rule.id)
}

/// Returns true if every set condition of the rule holds for the email.
///
/// Unset conditions are wildcards; substring checks are case-sensitive.
#[must_use]
pub fn matches(rule: &EmailRule, email: &InboundEmail) -> bool {
    let conditions = &rule.conditions;

    if let Some(needle) = &conditions.sender_contains {
        if !email.sender.contains(needle.as_str()) {
            return false;
        }
    }

    if let Some(needle) = &conditions.subject_contains {
        if !email.subject.contains(needle.as_str()) {
            return false;
        }
    }

    if let Some(required) = conditions.has_attachments {
        if email.has_attachments != required {
            return false;
        }
    }

    if !conditions.attachment_types.is_empty() {
        let intersects = email
            .attachment_types
            .iter()
            .any(|t| conditions.attachment_types.contains(t));
        if !intersects {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleConditions;
    use flowline_core::AccountId;

    fn email(account_id: AccountId) -> InboundEmail {
        InboundEmail::new(account_id, "billing@acme.example", "Invoice #42 attached")
            .with_attachments(vec!["pdf".to_string()])
    }

    #[test]
    fn wildcard_rule_matches_anything() {
        let account_id = AccountId::new();
        let rule = EmailRule::new("Catch-all", account_id, 100);
        assert!(matches(&rule, &email(account_id)));
    }

    #[test]
    fn conjunction_is_strict() {
        let account_id = AccountId::new();
        let rule = EmailRule::new("Invoices", account_id, 10).with_conditions(RuleConditions {
            sender_contains: Some("billing@".to_string()),
            subject_contains: Some("Invoice".to_string()),
            has_attachments: Some(true),
            attachment_types: vec!["pdf".to_string()],
        });

        assert!(matches(&rule, &email(account_id)));

        // One failing condition breaks the whole rule
        let wrong_subject = InboundEmail::new(account_id, "billing@acme.example", "Newsletter")
            .with_attachments(vec!["pdf".to_string()]);
        assert!(!matches(&rule, &wrong_subject));
    }

    #[test]
    fn substring_match_is_case_sensitive() {
        let account_id = AccountId::new();
        let rule = EmailRule::new("Invoices", account_id, 10).with_conditions(RuleConditions {
            subject_contains: Some("invoice".to_string()),
            ..RuleConditions::default()
        });

        // Email subject says "Invoice", rule wants lowercase "invoice"
        assert!(!matches(&rule, &email(account_id)));
    }

    #[test]
    fn attachment_types_require_intersection() {
        let account_id = AccountId::new();
        let rule = EmailRule::new("Images", account_id, 10).with_conditions(RuleConditions {
            attachment_types: vec!["image".to_string(), "video".to_string()],
            ..RuleConditions::default()
        });

        // Email carries only a pdf
        assert!(!matches(&rule, &email(account_id)));

        let with_image = InboundEmail::new(account_id, "a@b.c", "Photos")
            .with_attachments(vec!["image".to_string()]);
        assert!(matches(&rule, &with_image));
    }

    #[test]
    fn has_attachments_false_requires_none() {
        let account_id = AccountId::new();
        let rule = EmailRule::new("Plain text only", account_id, 10).with_conditions(
            RuleConditions {
                has_attachments: Some(false),
                ..RuleConditions::default()
            },
        );

        assert!(!matches(&rule, &email(account_id)));
        assert!(matches(
            &rule,
            &InboundEmail::new(account_id, "a@b.c", "Hello")
        ));
    }

    #[test]
    fn lower_priority_number_wins() {
        let account_id = AccountId::new();
        let low_priority = EmailRule::new("Catch-all", account_id, 100);
        let high_priority = EmailRule::new("Invoices first", account_id, 1);
        let winner = high_priority.id;

        // Order in the slice does not matter
        let rules = vec![low_priority, high_priority];
        assert_eq!(match_rule(&rules, &email(account_id)), Some(winner));
    }

    #[test]
    fn created_at_breaks_priority_ties() {
        let account_id = AccountId::new();
        let mut older = EmailRule::new("Older", account_id, 10);
        older.created_at = chrono::Utc::now() - chrono::Duration::days(1);
        let newer = EmailRule::new("Newer", account_id, 10);
        let winner = older.id;

        let rules = vec![newer, older];
        assert_eq!(match_rule(&rules, &email(account_id)), Some(winner));
    }

    #[test]
    fn inactive_and_foreign_rules_never_match() {
        let account_id = AccountId::new();
        let mut inactive = EmailRule::new("Disabled", account_id, 1);
        inactive.is_active = false;
        let foreign = EmailRule::new("Other account", AccountId::new(), 1);

        let rules = vec![inactive, foreign];
        assert_eq!(match_rule(&rules, &email(account_id)), None);
    }

    #[test]
    fn no_match_returns_none() {
        let account_id = AccountId::new();
        let rule = EmailRule::new("Never", account_id, 1).with_conditions(RuleConditions {
            sender_contains: Some("nobody@".to_string()),
            ..RuleConditions::default()
        });

        assert_eq!(match_rule(&[rule], &email(account_id)), None);
    }
}
