//! Rule storage.
//!
//! `record_match` is the one mutating operation the matcher pipeline
//! needs: an atomic increment-and-stamp that is idempotent per event, so
//! replays and duplicate deliveries of the same email never double-count.

use crate::error::RuleStoreError;
use crate::rule::EmailRule;
use async_trait::async_trait;
use chrono::Utc;
use flowline_core::{AccountId, EventId, RuleId};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Storage for email rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Inserts or replaces a rule.
    async fn put(&self, rule: EmailRule) -> Result<(), RuleStoreError>;

    /// Fetches a rule by ID.
    async fn get(&self, rule_id: RuleId) -> Result<Option<EmailRule>, RuleStoreError>;

    /// Lists the rules of an account.
    async fn list_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<EmailRule>, RuleStoreError>;

    /// Records that a rule matched an event.
    ///
    /// Atomically bumps `trigger_count` and stamps `last_triggered_at`.
    /// Idempotent per event: returns `Ok(false)` without mutating when
    /// the same `(rule, event)` pair was already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`RuleStoreError::RuleNotFound`] if the rule does not
    /// exist.
    async fn record_match(
        &self,
        rule_id: RuleId,
        event_id: EventId,
    ) -> Result<bool, RuleStoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    rules: Vec<EmailRule>,
    seen: HashSet<(RuleId, EventId)>,
}

/// In-memory rule store.
///
/// A single mutex guards both the rules and the seen-event set, which
/// makes `record_match` atomic the same way a row lock would.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    inner: Mutex<Inner>,
}

impl InMemoryRuleStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn put(&self, rule: EmailRule) -> Result<(), RuleStoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inner.rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
        } else {
            inner.rules.push(rule);
        }
        Ok(())
    }

    async fn get(&self, rule_id: RuleId) -> Result<Option<EmailRule>, RuleStoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .cloned())
    }

    async fn list_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<EmailRule>, RuleStoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .iter()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn record_match(
        &self,
        rule_id: RuleId,
        event_id: EventId,
    ) -> Result<bool, RuleStoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if inner.rules.iter().all(|r| r.id != rule_id) {
            return Err(RuleStoreError::RuleNotFound { rule_id });
        }

        if !inner.seen.insert((rule_id, event_id)) {
            debug!(%rule_id, %event_id, "duplicate match record ignored");
            return Ok(false);
        }

        if let Some(rule) = inner.rules.iter_mut().find(|r| r.id == rule_id) {
            rule.trigger_count += 1;
            rule.last_triggered_at = Some(Utc::now());
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::match_rule;
    use crate::rule::InboundEmail;

    #[tokio::test]
    async fn put_get_and_list() {
        let store = InMemoryRuleStore::new();
        let account_id = AccountId::new();
        let rule = EmailRule::new("Invoices", account_id, 10);
        let rule_id = rule.id;

        store.put(rule).await.unwrap();
        store
            .put(EmailRule::new("Other account", AccountId::new(), 10))
            .await
            .unwrap();

        assert!(store.get(rule_id).await.unwrap().is_some());
        let listed = store.list_for_account(account_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, rule_id);
    }

    #[tokio::test]
    async fn record_match_bumps_count_once_per_event() {
        let store = InMemoryRuleStore::new();
        let rule = EmailRule::new("Invoices", AccountId::new(), 10);
        let rule_id = rule.id;
        store.put(rule).await.unwrap();

        let event_id = EventId::new();
        assert!(store.record_match(rule_id, event_id).await.unwrap());
        // Duplicate delivery of the same event
        assert!(!store.record_match(rule_id, event_id).await.unwrap());

        let rule = store.get(rule_id).await.unwrap().unwrap();
        assert_eq!(rule.trigger_count, 1);
        assert!(rule.last_triggered_at.is_some());

        // A different event counts again
        assert!(store.record_match(rule_id, EventId::new()).await.unwrap());
        let rule = store.get(rule_id).await.unwrap().unwrap();
        assert_eq!(rule.trigger_count, 2);
    }

    #[tokio::test]
    async fn record_match_requires_existing_rule() {
        let store = InMemoryRuleStore::new();
        let result = store.record_match(RuleId::new(), EventId::new()).await;
        assert!(matches!(result, Err(RuleStoreError::RuleNotFound { .. })));
    }

    #[tokio::test]
    async fn two_matching_rules_only_winner_is_recorded() {
        let store = InMemoryRuleStore::new();
        let account_id = AccountId::new();
        let winner = EmailRule::new("Priority 1", account_id, 1);
        let loser = EmailRule::new("Priority 2", account_id, 2);
        let winner_id = winner.id;
        let loser_id = loser.id;
        store.put(winner).await.unwrap();
        store.put(loser).await.unwrap();

        let email = InboundEmail::new(account_id, "billing@acme.example", "Invoice");
        let rules = store.list_for_account(account_id).await.unwrap();
        let matched = match_rule(&rules, &email).expect("a rule matches");
        assert_eq!(matched, winner_id);

        store.record_match(matched, email.id).await.unwrap();

        let winner = store.get(winner_id).await.unwrap().unwrap();
        let loser = store.get(loser_id).await.unwrap().unwrap();
        assert_eq!(winner.trigger_count, 1);
        assert_eq!(loser.trigger_count, 0);
    }
}
