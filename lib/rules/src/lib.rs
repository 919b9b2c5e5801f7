//! Email rule model and matcher for the flowline platform.
//!
//! Rules route inbound emails into workflows. Evaluation is a pure
//! first-match-wins scan ordered by priority; recording a match is a
//! separate, explicitly atomic store operation that is idempotent per
//! event.

pub mod error;
pub mod matcher;
pub mod rule;
pub mod store;

pub use error::RuleStoreError;
pub use matcher::match_rule;
pub use rule::{EmailRule, InboundEmail, RuleActions, RuleConditions};
pub use store::{InMemoryRuleStore, RuleStore};
