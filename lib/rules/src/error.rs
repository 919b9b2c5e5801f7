//! Rule store errors.

use flowline_core::RuleId;
use std::fmt;

/// Errors from rule storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleStoreError {
    /// The rule does not exist.
    RuleNotFound { rule_id: RuleId },
    /// The storage backend failed.
    Backend { reason: String },
}

impl fmt::Display for RuleStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RuleNotFound { rule_id } => write!(f, "rule not found: {rule_id}"),
            Self::Backend { reason } => write!(f, "rule store backend failure: {reason}"),
        }
    }
}

impl std::error::Error for RuleStoreError {}
