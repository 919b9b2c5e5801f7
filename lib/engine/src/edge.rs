//! Workflow edge types.
//!
//! Edges connect nodes in the workflow graph. An edge out of a condition
//! node may carry a branch label selecting when it is followed; edges
//! without a label are followed whenever the source node succeeds.

use serde::{Deserialize, Serialize};

/// The branch class of an edge out of a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOutcome {
    /// Followed when the condition evaluates to true.
    True,
    /// Followed when the condition evaluates to false.
    False,
    /// Followed when no edge matches the evaluated outcome.
    Default,
}

impl std::fmt::Display for BranchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::True => "true",
            Self::False => "false",
            Self::Default => "default",
        };
        f.write_str(name)
    }
}

/// An edge in the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Branch label for edges out of condition nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchOutcome>,
}

impl Edge {
    /// Creates an unconditional edge.
    #[must_use]
    pub fn new() -> Self {
        Self { branch: None }
    }

    /// Creates an edge followed only on the given condition outcome.
    #[must_use]
    pub fn branch(outcome: BranchOutcome) -> Self {
        Self {
            branch: Some(outcome),
        }
    }

    /// Returns true if this edge delivers for the given condition outcome.
    ///
    /// `outcome` is `None` for non-condition sources; unlabeled edges
    /// always deliver.
    #[must_use]
    pub fn delivers(&self, outcome: Option<BranchOutcome>) -> bool {
        match (self.branch, outcome) {
            (None, _) => true,
            (Some(label), Some(selected)) => label == selected,
            (Some(_), None) => false,
        }
    }
}

impl Default for Edge {
    fn default() -> Self {
        Self::new()
    }
}
