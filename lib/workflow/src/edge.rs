//! Edge types for workflow graphs.
//!
//! An edge hands control from one step to the next. Edges leaving a
//! condition carry the outcome they belong to; every other edge is a
//! `default` edge.

use autoflow_core::{EdgeId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome label on an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Plain sequential hand-off from a trigger or action.
    #[default]
    Default,
    /// Taken when the source condition evaluates to `true`.
    True,
    /// Taken when the source condition evaluates to `false`.
    False,
}

impl Branch {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::True => "true",
            Self::False => "false",
        }
    }

    /// The branch a condition follows for a given outcome.
    #[must_use]
    pub fn for_outcome(outcome: bool) -> Self {
        if outcome { Self::True } else { Self::False }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two workflow nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub branch: Branch,
    /// Monotonic insertion counter, unique within a workflow. Breaks ties
    /// when numbering steps: the earlier connection is numbered first.
    pub sequence: u64,
}

impl WorkflowEdge {
    /// Creates an edge with a fresh id.
    #[must_use]
    pub fn new(source: NodeId, target: NodeId, branch: Branch, sequence: u64) -> Self {
        Self {
            id: EdgeId::new(),
            source,
            target,
            branch,
            sequence,
        }
    }
}
