//! Error types for the workflow crate.
//!
//! Errors are layered:
//! - `GraphError`: rejected mutations of a workflow graph
//! - `TemplateError`: placeholder parsing and resolution
//! - `ExecutionError`: run preflight and node failures
//! - `ServiceError`: service-level lookups, wrapping the others
//!
//! The lower layers return plain enums; the service wraps them in a
//! rootcause `Report` at its boundary.

use crate::edge::Branch;
use autoflow_catalog::NodeKind;
use autoflow_core::{EdgeId, NodeId, WorkflowId, WorkflowRunId};
use std::fmt;

/// Errors from graph mutations.
///
/// A mutation that returns one of these has left the graph unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The definition id is not in the catalog.
    UnknownDefinition { definition_id: String },
    /// The workflow already has a trigger.
    DuplicateTrigger { existing: NodeId },
    NodeNotFound { node_id: NodeId },
    EdgeNotFound { edge_id: EdgeId },
    /// The branch label does not fit the source node's kind.
    InvalidBranch {
        node_id: NodeId,
        kind: NodeKind,
        branch: Branch,
    },
    /// The source already has an outgoing edge for this branch.
    BranchAlreadyTaken { node_id: NodeId, branch: Branch },
    /// The edge would close a cycle (self-loops included).
    CycleDetected { source: NodeId, target: NodeId },
    /// Edges may not point at the trigger.
    TriggerAsTarget { node_id: NodeId },
    /// The target already has an incoming edge.
    TargetAlreadyConnected { node_id: NodeId },
    /// The field is not declared by the node's definition.
    UnknownField {
        node_id: NodeId,
        definition_id: String,
        field: String,
    },
    InvalidPolicy { node_id: NodeId, reason: String },
    /// A replayed node or edge reuses an id already in the graph.
    DuplicateId { id: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDefinition { definition_id } => {
                write!(f, "unknown integration definition: {definition_id}")
            }
            Self::DuplicateTrigger { existing } => {
                write!(f, "workflow already has a trigger: {existing}")
            }
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::EdgeNotFound { edge_id } => write!(f, "edge not found: {edge_id}"),
            Self::InvalidBranch {
                node_id,
                kind,
                branch,
            } => write!(
                f,
                "branch '{branch}' is not valid on {kind} node {node_id}"
            ),
            Self::BranchAlreadyTaken { node_id, branch } => {
                write!(f, "node {node_id} already has a '{branch}' edge")
            }
            Self::CycleDetected { source, target } => {
                write!(f, "edge {source} -> {target} would create a cycle")
            }
            Self::TriggerAsTarget { node_id } => {
                write!(f, "trigger node {node_id} cannot be an edge target")
            }
            Self::TargetAlreadyConnected { node_id } => {
                write!(f, "node {node_id} already has an incoming edge")
            }
            Self::UnknownField {
                node_id,
                definition_id,
                field,
            } => write!(
                f,
                "field '{field}' is not declared by {definition_id} (node {node_id})"
            ),
            Self::InvalidPolicy { node_id, reason } => {
                write!(f, "invalid execution policy for node {node_id}: {reason}")
            }
            Self::DuplicateId { id } => write!(f, "id already present in graph: {id}"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from placeholder resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The referenced step has not produced output in this run.
    MissingStepOutput { node_id: NodeId },
    /// The referenced step's output has no value at the path.
    MissingOutputField { node_id: NodeId, path: String },
    MalformedPlaceholder { placeholder: String, reason: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStepOutput { node_id } => {
                write!(f, "step {node_id} has no recorded output")
            }
            Self::MissingOutputField { node_id, path } => {
                write!(f, "output of step {node_id} has no field '{path}'")
            }
            Self::MalformedPlaceholder {
                placeholder,
                reason,
            } => write!(f, "malformed placeholder '{placeholder}': {reason}"),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Errors rejecting a run before it starts, or failing it part way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    MissingTrigger,
    NodeNotConfigured { node_id: NodeId },
    /// A placeholder names a step that does not dominate the node.
    UnresolvableReference {
        node_id: NodeId,
        field: String,
        referenced: NodeId,
    },
    MalformedPlaceholder {
        node_id: NodeId,
        field: String,
        placeholder: String,
        reason: String,
    },
    /// The action executor reported an error on the final attempt.
    NodeFailed { node_id: NodeId, reason: String },
    NodeTimeout { node_id: NodeId, timeout_ms: u64 },
    Template {
        node_id: NodeId,
        error: TemplateError,
    },
    Condition { node_id: NodeId, reason: String },
    Cancelled,
}

impl ExecutionError {
    /// True for the errors raised before any node runs.
    #[must_use]
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::MissingTrigger
                | Self::NodeNotConfigured { .. }
                | Self::UnresolvableReference { .. }
                | Self::MalformedPlaceholder { .. }
        )
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTrigger => write!(f, "workflow has no trigger"),
            Self::NodeNotConfigured { node_id } => {
                write!(f, "node {node_id} is missing required configuration")
            }
            Self::UnresolvableReference {
                node_id,
                field,
                referenced,
            } => write!(
                f,
                "field '{field}' on node {node_id} references {referenced}, which does not run before it on every path"
            ),
            Self::MalformedPlaceholder {
                node_id,
                field,
                placeholder,
                reason,
            } => write!(
                f,
                "field '{field}' on node {node_id} has malformed placeholder '{placeholder}': {reason}"
            ),
            Self::NodeFailed { node_id, reason } => write!(f, "node {node_id} failed: {reason}"),
            Self::NodeTimeout {
                node_id,
                timeout_ms,
            } => write!(f, "node {node_id} timed out after {timeout_ms}ms"),
            Self::Template { node_id, error } => {
                write!(f, "could not resolve config of node {node_id}: {error}")
            }
            Self::Condition { node_id, reason } => {
                write!(f, "condition {node_id} could not be evaluated: {reason}")
            }
            Self::Cancelled => write!(f, "execution cancelled"),
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Errors from the workflow service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    WorkflowNotFound { workflow_id: WorkflowId },
    RunNotFound { run_id: WorkflowRunId },
    /// Runs cannot start while the workflow is disabled.
    WorkflowDisabled { workflow_id: WorkflowId },
    /// An imported document could not be decoded or replayed.
    InvalidImport { reason: String },
    Graph(GraphError),
    Execution(ExecutionError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::WorkflowDisabled { workflow_id } => {
                write!(f, "workflow {workflow_id} is disabled")
            }
            Self::InvalidImport { reason } => write!(f, "invalid workflow document: {reason}"),
            Self::Graph(e) => write!(f, "graph error: {e}"),
            Self::Execution(e) => write!(f, "execution error: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<GraphError> for ServiceError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl From<ExecutionError> for ServiceError {
    fn from(e: ExecutionError) -> Self {
        Self::Execution(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        let node_id = NodeId::new();
        let err = GraphError::BranchAlreadyTaken {
            node_id,
            branch: Branch::True,
        };
        assert_eq!(
            err.to_string(),
            format!("node {node_id} already has a 'true' edge")
        );
    }

    #[test]
    fn template_error_display() {
        let node_id = NodeId::new();
        let err = TemplateError::MissingOutputField {
            node_id,
            path: "contact.email".to_string(),
        };
        assert!(err.to_string().contains("no field 'contact.email'"));
    }

    #[test]
    fn preflight_errors() {
        let node_id = NodeId::new();
        assert!(ExecutionError::MissingTrigger.is_preflight());
        assert!(ExecutionError::NodeNotConfigured { node_id }.is_preflight());
        assert!(!ExecutionError::Cancelled.is_preflight());
        assert!(
            !ExecutionError::NodeTimeout {
                node_id,
                timeout_ms: 5
            }
            .is_preflight()
        );
    }

    #[test]
    fn service_error_wraps_graph_error() {
        let edge_id = EdgeId::new();
        let err = ServiceError::from(GraphError::EdgeNotFound { edge_id });
        assert!(err.to_string().contains("edge not found"));
    }
}
