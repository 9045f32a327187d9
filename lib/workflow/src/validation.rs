//! Execution-readiness checks.
//!
//! Validation never mutates the workflow. It reports every problem it finds;
//! errors block a run, warnings do not.

use crate::error::ExecutionError;
use crate::graph::WorkflowGraph;
use crate::node::WorkflowNode;
use autoflow_catalog::Catalog;
use autoflow_core::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One finding in a validation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// No trigger has been placed.
    MissingTrigger,
    /// The node cannot be reached from the trigger and will never run.
    UnreachableNode { node_id: NodeId },
    /// A required field has no value.
    NodeNotConfigured { node_id: NodeId },
    /// A placeholder names a step that does not run before this node on
    /// every path from the trigger.
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
    /// A literal value does not fit its field type.
    InvalidFieldValue {
        node_id: NodeId,
        field: String,
        reason: String,
    },
}

impl ValidationIssue {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnreachableNode { .. } | Self::InvalidFieldValue { .. } => Severity::Warning,
            Self::MissingTrigger
            | Self::NodeNotConfigured { .. }
            | Self::UnresolvableReference { .. }
            | Self::MalformedPlaceholder { .. } => Severity::Error,
        }
    }

    /// The blocking error this issue corresponds to, for error-severity
    /// issues.
    #[must_use]
    pub fn to_execution_error(&self) -> Option<ExecutionError> {
        match self.clone() {
            Self::MissingTrigger => Some(ExecutionError::MissingTrigger),
            Self::NodeNotConfigured { node_id } => {
                Some(ExecutionError::NodeNotConfigured { node_id })
            }
            Self::UnresolvableReference {
                node_id,
                field,
                referenced,
            } => Some(ExecutionError::UnresolvableReference {
                node_id,
                field,
                referenced,
            }),
            Self::MalformedPlaceholder {
                node_id,
                field,
                placeholder,
                reason,
            } => Some(ExecutionError::MalformedPlaceholder {
                node_id,
                field,
                placeholder,
                reason,
            }),
            Self::UnreachableNode { .. } | Self::InvalidFieldValue { .. } => None,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnreachableNode { node_id } => {
                write!(f, "node {node_id} is not reachable from the trigger")
            }
            Self::InvalidFieldValue {
                node_id,
                field,
                reason,
            } => write!(f, "field '{field}' on node {node_id}: {reason}"),
            other => match other.to_execution_error() {
                Some(error) => write!(f, "{error}"),
                None => Ok(()),
            },
        }
    }
}

/// All findings for one workflow, in step order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity() == Severity::Warning)
    }

    /// True when nothing blocks a run.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.errors().next().is_none()
    }

    /// The first blocking issue as an [`ExecutionError`].
    ///
    /// # Errors
    ///
    /// Returns the error for the first error-severity issue.
    pub fn preflight(&self) -> Result<(), ExecutionError> {
        match self.errors().find_map(ValidationIssue::to_execution_error) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Checks a graph for execution readiness.
#[must_use]
pub fn validate(graph: &WorkflowGraph, catalog: &Catalog) -> ValidationReport {
    let mut issues = Vec::new();

    if graph.trigger().is_none() {
        issues.push(ValidationIssue::MissingTrigger);
    }

    let dominators = graph.strict_dominators();
    for node in graph.steps() {
        check_node(node, catalog, &dominators, &mut issues);
    }

    if graph.trigger().is_some() {
        let mut unreachable: Vec<NodeId> = graph
            .nodes()
            .filter(|node| node.step_number.is_none())
            .map(|node| node.id)
            .collect();
        unreachable.sort();
        issues.extend(
            unreachable
                .into_iter()
                .map(|node_id| ValidationIssue::UnreachableNode { node_id }),
        );
    }

    ValidationReport { issues }
}

fn check_node(
    node: &WorkflowNode,
    catalog: &Catalog,
    dominators: &HashMap<NodeId, HashSet<NodeId>>,
    issues: &mut Vec<ValidationIssue>,
) {
    if !node.is_configured {
        issues.push(ValidationIssue::NodeNotConfigured { node_id: node.id });
    }

    let definition = catalog.get(&node.definition_id);
    let upstream = dominators.get(&node.id);

    for (field, parsed) in node.parsed_fields() {
        for template in parsed.templates() {
            for (placeholder, reason) in template.malformed() {
                issues.push(ValidationIssue::MalformedPlaceholder {
                    node_id: node.id,
                    field: field.to_string(),
                    placeholder: placeholder.to_string(),
                    reason: reason.to_string(),
                });
            }
            for reference in template.references() {
                if !upstream.is_some_and(|set| set.contains(&reference.node_id)) {
                    issues.push(ValidationIssue::UnresolvableReference {
                        node_id: node.id,
                        field: field.to_string(),
                        referenced: reference.node_id,
                    });
                }
            }
        }

        if !parsed.is_literal() {
            continue;
        }
        let declared = definition.and_then(|definition| definition.field(field));
        let raw = node.config.get(field);
        if let (Some(declared), Some(raw)) = (declared, raw) {
            if let Err(reason) = declared.check_literal(raw) {
                issues.push(ValidationIssue::InvalidFieldValue {
                    node_id: node.id,
                    field: field.to_string(),
                    reason,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Branch;
    use crate::node::Position;
    use crate::testing::{self, IF, NOTIFY, SCORE, SEND_EMAIL, TRIGGER, placeholder};
    use serde_json::json;

    struct Fixture {
        catalog: Catalog,
        graph: WorkflowGraph,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                catalog: testing::catalog(),
                graph: WorkflowGraph::new(),
            }
        }

        fn add(&mut self, definition_id: &str) -> NodeId {
            self.graph
                .add_node(&self.catalog, definition_id, Position::default())
                .expect("add node")
                .id
        }

        fn set(&mut self, node_id: NodeId, field: &str, value: serde_json::Value) {
            self.graph
                .update_config(&self.catalog, node_id, field, value)
                .expect("update config");
        }

        fn validate(&self) -> ValidationReport {
            validate(&self.graph, &self.catalog)
        }
    }

    #[test]
    fn empty_workflow_is_missing_trigger() {
        let fixture = Fixture::new();
        let report = fixture.validate();
        assert_eq!(report.issues, vec![ValidationIssue::MissingTrigger]);
        assert_eq!(report.preflight(), Err(ExecutionError::MissingTrigger));
    }

    #[test]
    fn unreachable_nodes_are_warnings() {
        let mut fixture = Fixture::new();
        fixture.add(TRIGGER);
        let island = fixture.add(NOTIFY);

        let report = fixture.validate();
        assert_eq!(
            report.issues,
            vec![ValidationIssue::UnreachableNode { node_id: island }]
        );
        assert!(report.is_runnable());
    }

    #[test]
    fn unconfigured_reachable_node_blocks() {
        let mut fixture = Fixture::new();
        let t = fixture.add(TRIGGER);
        let mail = fixture.add(SEND_EMAIL);
        fixture.graph.connect(t, mail, Branch::Default).expect("connect");

        let report = fixture.validate();
        assert_eq!(
            report.preflight(),
            Err(ExecutionError::NodeNotConfigured { node_id: mail })
        );
    }

    #[test]
    fn reference_to_upstream_step_is_valid() {
        let mut fixture = Fixture::new();
        let t = fixture.add(TRIGGER);
        let mail = fixture.add(SEND_EMAIL);
        fixture.graph.connect(t, mail, Branch::Default).expect("connect");
        fixture.set(mail, "to", json!(placeholder(t, "email")));

        let report = fixture.validate();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
    }

    #[test]
    fn reference_across_branches_is_unresolvable() {
        let mut fixture = Fixture::new();
        let t = fixture.add(TRIGGER);
        let c = fixture.add(IF);
        let a = fixture.add(NOTIFY);
        let b = fixture.add(SEND_EMAIL);
        fixture.graph.connect(t, c, Branch::Default).expect("t -> c");
        fixture.graph.connect(c, a, Branch::True).expect("c -> a");
        fixture.graph.connect(c, b, Branch::False).expect("c -> b");
        fixture.set(c, "left", json!(placeholder(t, "score")));
        fixture.set(c, "operator", json!("greater_than"));
        fixture.set(c, "right", json!("50"));

        fixture.set(b, "to", json!(placeholder(a, "id")));
        let report = fixture.validate();
        assert_eq!(
            report.issues,
            vec![ValidationIssue::UnresolvableReference {
                node_id: b,
                field: "to".to_string(),
                referenced: a,
            }]
        );

        fixture.set(b, "to", json!(placeholder(c, "result")));
        assert!(fixture.validate().is_runnable());
    }

    #[test]
    fn self_and_unknown_references_are_unresolvable() {
        let mut fixture = Fixture::new();
        let t = fixture.add(TRIGGER);
        let mail = fixture.add(SEND_EMAIL);
        fixture.graph.connect(t, mail, Branch::Default).expect("connect");

        fixture.set(mail, "to", json!(placeholder(mail, "to")));
        assert_eq!(fixture.validate().errors().count(), 1);

        fixture.set(mail, "to", json!(placeholder(NodeId::new(), "to")));
        assert_eq!(fixture.validate().errors().count(), 1);
    }

    #[test]
    fn malformed_placeholder_blocks() {
        let mut fixture = Fixture::new();
        let t = fixture.add(TRIGGER);
        let mail = fixture.add(SEND_EMAIL);
        fixture.graph.connect(t, mail, Branch::Default).expect("connect");
        fixture.set(mail, "to", json!("{{ broken"));

        let report = fixture.validate();
        assert!(matches!(
            report.preflight(),
            Err(ExecutionError::MalformedPlaceholder { .. })
        ));
    }

    #[test]
    fn literal_type_mismatch_is_a_warning() {
        let mut fixture = Fixture::new();
        let t = fixture.add(TRIGGER);
        let score = fixture.add(SCORE);
        fixture.graph.connect(t, score, Branch::Default).expect("connect");
        fixture.set(score, "lead_score", json!("lots"));

        let report = fixture.validate();
        assert!(report.is_runnable());
        assert!(matches!(
            report.warnings().next(),
            Some(ValidationIssue::InvalidFieldValue { .. })
        ));

        fixture.set(score, "lead_score", json!(placeholder(t, "score")));
        assert!(fixture.validate().issues.is_empty());
    }

    #[test]
    fn issues_serialize_with_code() {
        let node_id = NodeId::new();
        let json = serde_json::to_value(ValidationIssue::UnreachableNode { node_id })
            .expect("serialize");
        assert_eq!(json["code"], "unreachable_node");
        assert_eq!(json["node_id"], node_id.to_string());
    }
}
