//! Workflow definition types.
//!
//! A workflow is a named automation that consists of:
//! - Metadata (name, description, enabled flag, tags, timestamps)
//! - A directed graph of nodes
//!
//! The persisted form lists nodes and edges explicitly. Restoring replays it
//! through the same mutation checks a builder goes through, so a stored
//! document can never produce a graph the builder could not.

use crate::edge::WorkflowEdge;
use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::node::WorkflowNode;
use crate::validation::{self, ValidationReport};
use autoflow_catalog::Catalog;
use autoflow_core::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow.
    pub name: String,
    pub description: Option<String>,
    /// Whether this workflow is enabled.
    pub enabled: bool,
    /// Tags for organization/filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    /// Creates new metadata with default values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// A complete workflow: identity, metadata and the graph it owns.
#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub metadata: WorkflowMetadata,
    pub graph: WorkflowGraph,
}

impl Workflow {
    /// Creates an empty workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_metadata(WorkflowMetadata::new(name))
    }

    #[must_use]
    pub fn with_metadata(metadata: WorkflowMetadata) -> Self {
        Self {
            id: WorkflowId::new(),
            metadata,
            graph: WorkflowGraph::new(),
        }
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.metadata.enabled
    }

    pub fn enable(&mut self) {
        self.metadata.enabled = true;
        self.touch();
    }

    pub fn disable(&mut self) {
        self.metadata.enabled = false;
        self.touch();
    }

    /// Checks the graph for execution readiness.
    #[must_use]
    pub fn validate(&self, catalog: &Catalog) -> ValidationReport {
        validation::validate(&self.graph, catalog)
    }

    /// Marks the workflow as updated (bumps updated_at timestamp).
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }

    /// The persisted form of this workflow.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedWorkflow {
        let mut nodes: Vec<WorkflowNode> = self.graph.nodes().cloned().collect();
        nodes.sort_by_key(|node| (node.step_number.is_none(), node.step_number, node.id));
        let mut edges: Vec<WorkflowEdge> = self.graph.edges().cloned().collect();
        edges.sort_by_key(|edge| edge.sequence);

        PersistedWorkflow {
            id: self.id,
            metadata: self.metadata.clone(),
            nodes,
            edges,
        }
    }

    /// Rebuilds a workflow from its persisted form.
    ///
    /// Nodes are placed first, then configured, then connected in their
    /// original connection order. Stored step numbers are ignored and
    /// recomputed; since numbering is deterministic they come out the same.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] raised while replaying.
    pub fn restore(persisted: PersistedWorkflow, catalog: &Catalog) -> Result<Self, GraphError> {
        let mut graph = WorkflowGraph::new();

        for node in &persisted.nodes {
            graph.insert_node(catalog, node.id, &node.definition_id, node.position)?;
            for (field, value) in &node.config {
                graph.update_config(catalog, node.id, field, value.clone())?;
            }
            graph.set_policy(node.id, node.policy)?;
        }

        let mut edges = persisted.edges;
        edges.sort_by_key(|edge| edge.sequence);
        for edge in edges {
            graph.insert_edge(edge)?;
        }

        Ok(Self {
            id: persisted.id,
            metadata: persisted.metadata,
            graph,
        })
    }
}

/// Serialized form of a workflow, stored inside an [`Envelope`](crate::envelope::Envelope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedWorkflow {
    pub id: WorkflowId,
    pub metadata: WorkflowMetadata,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub tags: Vec<String>,
    /// Number of nodes in the graph.
    pub node_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.metadata.name.clone(),
            description: workflow.metadata.description.clone(),
            enabled: workflow.metadata.enabled,
            tags: workflow.metadata.tags.clone(),
            node_count: workflow.graph.node_count(),
            updated_at: workflow.metadata.updated_at,
        }
    }
}
