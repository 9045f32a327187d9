//! Workflow graph implementation using petgraph.
//!
//! The graph owns a workflow's nodes and edges and is the only place they
//! are mutated. Every mutation checks its preconditions before touching the
//! graph, so a rejected call leaves it exactly as it was, and every
//! successful structural change renumbers the steps.
//!
//! A `StableDiGraph` keeps node and edge indices valid across removals,
//! which lets the id-to-index maps survive `remove_node`.

use crate::edge::{Branch, WorkflowEdge};
use crate::error::GraphError;
use crate::node::{ExecutionPolicy, Position, WorkflowNode};
use crate::sequencer;
use autoflow_catalog::{Catalog, IntegrationDefinition, NodeKind};
use autoflow_core::{EdgeId, NodeId};
use petgraph::Direction;
use petgraph::algo::dominators;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{Dfs, EdgeRef};
use serde::Serialize;
use serde::ser::SerializeStruct;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

/// A workflow graph: at most one trigger, acyclic, no merge points.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    graph: StableDiGraph<WorkflowNode, WorkflowEdge>,
    node_index_map: HashMap<NodeId, NodeIndex>,
    edge_index_map: HashMap<EdgeId, EdgeIndex>,
    trigger: Option<NodeId>,
    next_sequence: u64,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a new node created from a catalog definition.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownDefinition`] if the catalog has no such entry,
    /// [`GraphError::DuplicateTrigger`] for a second trigger.
    pub fn add_node(
        &mut self,
        catalog: &Catalog,
        definition_id: &str,
        position: Position,
    ) -> Result<WorkflowNode, GraphError> {
        self.insert_node(catalog, NodeId::new(), definition_id, position)
    }

    /// Places a node under a caller-chosen id. Used when replaying a
    /// persisted workflow.
    pub(crate) fn insert_node(
        &mut self,
        catalog: &Catalog,
        node_id: NodeId,
        definition_id: &str,
        position: Position,
    ) -> Result<WorkflowNode, GraphError> {
        if self.node_index_map.contains_key(&node_id) {
            return Err(GraphError::DuplicateId {
                id: node_id.to_string(),
            });
        }
        let definition = lookup_definition(catalog, definition_id)?;
        if definition.kind == NodeKind::Trigger {
            if let Some(existing) = self.trigger {
                return Err(GraphError::DuplicateTrigger { existing });
            }
        }

        let node = WorkflowNode::with_id(node_id, definition, position);
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        if definition.kind == NodeKind::Trigger {
            self.trigger = Some(node_id);
        }

        self.renumber();
        Ok(self.graph[index].clone())
    }

    /// Removes a node together with every edge touching it.
    ///
    /// Neighbours are not re-linked; whatever followed the node becomes
    /// unreachable until it is connected again.
    ///
    /// # Errors
    ///
    /// [`GraphError::NodeNotFound`] if the node does not exist.
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<WorkflowNode, GraphError> {
        let index = self.index_of(node_id)?;

        let incident: Vec<EdgeId> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .chain(self.graph.edges_directed(index, Direction::Incoming))
            .map(|edge| edge.weight().id)
            .collect();
        for edge_id in incident {
            self.edge_index_map.remove(&edge_id);
        }

        self.node_index_map.remove(&node_id);
        let removed = self
            .graph
            .remove_node(index)
            .ok_or(GraphError::NodeNotFound { node_id })?;
        if self.trigger == Some(node_id) {
            self.trigger = None;
        }

        self.renumber();
        Ok(removed)
    }

    /// Connects `source` to `target` under `branch`.
    ///
    /// Checks run in a fixed order and the first failure is reported: both
    /// nodes exist, the branch fits the source kind, the branch is free, no
    /// cycle results, the target is not the trigger, and the target has no
    /// incoming edge yet.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] from the checks above.
    pub fn connect(
        &mut self,
        source: NodeId,
        target: NodeId,
        branch: Branch,
    ) -> Result<WorkflowEdge, GraphError> {
        let sequence = self.next_sequence.max(1);
        let edge = WorkflowEdge::new(source, target, branch, sequence);
        self.insert_edge(edge)
    }

    /// Adds a fully formed edge, keeping its id and sequence. Used when
    /// replaying a persisted workflow.
    pub(crate) fn insert_edge(&mut self, edge: WorkflowEdge) -> Result<WorkflowEdge, GraphError> {
        if self.edge_index_map.contains_key(&edge.id) {
            return Err(GraphError::DuplicateId {
                id: edge.id.to_string(),
            });
        }
        let source_index = self.index_of(edge.source)?;
        let target_index = self.index_of(edge.target)?;
        self.check_connect(source_index, target_index, edge.branch)?;

        self.next_sequence = self.next_sequence.max(edge.sequence.saturating_add(1));
        let edge_id = edge.id;
        let index = self.graph.add_edge(source_index, target_index, edge);
        self.edge_index_map.insert(edge_id, index);

        self.renumber();
        Ok(self.graph[index].clone())
    }

    fn check_connect(
        &self,
        source_index: NodeIndex,
        target_index: NodeIndex,
        branch: Branch,
    ) -> Result<(), GraphError> {
        let source = &self.graph[source_index];
        let target = &self.graph[target_index];

        let branch_fits = match source.kind {
            NodeKind::Condition => matches!(branch, Branch::True | Branch::False),
            NodeKind::Trigger | NodeKind::Action => branch == Branch::Default,
        };
        if !branch_fits {
            return Err(GraphError::InvalidBranch {
                node_id: source.id,
                kind: source.kind,
                branch,
            });
        }

        if self
            .graph
            .edges_directed(source_index, Direction::Outgoing)
            .any(|edge| edge.weight().branch == branch)
        {
            return Err(GraphError::BranchAlreadyTaken {
                node_id: source.id,
                branch,
            });
        }

        if source_index == target_index
            || has_path_connecting(&self.graph, target_index, source_index, None)
        {
            return Err(GraphError::CycleDetected {
                source: source.id,
                target: target.id,
            });
        }

        if target.is_trigger() {
            return Err(GraphError::TriggerAsTarget { node_id: target.id });
        }

        if self
            .graph
            .edges_directed(target_index, Direction::Incoming)
            .next()
            .is_some()
        {
            return Err(GraphError::TargetAlreadyConnected { node_id: target.id });
        }

        Ok(())
    }

    /// Removes one edge.
    ///
    /// # Errors
    ///
    /// [`GraphError::EdgeNotFound`] if the edge does not exist.
    pub fn disconnect(&mut self, edge_id: EdgeId) -> Result<WorkflowEdge, GraphError> {
        let index = self
            .edge_index_map
            .remove(&edge_id)
            .ok_or(GraphError::EdgeNotFound { edge_id })?;
        let removed = self
            .graph
            .remove_edge(index)
            .ok_or(GraphError::EdgeNotFound { edge_id })?;
        self.renumber();
        Ok(removed)
    }

    /// Writes one config field on a node. `null` clears the field.
    ///
    /// The raw value is stored as given; its template form is parsed and
    /// cached, and the configured flag is recomputed.
    ///
    /// # Errors
    ///
    /// [`GraphError::NodeNotFound`], or [`GraphError::UnknownField`] when
    /// the node's definition does not declare `field`.
    pub fn update_config(
        &mut self,
        catalog: &Catalog,
        node_id: NodeId,
        field: &str,
        value: JsonValue,
    ) -> Result<WorkflowNode, GraphError> {
        let index = self.index_of(node_id)?;
        let node = &mut self.graph[index];
        let definition = lookup_definition(catalog, &node.definition_id)?;
        if definition.field(field).is_none() {
            return Err(GraphError::UnknownField {
                node_id,
                definition_id: definition.id.clone(),
                field: field.to_string(),
            });
        }

        node.set_field(definition, field, value);
        Ok(node.clone())
    }

    /// Replaces a node's execution policy.
    ///
    /// # Errors
    ///
    /// [`GraphError::NodeNotFound`], or [`GraphError::InvalidPolicy`] when
    /// `max_attempts` is zero.
    pub fn set_policy(
        &mut self,
        node_id: NodeId,
        policy: ExecutionPolicy,
    ) -> Result<WorkflowNode, GraphError> {
        let index = self.index_of(node_id)?;
        if policy.max_attempts == 0 {
            return Err(GraphError::InvalidPolicy {
                node_id,
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if policy.timeout_ms == Some(0) {
            return Err(GraphError::InvalidPolicy {
                node_id,
                reason: "timeout_ms must be positive".to_string(),
            });
        }

        let node = &mut self.graph[index];
        node.policy = policy;
        Ok(node.clone())
    }

    /// Moves a node on the canvas.
    ///
    /// # Errors
    ///
    /// [`GraphError::NodeNotFound`] if the node does not exist.
    pub fn move_node(
        &mut self,
        node_id: NodeId,
        position: Position,
    ) -> Result<WorkflowNode, GraphError> {
        let index = self.index_of(node_id)?;
        let node = &mut self.graph[index];
        node.position = position;
        Ok(node.clone())
    }

    #[must_use]
    pub fn get_node(&self, node_id: NodeId) -> Option<&WorkflowNode> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight(*index)
    }

    #[must_use]
    pub fn get_edge(&self, edge_id: EdgeId) -> Option<&WorkflowEdge> {
        let index = self.edge_index_map.get(&edge_id)?;
        self.graph.edge_weight(*index)
    }

    /// The trigger node, if one has been placed.
    #[must_use]
    pub fn trigger(&self) -> Option<&WorkflowNode> {
        self.trigger.and_then(|id| self.get_node(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &WorkflowEdge> {
        self.graph.edge_weights()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Numbered nodes in step order.
    #[must_use]
    pub fn steps(&self) -> Vec<&WorkflowNode> {
        let mut steps: Vec<_> = self
            .nodes()
            .filter(|node| node.step_number.is_some())
            .collect();
        steps.sort_by_key(|node| node.step_number);
        steps
    }

    /// The node's outgoing edge for `branch`, if connected.
    #[must_use]
    pub fn edge_for_branch(&self, node_id: NodeId, branch: Branch) -> Option<&WorkflowEdge> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph
            .edges_directed(*index, Direction::Outgoing)
            .map(|edge| edge.weight())
            .find(|edge| edge.branch == branch)
    }

    /// The node and everything downstream of it.
    #[must_use]
    pub fn subtree(&self, node_id: NodeId) -> Vec<NodeId> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, index);
        let mut found = Vec::new();
        while let Some(next) = dfs.next(&self.graph) {
            found.push(self.graph[next].id);
        }
        found
    }

    /// Strict dominators of every node reachable from the trigger.
    ///
    /// A node missing from the map is unreachable. The trigger maps to an
    /// empty set.
    #[must_use]
    pub fn strict_dominators(&self) -> HashMap<NodeId, HashSet<NodeId>> {
        let Some(root) = self.trigger.and_then(|id| self.node_index_map.get(&id).copied())
        else {
            return HashMap::new();
        };

        let dominance = dominators::simple_fast(&self.graph, root);
        self.graph
            .node_indices()
            .filter_map(|index| {
                let strict: HashSet<NodeId> = dominance
                    .strict_dominators(index)?
                    .map(|dominator| self.graph[dominator].id)
                    .collect();
                Some((self.graph[index].id, strict))
            })
            .collect()
    }

    fn index_of(&self, node_id: NodeId) -> Result<NodeIndex, GraphError> {
        self.node_index_map
            .get(&node_id)
            .copied()
            .ok_or(GraphError::NodeNotFound { node_id })
    }

    fn renumber(&mut self) {
        let trigger = self
            .trigger
            .and_then(|id| self.node_index_map.get(&id).copied());
        sequencer::apply_numbering(&mut self.graph, trigger);
    }
}

fn lookup_definition<'a>(
    catalog: &'a Catalog,
    definition_id: &str,
) -> Result<&'a IntegrationDefinition, GraphError> {
    catalog
        .get(definition_id)
        .ok_or_else(|| GraphError::UnknownDefinition {
            definition_id: definition_id.to_string(),
        })
}

/// Serializes as `{nodes, edges}`: nodes in step order (unnumbered last, by
/// id), edges in connection order.
impl Serialize for WorkflowGraph {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut nodes: Vec<&WorkflowNode> = self.nodes().collect();
        nodes.sort_by_key(|node| (node.step_number.is_none(), node.step_number, node.id));
        let mut edges: Vec<&WorkflowEdge> = self.edges().collect();
        edges.sort_by_key(|edge| edge.sequence);

        let mut state = serializer.serialize_struct("WorkflowGraph", 2)?;
        state.serialize_field("nodes", &nodes)?;
        state.serialize_field("edges", &edges)?;
        state.end()
    }
}
