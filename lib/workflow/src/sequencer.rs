//! Step numbering.
//!
//! The trigger is step 1. Every other node reachable from it is numbered in
//! topological order (Kahn's algorithm); when several nodes are ready at
//! once, the one whose incoming edge was connected first goes next. Nodes
//! not reachable from the trigger are left unnumbered.

use crate::edge::WorkflowEdge;
use crate::node::WorkflowNode;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{Bfs, EdgeRef};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Computes step numbers for every node reachable from `trigger`.
///
/// Pure and deterministic: the same graph always yields the same numbering.
#[must_use]
pub fn number_steps(
    graph: &StableDiGraph<WorkflowNode, WorkflowEdge>,
    trigger: NodeIndex,
) -> HashMap<NodeIndex, u32> {
    let mut reachable = HashSet::new();
    let mut bfs = Bfs::new(graph, trigger);
    while let Some(index) = bfs.next(graph) {
        reachable.insert(index);
    }

    let mut in_degree: HashMap<NodeIndex, usize> = reachable
        .iter()
        .map(|&index| {
            let degree = graph
                .edges_directed(index, Direction::Incoming)
                .filter(|edge| reachable.contains(&edge.source()))
                .count();
            (index, degree)
        })
        .collect();

    let mut numbers = HashMap::with_capacity(reachable.len());
    let mut ready = BinaryHeap::new();
    ready.push(Reverse((0u64, trigger)));

    while let Some(Reverse((_, index))) = ready.pop() {
        let step = u32::try_from(numbers.len() + 1).unwrap_or(u32::MAX);
        numbers.insert(index, step);

        for edge in graph.edges_directed(index, Direction::Outgoing) {
            let target = edge.target();
            let Some(degree) = in_degree.get_mut(&target) else {
                continue;
            };
            *degree = degree.saturating_sub(1);
            if *degree == 0 {
                ready.push(Reverse((edge.weight().sequence, target)));
            }
        }
    }

    numbers
}

/// Writes step numbers onto the nodes, clearing them on unreachable ones.
pub fn apply_numbering(
    graph: &mut StableDiGraph<WorkflowNode, WorkflowEdge>,
    trigger: Option<NodeIndex>,
) {
    let numbers = trigger
        .map(|trigger| number_steps(graph, trigger))
        .unwrap_or_default();

    let indices: Vec<NodeIndex> = graph.node_indices().collect();
    for index in indices {
        if let Some(node) = graph.node_weight_mut(index) {
            node.step_number = numbers.get(&index).copied();
        }
    }
}
