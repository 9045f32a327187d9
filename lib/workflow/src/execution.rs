//! Workflow run state.
//!
//! A run moves `Running -> {Completed, Failed, Cancelled}`; each node moves
//! `Pending -> Running -> {Succeeded, Failed, Skipped}` (or straight from
//! `Pending` to `Skipped`). The runner owns the record while the run is
//! live; everyone else sees snapshots.

use autoflow_core::{NodeId, WorkflowId, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// Per-run map from node id to the output that node produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    outputs: HashMap<NodeId, JsonValue>,
}

impl ExecutionContext {
    pub fn record(&mut self, node_id: NodeId, output: JsonValue) {
        self.outputs.insert(node_id, output);
    }

    #[must_use]
    pub fn output(&self, node_id: NodeId) -> Option<&JsonValue> {
        self.outputs.get(&node_id)
    }
}

/// The overall state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The execution state of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Branch not taken, unreachable, or abandoned after a failure.
    Skipped,
}

impl NodeExecutionState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Execution record for a single node within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub state: NodeExecutionState,
    /// Attempts made so far.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
}

impl NodeExecution {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: NodeExecutionState::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.state = NodeExecutionState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self, output: JsonValue) {
        self.state = NodeExecutionState::Succeeded;
        self.finished_at = Some(Utc::now());
        self.output = Some(output);
    }

    pub fn fail(&mut self, error: String) {
        self.state = NodeExecutionState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn skip(&mut self) {
        self.state = NodeExecutionState::Skipped;
        self.finished_at = Some(Utc::now());
    }
}

impl Default for NodeExecution {
    fn default() -> Self {
        Self::new()
    }
}

/// A record of a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub state: ExecutionState,
    /// Payload handed to the trigger.
    pub input: JsonValue,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub nodes: BTreeMap<NodeId, NodeExecution>,
    /// Error message if the run failed or was cancelled.
    pub error: Option<String>,
}

impl WorkflowRun {
    /// Creates a running record with every node pending.
    #[must_use]
    pub fn new(
        id: WorkflowRunId,
        workflow_id: WorkflowId,
        input: JsonValue,
        nodes: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        Self {
            id,
            workflow_id,
            state: ExecutionState::Running,
            input,
            started_at: Utc::now(),
            finished_at: None,
            nodes: nodes
                .into_iter()
                .map(|node_id| (node_id, NodeExecution::new()))
                .collect(),
            error: None,
        }
    }

    /// Mutable record of one node, created on first use.
    pub fn node_mut(&mut self, node_id: NodeId) -> &mut NodeExecution {
        self.nodes.entry(node_id).or_default()
    }

    #[must_use]
    pub fn node_state(&self, node_id: NodeId) -> Option<NodeExecutionState> {
        self.nodes.get(&node_id).map(|node| node.state)
    }

    /// Marks every node that never started as skipped.
    pub fn skip_pending(&mut self) {
        for node in self.nodes.values_mut() {
            if node.state == NodeExecutionState::Pending {
                node.skip();
            }
        }
    }

    pub fn complete(&mut self) {
        self.skip_pending();
        self.state = ExecutionState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.skip_pending();
        self.state = ExecutionState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn cancel(&mut self) {
        self.skip_pending();
        self.state = ExecutionState::Cancelled;
        self.finished_at = Some(Utc::now());
        self.error = Some("cancelled".to_string());
    }

    #[must_use]
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot::from(self)
    }
}

/// Point-in-time view of a run, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionState,
    pub node_status: BTreeMap<NodeId, NodeExecutionState>,
    /// Outputs of the nodes that succeeded.
    pub node_output: BTreeMap<NodeId, JsonValue>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&WorkflowRun> for RunSnapshot {
    fn from(run: &WorkflowRun) -> Self {
        Self {
            run_id: run.id,
            workflow_id: run.workflow_id,
            status: run.state,
            node_status: run
                .nodes
                .iter()
                .map(|(node_id, node)| (*node_id, node.state))
                .collect(),
            node_output: run
                .nodes
                .iter()
                .filter_map(|(node_id, node)| Some((*node_id, node.output.clone()?)))
                .collect(),
            error: run.error.clone(),
            started_at: run.started_at,
            finished_at: run.finished_at,
        }
    }
}
