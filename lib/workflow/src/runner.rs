//! Workflow run traversal.
//!
//! The runner walks a snapshot of a workflow from its trigger, one step at a
//! time. It decides what to call, in what order and with which resolved
//! arguments; the external call itself goes through [`ActionExecutor`].
//!
//! Run state is published through a `tokio::sync::watch` channel so callers
//! can poll or await it without sharing the runner's internals.

use crate::condition;
use crate::definition::Workflow;
use crate::edge::Branch;
use crate::error::ExecutionError;
use crate::execution::{ExecutionContext, ExecutionState, NodeExecutionState, WorkflowRun};
use crate::node::WorkflowNode;
use async_trait::async_trait;
use autoflow_catalog::{Catalog, NodeKind};
use autoflow_core::{NodeId, WorkflowId, WorkflowRunId};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default per-attempt timeout when neither the node nor the caller sets one.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// One call to an integration, with placeholders already resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRequest {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub definition_id: String,
    pub config: Map<String, JsonValue>,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Failure reported by an [`ActionExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ActionError {}

/// Performs the side effect behind an action node.
///
/// The returned JSON becomes the step's output and is what later
/// placeholders resolve against.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: ActionRequest) -> Result<JsonValue, ActionError>;
}

/// Drives runs of workflow snapshots.
#[derive(Clone)]
pub struct Runner {
    executor: Arc<dyn ActionExecutor>,
    default_timeout: Duration,
}

impl Runner {
    pub fn new(executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            executor,
            default_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Sets the timeout used for nodes whose policy does not set one.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Checks that a workflow may start.
    ///
    /// # Errors
    ///
    /// Returns the first blocking issue: no trigger, an unconfigured
    /// reachable node, a placeholder naming a step that may not have run,
    /// or a malformed placeholder.
    pub fn preflight(workflow: &Workflow, catalog: &Catalog) -> Result<(), ExecutionError> {
        workflow.validate(catalog).preflight()
    }

    /// Runs `workflow` to completion, publishing progress on `state`.
    ///
    /// The trigger succeeds with `payload` as its output. After each step a
    /// condition follows only the branch matching its outcome and skips the
    /// subtree behind the other; any other node follows its default edge.
    /// The run completes when there is no edge left to follow.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, run_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        workflow: Workflow,
        payload: JsonValue,
        state: watch::Sender<WorkflowRun>,
        cancel: CancellationToken,
    ) -> ExecutionState {
        let run_id = state.borrow().id;
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let graph = &workflow.graph;

        let Some(trigger) = graph.trigger() else {
            state.send_modify(|run| run.fail(ExecutionError::MissingTrigger.to_string()));
            return ExecutionState::Failed;
        };

        let mut context = ExecutionContext::default();
        state.send_modify(|run| {
            let node = run.node_mut(trigger.id);
            node.start();
            node.attempts = 1;
            node.succeed(payload.clone());
        });
        context.record(trigger.id, payload);
        info!(node_id = %trigger.id, "trigger fired");

        let mut current = graph
            .edge_for_branch(trigger.id, Branch::Default)
            .map(|edge| edge.target);

        while let Some(node_id) = current {
            let Some(node) = graph.get_node(node_id) else {
                break;
            };
            if cancel.is_cancelled() {
                info!("run cancelled between steps");
                state.send_modify(WorkflowRun::cancel);
                return ExecutionState::Cancelled;
            }

            state.send_modify(|run| run.node_mut(node_id).start());
            debug!(node_id = %node_id, step = ?node.step_number, kind = %node.kind, "step started");

            match self.execute_node(&workflow, node, &context, run_id, &state, &cancel).await {
                Ok(output) => {
                    context.record(node_id, output.clone());
                    current = self.next_step(&workflow, node, &output, &state);
                    state.send_modify(|run| run.node_mut(node_id).succeed(output));
                    info!(node_id = %node_id, step = ?node.step_number, "step succeeded");
                }
                Err(ExecutionError::Cancelled) => {
                    state.send_modify(|run| {
                        run.node_mut(node_id).fail("cancelled".to_string());
                        run.cancel();
                    });
                    info!(node_id = %node_id, "run cancelled during step");
                    return ExecutionState::Cancelled;
                }
                Err(error) => {
                    let message = error.to_string();
                    warn!(node_id = %node_id, error = %message, "step failed");
                    state.send_modify(|run| {
                        run.node_mut(node_id).fail(message.clone());
                        run.fail(message);
                    });
                    return ExecutionState::Failed;
                }
            }
        }

        state.send_modify(WorkflowRun::complete);
        info!("run completed");
        ExecutionState::Completed
    }

    /// Picks the edge to follow after `node` succeeded with `output`,
    /// skipping the subtree behind an untaken condition branch.
    fn next_step(
        &self,
        workflow: &Workflow,
        node: &WorkflowNode,
        output: &JsonValue,
        state: &watch::Sender<WorkflowRun>,
    ) -> Option<NodeId> {
        let graph = &workflow.graph;
        if !node.is_condition() {
            return graph
                .edge_for_branch(node.id, Branch::Default)
                .map(|edge| edge.target);
        }

        let outcome = output
            .get("result")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let untaken = Branch::for_outcome(!outcome);
        if let Some(edge) = graph.edge_for_branch(node.id, untaken) {
            let skipped = graph.subtree(edge.target);
            debug!(node_id = %node.id, branch = %untaken, skipped = skipped.len(), "branch not taken");
            state.send_modify(|run| {
                for node_id in skipped {
                    let node = run.node_mut(node_id);
                    if node.state == NodeExecutionState::Pending {
                        node.skip();
                    }
                }
            });
        }

        graph
            .edge_for_branch(node.id, Branch::for_outcome(outcome))
            .map(|edge| edge.target)
    }

    async fn execute_node(
        &self,
        workflow: &Workflow,
        node: &WorkflowNode,
        context: &ExecutionContext,
        run_id: WorkflowRunId,
        state: &watch::Sender<WorkflowRun>,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, ExecutionError> {
        let config = node
            .resolve_config(context)
            .map_err(|error| ExecutionError::Template {
                node_id: node.id,
                error,
            })?;

        match node.kind {
            NodeKind::Condition => {
                state.send_modify(|run| run.node_mut(node.id).attempts = 1);
                let outcome =
                    condition::evaluate(&config).map_err(|e| ExecutionError::Condition {
                        node_id: node.id,
                        reason: e.to_string(),
                    })?;
                Ok(json!({ "result": outcome }))
            }
            NodeKind::Action | NodeKind::Trigger => {
                let request = ActionRequest {
                    run_id,
                    workflow_id: workflow.id,
                    node_id: node.id,
                    definition_id: node.definition_id.clone(),
                    config,
                    attempt: 1,
                };
                self.call_with_retries(node, request, state, cancel).await
            }
        }
    }

    async fn call_with_retries(
        &self,
        node: &WorkflowNode,
        request: ActionRequest,
        state: &watch::Sender<WorkflowRun>,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, ExecutionError> {
        let policy = node.policy;
        let timeout = policy
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis);
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = ExecutionError::NodeFailed {
            node_id: node.id,
            reason: "no attempt was made".to_string(),
        };

        for attempt in 1..=max_attempts {
            state.send_modify(|run| run.node_mut(node.id).attempts = attempt);
            let request = ActionRequest {
                attempt,
                ..request.clone()
            };

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                result = tokio::time::timeout(timeout, self.executor.execute(request)) => result,
            };

            last_error = match result {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e)) => ExecutionError::NodeFailed {
                    node_id: node.id,
                    reason: e.to_string(),
                },
                Err(_) => ExecutionError::NodeTimeout {
                    node_id: node.id,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
            };

            if attempt < max_attempts {
                let delay = policy.retry_delay(attempt);
                warn!(
                    node_id = %node.id,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %last_error,
                    "attempt failed, retrying"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ExecutionPolicy, Position, RetryBackoff};
    use crate::testing::{self, IF, NOTIFY, SEND_EMAIL, TRIGGER, placeholder};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records every request and echoes its config back.
    #[derive(Default)]
    struct RecordingExecutor {
        requests: Mutex<Vec<ActionRequest>>,
    }

    impl RecordingExecutor {
        fn requests(&self) -> Vec<ActionRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn execute(&self, request: ActionRequest) -> Result<JsonValue, ActionError> {
            let output = json!({ "echo": request.config.clone(), "id": 42 });
            self.requests.lock().expect("lock").push(request);
            Ok(output)
        }
    }

    /// Fails a fixed number of times before succeeding.
    struct FlakyExecutor {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ActionExecutor for FlakyExecutor {
        async fn execute(&self, _request: ActionRequest) -> Result<JsonValue, ActionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(ActionError::new(format!("transient failure {call}")))
            } else {
                Ok(json!({ "ok": true }))
            }
        }
    }

    /// Never finishes on its own.
    struct StuckExecutor;

    #[async_trait]
    impl ActionExecutor for StuckExecutor {
        async fn execute(&self, _request: ActionRequest) -> Result<JsonValue, ActionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(JsonValue::Null)
        }
    }

    struct Built {
        workflow: Workflow,
        trigger: NodeId,
        condition: NodeId,
        yes: NodeId,
        no: NodeId,
    }

    /// Trigger -> condition (`score > 50`) -> true: send email, false: notify.
    fn branching(catalog: &Catalog) -> Built {
        let mut workflow = Workflow::new("Lead routing");
        let graph = &mut workflow.graph;
        let add = |graph: &mut crate::graph::WorkflowGraph, definition: &str| {
            graph
                .add_node(catalog, definition, Position::default())
                .expect("add node")
                .id
        };
        let trigger = add(graph, TRIGGER);
        let condition = add(graph, IF);
        let yes = add(graph, SEND_EMAIL);
        let no = add(graph, NOTIFY);

        graph.connect(trigger, condition, Branch::Default).expect("t -> c");
        graph.connect(condition, yes, Branch::True).expect("c -> yes");
        graph.connect(condition, no, Branch::False).expect("c -> no");
        graph
            .update_config(catalog, condition, "left", json!(placeholder(trigger, "score")))
            .expect("left");
        graph
            .update_config(catalog, condition, "operator", json!("greater_than"))
            .expect("operator");
        graph
            .update_config(catalog, condition, "right", json!("50"))
            .expect("right");
        graph
            .update_config(catalog, yes, "to", json!(placeholder(trigger, "email")))
            .expect("to");
        graph
            .update_config(
                catalog,
                yes,
                "subject",
                json!(format!("Welcome, {}", placeholder(trigger, "name"))),
            )
            .expect("subject");

        Built {
            workflow,
            trigger,
            condition,
            yes,
            no,
        }
    }

    fn channel(
        workflow: &Workflow,
        payload: &JsonValue,
    ) -> (watch::Sender<WorkflowRun>, watch::Receiver<WorkflowRun>) {
        let record = WorkflowRun::new(
            WorkflowRunId::new(),
            workflow.id,
            payload.clone(),
            workflow.graph.nodes().map(|node| node.id),
        );
        watch::channel(record)
    }

    async fn run_to_end(runner: &Runner, workflow: Workflow, payload: JsonValue) -> WorkflowRun {
        let (tx, rx) = channel(&workflow, &payload);
        runner
            .run(workflow, payload, tx, CancellationToken::new())
            .await;
        let run = rx.borrow().clone();
        run
    }

    #[tokio::test]
    async fn true_branch_runs_and_false_branch_is_skipped() {
        let catalog = testing::catalog();
        let built = branching(&catalog);
        let executor = Arc::new(RecordingExecutor::default());
        let runner = Runner::new(executor.clone());

        let payload = json!({"score": 80, "email": "ada@example.com", "name": "Ada"});
        let run = run_to_end(&runner, built.workflow, payload).await;

        assert_eq!(run.state, ExecutionState::Completed);
        assert_eq!(run.node_state(built.trigger), Some(NodeExecutionState::Succeeded));
        assert_eq!(run.node_state(built.condition), Some(NodeExecutionState::Succeeded));
        assert_eq!(run.node_state(built.yes), Some(NodeExecutionState::Succeeded));
        assert_eq!(run.node_state(built.no), Some(NodeExecutionState::Skipped));
        assert_eq!(
            run.nodes[&built.condition].output,
            Some(json!({"result": true}))
        );

        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].node_id, built.yes);
        assert_eq!(requests[0].config["to"], json!("ada@example.com"));
        assert_eq!(requests[0].config["subject"], json!("Welcome, Ada"));
    }

    #[tokio::test]
    async fn false_branch_runs_when_condition_fails() {
        let catalog = testing::catalog();
        let built = branching(&catalog);
        let executor = Arc::new(RecordingExecutor::default());
        let runner = Runner::new(executor.clone());

        let run = run_to_end(&runner, built.workflow, json!({"score": 10})).await;

        assert_eq!(run.state, ExecutionState::Completed);
        assert_eq!(run.node_state(built.yes), Some(NodeExecutionState::Skipped));
        assert_eq!(run.node_state(built.no), Some(NodeExecutionState::Succeeded));
        assert_eq!(executor.requests()[0].node_id, built.no);
    }

    #[tokio::test]
    async fn missing_output_field_fails_the_step() {
        let catalog = testing::catalog();
        let built = branching(&catalog);
        let runner = Runner::new(Arc::new(RecordingExecutor::default()));

        let run = run_to_end(&runner, built.workflow, json!({"score": 99})).await;

        assert_eq!(run.state, ExecutionState::Failed);
        assert_eq!(run.node_state(built.yes), Some(NodeExecutionState::Failed));
        assert!(
            run.error
                .as_deref()
                .is_some_and(|error| error.contains("has no field"))
        );
    }

    #[tokio::test]
    async fn unreachable_nodes_end_skipped() {
        let catalog = testing::catalog();
        let mut built = branching(&catalog);
        let island = built
            .workflow
            .graph
            .add_node(&catalog, NOTIFY, Position::default())
            .expect("island")
            .id;
        let runner = Runner::new(Arc::new(RecordingExecutor::default()));

        let payload = json!({"score": 80, "email": "a@b.c", "name": "A"});
        let run = run_to_end(&runner, built.workflow, payload).await;
        assert_eq!(run.node_state(island), Some(NodeExecutionState::Skipped));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let catalog = testing::catalog();
        let mut built = branching(&catalog);
        built
            .workflow
            .graph
            .set_policy(built.no, ExecutionPolicy::with_retries(3, RetryBackoff::Constant, 0))
            .expect("policy");
        let executor = Arc::new(FlakyExecutor {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let runner = Runner::new(executor.clone());

        let run = run_to_end(&runner, built.workflow, json!({"score": 1})).await;

        assert_eq!(run.state, ExecutionState::Completed);
        assert_eq!(run.nodes[&built.no].attempts, 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let catalog = testing::catalog();
        let mut built = branching(&catalog);
        built
            .workflow
            .graph
            .set_policy(built.no, ExecutionPolicy::with_retries(2, RetryBackoff::Linear, 0))
            .expect("policy");
        let runner = Runner::new(Arc::new(FlakyExecutor {
            failures: 5,
            calls: AtomicU32::new(0),
        }));

        let run = run_to_end(&runner, built.workflow, json!({"score": 1})).await;

        assert_eq!(run.state, ExecutionState::Failed);
        assert_eq!(run.nodes[&built.no].attempts, 2);
        assert!(
            run.nodes[&built.no]
                .error
                .as_deref()
                .is_some_and(|error| error.contains("transient failure 2"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_fails_the_run() {
        let catalog = testing::catalog();
        let mut built = branching(&catalog);
        built
            .workflow
            .graph
            .set_policy(built.no, ExecutionPolicy::default().with_timeout_ms(50))
            .expect("policy");
        let runner = Runner::new(Arc::new(StuckExecutor));

        let run = run_to_end(&runner, built.workflow, json!({"score": 1})).await;

        assert_eq!(run.state, ExecutionState::Failed);
        assert_eq!(run.node_state(built.no), Some(NodeExecutionState::Failed));
        assert!(
            run.error
                .as_deref()
                .is_some_and(|error| error.contains("timed out after 50ms"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_applies_without_policy() {
        let catalog = testing::catalog();
        let built = branching(&catalog);
        let runner = Runner::new(Arc::new(StuckExecutor))
            .with_default_timeout(Duration::from_millis(10));

        let run = run_to_end(&runner, built.workflow, json!({"score": 1})).await;
        assert!(
            run.error
                .as_deref()
                .is_some_and(|error| error.contains("timed out after 10ms"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_marks_in_flight_node_failed() {
        let catalog = testing::catalog();
        let built = branching(&catalog);
        let runner = Runner::new(Arc::new(StuckExecutor));
        let payload = json!({"score": 1});
        let (tx, mut rx) = channel(&built.workflow, &payload);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let runner = runner.clone();
            let cancel = cancel.clone();
            let workflow = built.workflow.clone();
            async move { runner.run(workflow, payload, tx, cancel).await }
        });

        rx.wait_for(|run| run.node_state(built.no) == Some(NodeExecutionState::Running))
            .await
            .expect("node starts");
        cancel.cancel();

        assert_eq!(task.await.expect("join"), ExecutionState::Cancelled);
        let run = rx.borrow().clone();
        assert_eq!(run.state, ExecutionState::Cancelled);
        assert_eq!(run.node_state(built.no), Some(NodeExecutionState::Failed));
        assert_eq!(run.nodes[&built.no].error.as_deref(), Some("cancelled"));
        assert_eq!(run.node_state(built.yes), Some(NodeExecutionState::Skipped));
    }

    #[test]
    fn preflight_rejects_unconfigured_nodes() {
        let catalog = testing::catalog();
        let mut built = branching(&catalog);
        built
            .workflow
            .graph
            .update_config(&catalog, built.yes, "to", JsonValue::Null)
            .expect("clear");

        assert_eq!(
            Runner::preflight(&built.workflow, &catalog),
            Err(ExecutionError::NodeNotConfigured { node_id: built.yes })
        );
    }
}
