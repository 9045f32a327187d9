//! In-process workflow service.
//!
//! The service owns every workflow and every run record. Each workflow sits
//! behind its own `tokio::sync::Mutex`, so a mutation (node removal with its
//! incident edges, say) is applied as one step. Runs work on a clone taken
//! under that lock when they start, and later edits never reach them.
//!
//! Finished runs are kept for inspection up to a retention limit; past it the
//! oldest finished runs are dropped as new ones start.

use crate::definition::{PersistedWorkflow, Workflow, WorkflowMetadata, WorkflowSummary};
use crate::edge::{Branch, WorkflowEdge};
use crate::envelope::Envelope;
use crate::error::ServiceError;
use crate::execution::{RunSnapshot, WorkflowRun};
use crate::graph::WorkflowGraph;
use crate::node::{ExecutionPolicy, Position, WorkflowNode};
use crate::runner::Runner;
use crate::validation::ValidationReport;
use autoflow_catalog::Catalog;
use autoflow_core::{EdgeId, NodeId, WorkflowId, WorkflowRunId};
use rootcause::Report;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Partial metadata update; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetadataUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub tags: Option<Vec<String>>,
}

/// Finished runs kept before the oldest are pruned.
pub const DEFAULT_MAX_RETAINED_RUNS: usize = 1000;

struct RunHandle {
    /// Start order, used to find the oldest runs when pruning.
    sequence: u64,
    state: watch::Receiver<WorkflowRun>,
    cancel: CancellationToken,
}

/// Owns workflows and runs, and is the entry point for every operation.
pub struct WorkflowService {
    catalog: Arc<Catalog>,
    runner: Runner,
    workflows: RwLock<HashMap<WorkflowId, Arc<Mutex<Workflow>>>>,
    runs: RwLock<HashMap<WorkflowRunId, RunHandle>>,
    next_sequence: AtomicU64,
    max_retained_runs: usize,
}

impl WorkflowService {
    pub fn new(catalog: Arc<Catalog>, runner: Runner) -> Self {
        Self {
            catalog,
            runner,
            workflows: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
            max_retained_runs: DEFAULT_MAX_RETAINED_RUNS,
        }
    }

    /// Caps how many runs are kept once finished. Live runs are never pruned.
    #[must_use]
    pub fn with_max_retained_runs(mut self, max_retained_runs: usize) -> Self {
        self.max_retained_runs = max_retained_runs;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[instrument(skip_all, fields(name = %metadata.name))]
    pub async fn create_workflow(&self, metadata: WorkflowMetadata) -> Workflow {
        let workflow = Workflow::with_metadata(metadata);
        let created = workflow.clone();
        self.workflows
            .write()
            .await
            .insert(workflow.id, Arc::new(Mutex::new(workflow)));
        info!(workflow_id = %created.id, "workflow created");
        created
    }

    /// Removes a workflow. Runs already started keep going on their snapshot.
    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, workflow_id: WorkflowId) -> Result<(), Report<ServiceError>> {
        if self.workflows.write().await.remove(&workflow_id).is_none() {
            return Err(ServiceError::WorkflowNotFound { workflow_id }.into());
        }
        info!("workflow deleted");
        Ok(())
    }

    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, Report<ServiceError>> {
        let entry = self.entry(workflow_id).await?;
        let workflow = entry.lock().await.clone();
        Ok(workflow)
    }

    /// Summaries of every workflow, ordered by name.
    pub async fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let entries: Vec<_> = self.workflows.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(WorkflowSummary::from(&*entry.lock().await));
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        summaries
    }

    #[instrument(skip(self, update))]
    pub async fn update_metadata(
        &self,
        workflow_id: WorkflowId,
        update: MetadataUpdate,
    ) -> Result<WorkflowSummary, Report<ServiceError>> {
        let entry = self.entry(workflow_id).await?;
        let mut workflow = entry.lock().await;
        let metadata = &mut workflow.metadata;
        if let Some(name) = update.name {
            metadata.name = name;
        }
        if let Some(description) = update.description {
            metadata.description = Some(description);
        }
        if let Some(tags) = update.tags {
            metadata.tags = tags;
        }
        match update.enabled {
            Some(true) => workflow.enable(),
            Some(false) => workflow.disable(),
            None => {}
        }
        workflow.touch();
        debug!("metadata updated");
        Ok(WorkflowSummary::from(&*workflow))
    }

    #[instrument(skip_all, fields(%workflow_id))]
    pub async fn add_node(
        &self,
        workflow_id: WorkflowId,
        definition_id: &str,
        position: Position,
    ) -> Result<WorkflowNode, Report<ServiceError>> {
        let node = self
            .mutate(workflow_id, |graph, catalog| {
                graph.add_node(catalog, definition_id, position)
            })
            .await?;
        info!(node_id = %node.id, kind = %node.kind, "node added");
        Ok(node)
    }

    #[instrument(skip_all, fields(%workflow_id, %node_id))]
    pub async fn remove_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<WorkflowNode, Report<ServiceError>> {
        let node = self
            .mutate(workflow_id, |graph, _| graph.remove_node(node_id))
            .await?;
        info!("node removed");
        Ok(node)
    }

    #[instrument(skip_all, fields(%workflow_id, %source, %target, %branch))]
    pub async fn connect(
        &self,
        workflow_id: WorkflowId,
        source: NodeId,
        target: NodeId,
        branch: Branch,
    ) -> Result<WorkflowEdge, Report<ServiceError>> {
        let edge = self
            .mutate(workflow_id, |graph, _| graph.connect(source, target, branch))
            .await?;
        info!(edge_id = %edge.id, "nodes connected");
        Ok(edge)
    }

    #[instrument(skip_all, fields(%workflow_id, %edge_id))]
    pub async fn disconnect(
        &self,
        workflow_id: WorkflowId,
        edge_id: EdgeId,
    ) -> Result<WorkflowEdge, Report<ServiceError>> {
        let edge = self
            .mutate(workflow_id, |graph, _| graph.disconnect(edge_id))
            .await?;
        info!("edge removed");
        Ok(edge)
    }

    #[instrument(skip_all, fields(%workflow_id, %node_id))]
    pub async fn update_config(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        field: &str,
        value: JsonValue,
    ) -> Result<WorkflowNode, Report<ServiceError>> {
        let node = self
            .mutate(workflow_id, |graph, catalog| {
                graph.update_config(catalog, node_id, field, value)
            })
            .await?;
        debug!(is_configured = node.is_configured, "config updated");
        Ok(node)
    }

    #[instrument(skip_all, fields(%workflow_id, %node_id))]
    pub async fn set_policy(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        policy: ExecutionPolicy,
    ) -> Result<WorkflowNode, Report<ServiceError>> {
        self.mutate(workflow_id, |graph, _| graph.set_policy(node_id, policy))
            .await
    }

    pub async fn move_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        position: Position,
    ) -> Result<WorkflowNode, Report<ServiceError>> {
        self.mutate(workflow_id, |graph, _| graph.move_node(node_id, position))
            .await
    }

    pub async fn validate(&self, workflow_id: WorkflowId) -> Result<ValidationReport, Report<ServiceError>> {
        let entry = self.entry(workflow_id).await?;
        let report = entry.lock().await.validate(&self.catalog);
        Ok(report)
    }

    /// The workflow's persisted form inside a versioned envelope.
    pub async fn export(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Envelope<PersistedWorkflow>, Report<ServiceError>> {
        let entry = self.entry(workflow_id).await?;
        let persisted = entry.lock().await.to_persisted();
        Ok(Envelope::new(persisted))
    }

    /// Imports an exported document, keeping its workflow id.
    ///
    /// The document is replayed through the graph mutations, so anything the
    /// builder would reject is rejected here too.
    #[instrument(skip_all)]
    pub async fn import(&self, document: &[u8]) -> Result<WorkflowSummary, Report<ServiceError>> {
        let envelope: Envelope<PersistedWorkflow> =
            Envelope::open(document).map_err(|e| ServiceError::InvalidImport {
                reason: e.to_string(),
            })?;
        let workflow = Workflow::restore(envelope.into_payload(), &self.catalog).map_err(|e| {
            ServiceError::InvalidImport {
                reason: e.to_string(),
            }
        })?;
        let summary = WorkflowSummary::from(&workflow);

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.id) {
            return Err(ServiceError::InvalidImport {
                reason: format!("workflow {} already exists", workflow.id),
            }
            .into());
        }
        workflows.insert(workflow.id, Arc::new(Mutex::new(workflow)));
        info!(workflow_id = %summary.id, nodes = summary.node_count, "workflow imported");
        Ok(summary)
    }

    /// Starts a run on a snapshot of the workflow.
    ///
    /// Disabled workflows and preflight failures are rejected synchronously:
    /// no run record is created and no node runs.
    #[instrument(skip_all, fields(%workflow_id))]
    pub async fn start_run(
        &self,
        workflow_id: WorkflowId,
        payload: JsonValue,
    ) -> Result<WorkflowRunId, Report<ServiceError>> {
        let entry = self.entry(workflow_id).await?;
        let snapshot = entry.lock().await.clone();
        if !snapshot.is_enabled() {
            warn!("run rejected, workflow is disabled");
            return Err(ServiceError::WorkflowDisabled { workflow_id }.into());
        }
        if let Err(error) = Runner::preflight(&snapshot, &self.catalog) {
            warn!(%error, "run rejected by preflight");
            return Err(ServiceError::from(error).into());
        }

        let run_id = WorkflowRunId::new();
        let record = WorkflowRun::new(
            run_id,
            workflow_id,
            payload.clone(),
            snapshot.graph.nodes().map(|node| node.id),
        );
        let (state, receiver) = watch::channel(record);
        let cancel = CancellationToken::new();
        {
            let mut runs = self.runs.write().await;
            runs.insert(
                run_id,
                RunHandle {
                    sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                    state: receiver,
                    cancel: cancel.clone(),
                },
            );
            self.prune_runs(&mut runs);
        }

        let runner = self.runner.clone();
        tokio::spawn(async move {
            runner.run(snapshot, payload, state, cancel).await;
        });
        info!(%run_id, "run started");
        Ok(run_id)
    }

    pub async fn get_run(&self, run_id: WorkflowRunId) -> Result<RunSnapshot, Report<ServiceError>> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(&run_id)
            .ok_or(ServiceError::RunNotFound { run_id })?;
        let snapshot = handle.state.borrow().snapshot();
        Ok(snapshot)
    }

    /// Requests cancellation. A run that already finished is left as it is.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: WorkflowRunId) -> Result<(), Report<ServiceError>> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(&run_id)
            .ok_or(ServiceError::RunNotFound { run_id })?;
        handle.cancel.cancel();
        info!("run cancellation requested");
        Ok(())
    }

    /// Waits until the run reaches a terminal state.
    pub async fn wait_for_run(&self, run_id: WorkflowRunId) -> Result<RunSnapshot, Report<ServiceError>> {
        let mut receiver = {
            let runs = self.runs.read().await;
            runs.get(&run_id)
                .ok_or(ServiceError::RunNotFound { run_id })?
                .state
                .clone()
        };
        if receiver.wait_for(|run| run.state.is_terminal()).await.is_err() {
            warn!(%run_id, "run task ended without finishing the run");
        }
        let snapshot = receiver.borrow().snapshot();
        Ok(snapshot)
    }

    /// Drops the oldest finished runs while more than the retention limit
    /// are held.
    fn prune_runs(&self, runs: &mut HashMap<WorkflowRunId, RunHandle>) {
        let excess = runs.len().saturating_sub(self.max_retained_runs);
        if excess == 0 {
            return;
        }
        let mut finished: Vec<_> = runs
            .iter()
            .filter(|(_, handle)| handle.state.borrow().state.is_terminal())
            .map(|(run_id, handle)| (handle.sequence, *run_id))
            .collect();
        finished.sort_unstable();
        for (_, run_id) in finished.into_iter().take(excess) {
            runs.remove(&run_id);
            debug!(%run_id, "pruned finished run");
        }
    }

    async fn entry(&self, workflow_id: WorkflowId) -> Result<Arc<Mutex<Workflow>>, Report<ServiceError>> {
        let entry = self
            .workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or(ServiceError::WorkflowNotFound { workflow_id })?;
        Ok(entry)
    }

    /// Applies one graph mutation under the workflow's lock.
    async fn mutate<T>(
        &self,
        workflow_id: WorkflowId,
        mutation: impl FnOnce(&mut WorkflowGraph, &Catalog) -> Result<T, crate::error::GraphError>,
    ) -> Result<T, Report<ServiceError>> {
        let entry = self.entry(workflow_id).await?;
        let mut workflow = entry.lock().await;
        let value = mutation(&mut workflow.graph, &self.catalog).map_err(ServiceError::from)?;
        workflow.touch();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionError, GraphError};
    use crate::execution::{ExecutionState, NodeExecutionState};
    use crate::runner::{ActionError, ActionExecutor, ActionRequest};
    use crate::testing::{self, NOTIFY, SEND_EMAIL, TRIGGER, placeholder};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    /// Echoes the resolved config; optionally waits for a go signal first.
    #[derive(Default)]
    struct FakeExecutor {
        calls: AtomicUsize,
        gate: Option<Notify>,
    }

    impl FakeExecutor {
        fn gated() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: Some(Notify::new()),
            }
        }
    }

    #[async_trait]
    impl ActionExecutor for FakeExecutor {
        async fn execute(&self, request: ActionRequest) -> Result<JsonValue, ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(json!({ "sent": request.config }))
        }
    }

    /// Echoes the resolved config once a permit is released per call.
    struct PermitExecutor {
        permits: Semaphore,
    }

    #[async_trait]
    impl ActionExecutor for PermitExecutor {
        async fn execute(&self, request: ActionRequest) -> Result<JsonValue, ActionError> {
            let permit = self.permits.acquire().await.map_err(|e| ActionError {
                message: e.to_string(),
            })?;
            permit.forget();
            Ok(json!({ "sent": request.config }))
        }
    }

    struct HangingExecutor;

    #[async_trait]
    impl ActionExecutor for HangingExecutor {
        async fn execute(&self, _request: ActionRequest) -> Result<JsonValue, ActionError> {
            std::future::pending().await
        }
    }

    fn service(executor: Arc<dyn ActionExecutor>) -> WorkflowService {
        WorkflowService::new(Arc::new(testing::catalog()), Runner::new(executor))
    }

    /// Trigger -> notify, both ready to run.
    async fn two_step(service: &WorkflowService) -> (WorkflowId, NodeId, NodeId) {
        let workflow = service
            .create_workflow(WorkflowMetadata::new("Two step"))
            .await;
        let trigger = service
            .add_node(workflow.id, TRIGGER, Position::default())
            .await
            .expect("trigger")
            .id;
        let notify = service
            .add_node(workflow.id, NOTIFY, Position::new(0.0, 100.0))
            .await
            .expect("notify")
            .id;
        service
            .connect(workflow.id, trigger, notify, Branch::Default)
            .await
            .expect("connect");
        service
            .update_config(
                workflow.id,
                notify,
                "message",
                json!(format!("New lead: {}", placeholder(trigger, "name"))),
            )
            .await
            .expect("message");
        (workflow.id, trigger, notify)
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let executor = Arc::new(FakeExecutor::default());
        let service = service(executor.clone());
        let (workflow_id, trigger, notify) = two_step(&service).await;

        let run_id = service
            .start_run(workflow_id, json!({"name": "Ada"}))
            .await
            .expect("start");
        let snapshot = service.wait_for_run(run_id).await.expect("wait");

        assert_eq!(snapshot.status, ExecutionState::Completed);
        assert_eq!(snapshot.node_status[&trigger], NodeExecutionState::Succeeded);
        assert_eq!(snapshot.node_output[&trigger], json!({"name": "Ada"}));
        assert_eq!(
            snapshot.node_output[&notify],
            json!({"sent": {"message": "New lead: Ada"}})
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.get_run(run_id).await.expect("get"), snapshot);
    }

    #[tokio::test]
    async fn unconfigured_node_rejects_start() {
        let executor = Arc::new(FakeExecutor::default());
        let service = service(executor.clone());
        let (workflow_id, _, notify) = two_step(&service).await;
        let mail = service
            .add_node(workflow_id, SEND_EMAIL, Position::default())
            .await
            .expect("mail")
            .id;
        service
            .connect(workflow_id, notify, mail, Branch::Default)
            .await
            .expect("connect");

        let err = service
            .start_run(workflow_id, json!({"name": "Ada"}))
            .await
            .unwrap_err();

        assert_eq!(
            err.current_context(),
            &ServiceError::Execution(ExecutionError::NodeNotConfigured { node_id: mail })
        );
        assert!(service.runs.read().await.is_empty());
        tokio::task::yield_now().await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn runs_use_the_workflow_as_it_was_at_start() {
        let executor = Arc::new(FakeExecutor::gated());
        let service = service(executor.clone());
        let (workflow_id, _, notify) = two_step(&service).await;

        let run_id = service
            .start_run(workflow_id, json!({"name": "Ada"}))
            .await
            .expect("start");
        service
            .remove_node(workflow_id, notify)
            .await
            .expect("remove");
        executor.gate.as_ref().expect("gate").notify_one();

        let snapshot = service.wait_for_run(run_id).await.expect("wait");
        assert_eq!(snapshot.status, ExecutionState::Completed);
        assert_eq!(snapshot.node_status[&notify], NodeExecutionState::Succeeded);

        let workflow = service.get_workflow(workflow_id).await.expect("get");
        assert!(workflow.graph.get_node(notify).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_run_stops_the_run() {
        let service = WorkflowService::new(
            Arc::new(testing::catalog()),
            Runner::new(Arc::new(HangingExecutor)).with_default_timeout(Duration::from_secs(600)),
        );
        let (workflow_id, _, notify) = two_step(&service).await;
        let run_id = service
            .start_run(workflow_id, json!({"name": "Ada"}))
            .await
            .expect("start");
        tokio::task::yield_now().await;

        service.cancel_run(run_id).await.expect("cancel");
        let snapshot = service.wait_for_run(run_id).await.expect("wait");

        assert_eq!(snapshot.status, ExecutionState::Cancelled);
        assert_ne!(snapshot.node_status[&notify], NodeExecutionState::Succeeded);
    }

    #[tokio::test]
    async fn failed_mutation_reports_graph_error() {
        let service = service(Arc::new(FakeExecutor::default()));
        let (workflow_id, trigger, notify) = two_step(&service).await;

        let err = service
            .connect(workflow_id, notify, trigger, Branch::Default)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ServiceError::Graph(GraphError::CycleDetected { .. } | GraphError::TriggerAsTarget { .. })
        ));
        assert_eq!(
            service.get_workflow(workflow_id).await.expect("get").graph.edge_count(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let service = service(Arc::new(FakeExecutor::default()));
        let workflow_id = WorkflowId::new();
        let run_id = WorkflowRunId::new();

        let err = service.get_workflow(workflow_id).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &ServiceError::WorkflowNotFound { workflow_id }
        );
        let err = service.get_run(run_id).await.unwrap_err();
        assert_eq!(err.current_context(), &ServiceError::RunNotFound { run_id });
        assert!(service.delete_workflow(workflow_id).await.is_err());
    }

    #[tokio::test]
    async fn export_then_import_restores_the_workflow() {
        let service = service(Arc::new(FakeExecutor::default()));
        let (workflow_id, _, _) = two_step(&service).await;
        let exported = service.export(workflow_id).await.expect("export");
        let bytes = exported.to_json_bytes().expect("bytes");

        let err = service.import(&bytes).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ServiceError::InvalidImport { .. }
        ));

        service.delete_workflow(workflow_id).await.expect("delete");
        let summary = service.import(&bytes).await.expect("import");
        assert_eq!(summary.id, workflow_id);
        assert_eq!(
            service.export(workflow_id).await.expect("re-export"),
            exported
        );

        let err = service.import(b"{\"version\": 1}").await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ServiceError::InvalidImport { .. }
        ));
    }

    #[tokio::test]
    async fn metadata_and_listing() {
        let service = service(Arc::new(FakeExecutor::default()));
        let (workflow_id, _, _) = two_step(&service).await;
        service
            .create_workflow(WorkflowMetadata::new("Another"))
            .await;

        let summary = service
            .update_metadata(
                workflow_id,
                MetadataUpdate {
                    name: Some("Lead alerts".to_string()),
                    enabled: Some(false),
                    ..MetadataUpdate::default()
                },
            )
            .await
            .expect("update");
        assert!(!summary.enabled);

        let names: Vec<_> = service
            .list_workflows()
            .await
            .into_iter()
            .map(|summary| summary.name)
            .collect();
        assert_eq!(names, vec!["Another", "Lead alerts"]);
    }

    #[tokio::test]
    async fn disabled_workflow_rejects_start() {
        let executor = Arc::new(FakeExecutor::default());
        let service = service(executor.clone());
        let (workflow_id, _, _) = two_step(&service).await;
        let set_enabled = |enabled| MetadataUpdate {
            enabled: Some(enabled),
            ..MetadataUpdate::default()
        };

        service
            .update_metadata(workflow_id, set_enabled(false))
            .await
            .expect("disable");
        let err = service
            .start_run(workflow_id, json!({"name": "Ada"}))
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &ServiceError::WorkflowDisabled { workflow_id }
        );
        assert!(service.runs.read().await.is_empty());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

        service
            .update_metadata(workflow_id, set_enabled(true))
            .await
            .expect("enable");
        let run_id = service
            .start_run(workflow_id, json!({"name": "Ada"}))
            .await
            .expect("start");
        let snapshot = service.wait_for_run(run_id).await.expect("wait");
        assert_eq!(snapshot.status, ExecutionState::Completed);
    }

    #[tokio::test]
    async fn oldest_finished_runs_are_pruned() {
        let service = service(Arc::new(FakeExecutor::default())).with_max_retained_runs(2);
        let (workflow_id, _, _) = two_step(&service).await;

        let mut run_ids = Vec::new();
        for index in 0..5 {
            let run_id = service
                .start_run(workflow_id, json!({"name": format!("lead {index}")}))
                .await
                .expect("start");
            service.wait_for_run(run_id).await.expect("wait");
            run_ids.push(run_id);
        }

        assert_eq!(service.runs.read().await.len(), 2);
        for &run_id in &run_ids[..3] {
            let err = service.get_run(run_id).await.unwrap_err();
            assert_eq!(err.current_context(), &ServiceError::RunNotFound { run_id });
        }
        for &run_id in &run_ids[3..] {
            let snapshot = service.get_run(run_id).await.expect("retained");
            assert_eq!(snapshot.status, ExecutionState::Completed);
        }
    }

    #[tokio::test]
    async fn live_runs_are_never_pruned() {
        let executor = Arc::new(FakeExecutor::gated());
        let service = service(executor.clone()).with_max_retained_runs(0);
        let (workflow_id, _, _) = two_step(&service).await;

        let first = service
            .start_run(workflow_id, json!({"name": "Ada"}))
            .await
            .expect("start");
        let second = service
            .start_run(workflow_id, json!({"name": "Grace"}))
            .await
            .expect("start");
        assert!(service.get_run(first).await.is_ok());
        assert!(service.get_run(second).await.is_ok());

        service.cancel_run(first).await.expect("cancel");
        service.cancel_run(second).await.expect("cancel");
        service.wait_for_run(first).await.expect("wait");
        service.wait_for_run(second).await.expect("wait");
    }

    #[tokio::test]
    async fn concurrent_runs_keep_separate_contexts() {
        let executor = Arc::new(PermitExecutor {
            permits: Semaphore::new(0),
        });
        let service = service(executor.clone());
        let (workflow_id, trigger, notify) = two_step(&service).await;

        let ada = service
            .start_run(workflow_id, json!({"name": "Ada"}))
            .await
            .expect("start ada");
        let grace = service
            .start_run(workflow_id, json!({"name": "Grace"}))
            .await
            .expect("start grace");

        for run_id in [ada, grace] {
            let mut receiver = service.runs.read().await[&run_id].state.clone();
            receiver
                .wait_for(|run| run.node_state(notify) == Some(NodeExecutionState::Running))
                .await
                .expect("notify running");
        }

        service.cancel_run(ada).await.expect("cancel");
        let cancelled = service.wait_for_run(ada).await.expect("wait ada");
        executor.permits.add_permits(1);
        let completed = service.wait_for_run(grace).await.expect("wait grace");

        assert_eq!(cancelled.status, ExecutionState::Cancelled);
        assert_eq!(cancelled.node_output[&trigger], json!({"name": "Ada"}));
        assert!(!cancelled.node_output.contains_key(&notify));

        assert_eq!(completed.status, ExecutionState::Completed);
        assert_eq!(completed.node_output[&trigger], json!({"name": "Grace"}));
        assert_eq!(
            completed.node_output[&notify],
            json!({"sent": {"message": "New lead: Grace"}})
        );
    }
}
