//! JSON routes over the workflow service.

use crate::error::ApiError;
use autoflow_catalog::CatalogDocument;
use autoflow_core::{EdgeId, NodeId, WorkflowId, WorkflowRunId};
use autoflow_workflow::{
    Branch, Envelope, ExecutionPolicy, MetadataUpdate, PersistedWorkflow, Position, RunSnapshot,
    ValidationReport, Workflow, WorkflowEdge, WorkflowMetadata, WorkflowNode, WorkflowService,
    WorkflowSummary,
};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub type AppState = Arc<WorkflowService>;

type ApiResult<T> = Result<T, ApiError>;

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/catalog", get(catalog))
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route("/api/workflows/import", post(import_workflow))
        .route(
            "/api/workflows/{workflow_id}",
            get(get_workflow)
                .patch(update_workflow)
                .delete(delete_workflow),
        )
        .route("/api/workflows/{workflow_id}/nodes", post(add_node))
        .route(
            "/api/workflows/{workflow_id}/nodes/{node_id}",
            delete(remove_node),
        )
        .route(
            "/api/workflows/{workflow_id}/nodes/{node_id}/config",
            put(update_config),
        )
        .route(
            "/api/workflows/{workflow_id}/nodes/{node_id}/policy",
            put(set_policy),
        )
        .route(
            "/api/workflows/{workflow_id}/nodes/{node_id}/position",
            put(move_node),
        )
        .route("/api/workflows/{workflow_id}/edges", post(connect))
        .route(
            "/api/workflows/{workflow_id}/edges/{edge_id}",
            delete(disconnect),
        )
        .route("/api/workflows/{workflow_id}/validation", get(validate))
        .route("/api/workflows/{workflow_id}/export", get(export_workflow))
        .route("/api/workflows/{workflow_id}/runs", post(start_run))
        .route("/api/runs/{run_id}", get(get_run))
        .route("/api/runs/{run_id}/cancel", post(cancel_run))
        .with_state(state)
}

async fn catalog(State(service): State<AppState>) -> Json<CatalogDocument> {
    Json(service.catalog().to_document())
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

async fn create_workflow(
    State(service): State<AppState>,
    Json(request): Json<CreateWorkflow>,
) -> (StatusCode, Json<Workflow>) {
    let mut metadata = WorkflowMetadata::new(request.name);
    metadata.description = request.description;
    metadata.tags = request.tags;
    let workflow = service.create_workflow(metadata).await;
    (StatusCode::CREATED, Json(workflow))
}

async fn list_workflows(State(service): State<AppState>) -> Json<Vec<WorkflowSummary>> {
    Json(service.list_workflows().await)
}

async fn get_workflow(
    State(service): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(service.get_workflow(workflow_id).await?))
}

async fn update_workflow(
    State(service): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
    Json(update): Json<MetadataUpdate>,
) -> ApiResult<Json<WorkflowSummary>> {
    Ok(Json(service.update_metadata(workflow_id, update).await?))
}

async fn delete_workflow(
    State(service): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
) -> ApiResult<StatusCode> {
    service.delete_workflow(workflow_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AddNode {
    pub definition_id: String,
    #[serde(default)]
    pub position: Position,
}

async fn add_node(
    State(service): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
    Json(request): Json<AddNode>,
) -> ApiResult<(StatusCode, Json<WorkflowNode>)> {
    let node = service
        .add_node(workflow_id, &request.definition_id, request.position)
        .await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn remove_node(
    State(service): State<AppState>,
    Path((workflow_id, node_id)): Path<(WorkflowId, NodeId)>,
) -> ApiResult<StatusCode> {
    service.remove_node(workflow_id, node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfig {
    pub field: String,
    #[serde(default)]
    pub value: JsonValue,
}

async fn update_config(
    State(service): State<AppState>,
    Path((workflow_id, node_id)): Path<(WorkflowId, NodeId)>,
    Json(request): Json<UpdateConfig>,
) -> ApiResult<Json<WorkflowNode>> {
    let node = service
        .update_config(workflow_id, node_id, &request.field, request.value)
        .await?;
    Ok(Json(node))
}

async fn set_policy(
    State(service): State<AppState>,
    Path((workflow_id, node_id)): Path<(WorkflowId, NodeId)>,
    Json(policy): Json<ExecutionPolicy>,
) -> ApiResult<Json<WorkflowNode>> {
    Ok(Json(service.set_policy(workflow_id, node_id, policy).await?))
}

async fn move_node(
    State(service): State<AppState>,
    Path((workflow_id, node_id)): Path<(WorkflowId, NodeId)>,
    Json(position): Json<Position>,
) -> ApiResult<Json<WorkflowNode>> {
    Ok(Json(service.move_node(workflow_id, node_id, position).await?))
}

#[derive(Debug, Deserialize)]
pub struct Connect {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub branch: Branch,
}

async fn connect(
    State(service): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
    Json(request): Json<Connect>,
) -> ApiResult<(StatusCode, Json<WorkflowEdge>)> {
    let edge = service
        .connect(workflow_id, request.source, request.target, request.branch)
        .await?;
    Ok((StatusCode::CREATED, Json(edge)))
}

async fn disconnect(
    State(service): State<AppState>,
    Path((workflow_id, edge_id)): Path<(WorkflowId, EdgeId)>,
) -> ApiResult<StatusCode> {
    service.disconnect(workflow_id, edge_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn validate(
    State(service): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
) -> ApiResult<Json<ValidationReport>> {
    Ok(Json(service.validate(workflow_id).await?))
}

async fn export_workflow(
    State(service): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
) -> ApiResult<Json<Envelope<PersistedWorkflow>>> {
    Ok(Json(service.export(workflow_id).await?))
}

async fn import_workflow(
    State(service): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WorkflowSummary>)> {
    let summary = service.import(&body).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunStarted {
    pub run_id: WorkflowRunId,
}

async fn start_run(
    State(service): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
    payload: Option<Json<JsonValue>>,
) -> ApiResult<(StatusCode, Json<RunStarted>)> {
    let payload = payload.map_or(JsonValue::Null, |Json(payload)| payload);
    let run_id = service.start_run(workflow_id, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(RunStarted { run_id })))
}

async fn get_run(
    State(service): State<AppState>,
    Path(run_id): Path<WorkflowRunId>,
) -> ApiResult<Json<RunSnapshot>> {
    Ok(Json(service.get_run(run_id).await?))
}

async fn cancel_run(
    State(service): State<AppState>,
    Path(run_id): Path<WorkflowRunId>,
) -> ApiResult<StatusCode> {
    service.cancel_run(run_id).await?;
    Ok(StatusCode::ACCEPTED)
}
