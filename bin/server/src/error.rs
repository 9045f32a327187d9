//! Mapping from service errors to HTTP responses.
//!
//! Missing workflows, runs, nodes and edges are 404. Structural conflicts
//! with the current graph are 409. Requests that can never succeed as sent
//! (bad branch for the node kind, unknown field, unconfigured workflow,
//! invalid import) are 422.

use autoflow_workflow::{ExecutionError, GraphError, ServiceError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rootcause::Report;
use serde::Serialize;

/// Error body returned by every API route.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A service error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::WorkflowNotFound { .. } | ServiceError::RunNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::WorkflowDisabled { .. } => StatusCode::CONFLICT,
            ServiceError::Graph(error) => graph_status(error),
            ServiceError::Execution(error) if error.is_preflight() => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Execution(ExecutionError::Cancelled) => StatusCode::CONFLICT,
            ServiceError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::InvalidImport { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

fn graph_status(error: &GraphError) -> StatusCode {
    match error {
        GraphError::NodeNotFound { .. } | GraphError::EdgeNotFound { .. } => StatusCode::NOT_FOUND,
        GraphError::DuplicateTrigger { .. }
        | GraphError::BranchAlreadyTaken { .. }
        | GraphError::CycleDetected { .. }
        | GraphError::TriggerAsTarget { .. }
        | GraphError::TargetAlreadyConnected { .. }
        | GraphError::DuplicateId { .. } => StatusCode::CONFLICT,
        GraphError::UnknownDefinition { .. }
        | GraphError::InvalidBranch { .. }
        | GraphError::UnknownField { .. }
        | GraphError::InvalidPolicy { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl From<Report<ServiceError>> for ApiError {
    fn from(report: Report<ServiceError>) -> Self {
        Self(report.current_context().clone())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "request rejected");
        }

        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
