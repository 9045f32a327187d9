//! Workflow engine for autoflow.
//!
//! This crate provides the workflow builder and execution core:
//!
//! - **Graph Model**: petgraph-backed graph with one trigger, no cycles and
//!   no merge points, validated on every mutation
//! - **Sequencing**: deterministic step numbers from the trigger
//! - **Templates**: `{{step.field}}` placeholders parsed once per config edit
//! - **Validation**: dominator-based reference checks and readiness reports
//! - **Execution**: single-path runs with per-node timeouts, retries and
//!   cancellation behind the [`ActionExecutor`] seam
//! - **Service**: the in-process API that owns workflows and runs

pub mod condition;
pub mod definition;
pub mod edge;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod graph;
pub mod node;
pub mod runner;
pub mod sequencer;
pub mod service;
pub mod template;
pub mod validation;

#[cfg(test)]
mod testing;

pub use definition::{PersistedWorkflow, Workflow, WorkflowMetadata, WorkflowSummary};
pub use edge::{Branch, WorkflowEdge};
pub use envelope::{Envelope, EnvelopeError};
pub use error::{ExecutionError, GraphError, ServiceError, TemplateError};
pub use execution::{ExecutionState, NodeExecutionState, RunSnapshot, WorkflowRun};
pub use graph::WorkflowGraph;
pub use node::{ExecutionPolicy, Position, RetryBackoff, WorkflowNode};
pub use runner::{ActionError, ActionExecutor, ActionRequest, Runner};
pub use service::{MetadataUpdate, WorkflowService};
pub use validation::{Severity, ValidationIssue, ValidationReport};
