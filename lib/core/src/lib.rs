//! Core domain types shared across the autoflow workspace.
//!
//! Holds the strongly-typed ids and the rootcause-based `Result` alias.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EdgeId, NodeId, ParseIdError, WorkflowId, WorkflowRunId};
