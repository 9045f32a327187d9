//! Integration catalog for autoflow.
//!
//! This crate provides:
//!
//! - **Definitions**: the triggers, actions and conditions a workflow can use,
//!   with their declared configuration fields
//! - **Field types**: a closed set of input types with literal validation
//! - **Catalog**: the versioned, read-only registry loaded at start-up

pub mod catalog;
pub mod definition;
pub mod error;

pub use catalog::{Catalog, CatalogDocument};
pub use definition::{
    CONDITION_OPERATORS, ConfigField, FieldType, IntegrationDefinition, NodeKind,
};
pub use error::CatalogError;
