//! Error types for the catalog crate.

use std::fmt;

/// Errors raised while loading a catalog document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog file could not be read.
    Io { path: String, reason: String },
    /// The document is not a valid catalog.
    Parse { reason: String },
    /// Two definitions share an id.
    DuplicateDefinition { id: String },
    /// A definition declares the same field twice.
    DuplicateField { definition_id: String, field: String },
    /// A select field has no options to choose from.
    MissingOptions { definition_id: String, field: String },
    /// A condition definition lacks the fields its evaluation reads.
    InvalidCondition { definition_id: String, reason: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, reason } => write!(f, "failed to read catalog {path}: {reason}"),
            Self::Parse { reason } => write!(f, "invalid catalog document: {reason}"),
            Self::DuplicateDefinition { id } => {
                write!(f, "duplicate integration definition: {id}")
            }
            Self::DuplicateField {
                definition_id,
                field,
            } => write!(f, "definition {definition_id} declares field '{field}' twice"),
            Self::MissingOptions {
                definition_id,
                field,
            } => write!(
                f,
                "select field '{field}' on definition {definition_id} has no options"
            ),
            Self::InvalidCondition {
                definition_id,
                reason,
            } => write!(f, "condition definition {definition_id} is invalid: {reason}"),
        }
    }
}

impl std::error::Error for CatalogError {}
