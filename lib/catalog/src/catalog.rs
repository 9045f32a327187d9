//! The integration catalog registry.
//!
//! The catalog is loaded once at process start from a versioned JSON
//! document and never mutated afterwards; workflows reference its entries by
//! id and share one instance behind an `Arc`.

use crate::definition::{CONDITION_OPERATORS, FieldType, IntegrationDefinition, NodeKind};
use crate::error::CatalogError;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

const BUILTIN_CATALOG: &str = include_str!("../builtin.json");

/// On-disk shape of a catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Catalog version string.
    pub version: String,
    pub definitions: Vec<IntegrationDefinition>,
}

/// Read-only registry of integration definitions.
#[derive(Debug, Clone)]
pub struct Catalog {
    version: String,
    definitions: Vec<IntegrationDefinition>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    /// Builds a catalog from an already-parsed document.
    ///
    /// # Errors
    ///
    /// Rejects duplicate definition ids, duplicate field names within a
    /// definition, select fields without options, and condition definitions
    /// missing a `left` field or a known-operator `operator` select.
    pub fn from_document(document: CatalogDocument) -> Result<Self, Report<CatalogError>> {
        let mut by_id = HashMap::with_capacity(document.definitions.len());

        for (index, definition) in document.definitions.iter().enumerate() {
            if by_id.insert(definition.id.clone(), index).is_some() {
                return Err(CatalogError::DuplicateDefinition {
                    id: definition.id.clone(),
                }
                .into());
            }

            let mut seen = HashSet::new();
            for field in &definition.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(CatalogError::DuplicateField {
                        definition_id: definition.id.clone(),
                        field: field.name.clone(),
                    }
                    .into());
                }
                if field.field_type == FieldType::Select && field.options.is_empty() {
                    return Err(CatalogError::MissingOptions {
                        definition_id: definition.id.clone(),
                        field: field.name.clone(),
                    }
                    .into());
                }
            }

            if definition.kind == NodeKind::Condition {
                check_condition(definition)?;
            }
        }

        Ok(Self {
            version: document.version,
            definitions: document.definitions,
            by_id,
        })
    }

    /// Parses a catalog from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] for malformed JSON, or any error from
    /// [`Catalog::from_document`].
    pub fn from_json(json: &str) -> Result<Self, Report<CatalogError>> {
        let document: CatalogDocument =
            serde_json::from_str(json).map_err(|e| CatalogError::Parse {
                reason: e.to_string(),
            })?;
        Self::from_document(document)
    }

    /// Loads a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] if the file cannot be read, or any parse
    /// error from [`Catalog::from_json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Report<CatalogError>> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let catalog = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            version = %catalog.version,
            definitions = catalog.len(),
            "loaded integration catalog"
        );
        Ok(catalog)
    }

    /// The catalog bundled with the crate.
    ///
    /// # Errors
    ///
    /// Only fails if the bundled document is itself invalid.
    pub fn builtin() -> Result<Self, Report<CatalogError>> {
        Self::from_json(BUILTIN_CATALOG)
    }

    /// Catalog version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&IntegrationDefinition> {
        self.by_id.get(id).map(|&index| &self.definitions[index])
    }

    /// All definitions in document order.
    pub fn definitions(&self) -> impl Iterator<Item = &IntegrationDefinition> {
        self.definitions.iter()
    }

    /// Definitions of one kind, in document order.
    pub fn by_kind(&self, kind: NodeKind) -> impl Iterator<Item = &IntegrationDefinition> {
        self.definitions.iter().filter(move |d| d.kind == kind)
    }

    /// Definitions under a category tag, in document order.
    pub fn by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a IntegrationDefinition> {
        self.definitions.iter().filter(move |d| d.category == category)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Returns the catalog as its serializable document form.
    #[must_use]
    pub fn to_document(&self) -> CatalogDocument {
        CatalogDocument {
            version: self.version.clone(),
            definitions: self.definitions.clone(),
        }
    }
}

impl FromIterator<IntegrationDefinition> for CatalogDocument {
    fn from_iter<I: IntoIterator<Item = IntegrationDefinition>>(iter: I) -> Self {
        Self {
            version: "custom".to_string(),
            definitions: iter.into_iter().collect(),
        }
    }
}

fn check_condition(definition: &IntegrationDefinition) -> Result<(), Report<CatalogError>> {
    let invalid = |reason: String| CatalogError::InvalidCondition {
        definition_id: definition.id.clone(),
        reason,
    };
    if definition.field("left").is_none() {
        return Err(invalid("missing 'left' field".to_string()).into());
    }
    let operator = definition
        .field("operator")
        .filter(|field| field.field_type == FieldType::Select)
        .ok_or_else(|| invalid("missing 'operator' select field".to_string()))?;
    if let Some(unknown) = operator
        .options
        .iter()
        .find(|option| !CONDITION_OPERATORS.contains(&option.as_str()))
    {
        return Err(invalid(format!("unknown operator '{unknown}'")).into());
    }
    Ok(())
}
