//! Integration definition types.
//!
//! A definition describes one trigger, action or condition a user can drop
//! onto the builder canvas: its identity, the category it is listed under,
//! and the configuration fields its form renders.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// What role a definition (and every node created from it) plays in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point fired by an external event.
    Trigger,
    /// Side-effecting step performed through an integration.
    Action,
    /// Two-way branch selected by a boolean evaluation.
    Condition,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Condition => "condition",
        }
    }
}

/// Operator names a condition definition's `operator` select may offer.
pub const CONDITION_OPERATORS: [&str; 10] = [
    "equals",
    "not_equals",
    "contains",
    "not_contains",
    "greater_than",
    "less_than",
    "is_empty",
    "is_not_empty",
    "is_true",
    "is_false",
];

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input widget / value type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Select,
    Json,
    Boolean,
    Date,
}

impl FieldType {
    /// Checks a literal (placeholder-free) value against this field type.
    ///
    /// `options` is only consulted for [`FieldType::Select`].
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value does not fit the type.
    pub fn check_literal(&self, value: &JsonValue, options: &[String]) -> Result<(), String> {
        match (self, value) {
            (_, JsonValue::Null) => Ok(()),
            (Self::Text | Self::Textarea, JsonValue::String(_)) => Ok(()),
            (Self::Text | Self::Textarea, other) => {
                Err(format!("expected text, got {}", json_type_name(other)))
            }
            (Self::Number, JsonValue::Number(_)) => Ok(()),
            (Self::Number, JsonValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("'{s}' is not a number")),
            (Self::Boolean, JsonValue::Bool(_)) => Ok(()),
            (Self::Boolean, JsonValue::String(s)) => match s.trim() {
                "true" | "false" => Ok(()),
                other => Err(format!("'{other}' is not a boolean")),
            },
            (Self::Select, JsonValue::String(s)) => {
                if options.iter().any(|option| option == s) {
                    Ok(())
                } else {
                    Err(format!("'{s}' is not one of: {}", options.join(", ")))
                }
            }
            (Self::Json, JsonValue::String(s)) => serde_json::from_str::<JsonValue>(s)
                .map(|_| ())
                .map_err(|e| format!("invalid JSON: {e}")),
            (Self::Json, _) => Ok(()),
            (Self::Date, JsonValue::String(s)) => {
                let s = s.trim();
                if DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
                {
                    Ok(())
                } else {
                    Err(format!("'{s}' is not a date"))
                }
            }
            (expected, other) => Err(format!(
                "expected {expected:?}, got {}",
                json_type_name(other)
            )),
        }
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// A configuration field declared by a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    /// Key under which the value is stored in a node's config.
    pub name: String,
    /// Form label.
    pub label: String,
    /// Value type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the node counts as configured without this field.
    #[serde(default)]
    pub required: bool,
    /// Allowed values for `select` fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ConfigField {
    /// Creates an optional field.
    #[must_use]
    pub fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type,
            required: false,
            options: Vec::new(),
            placeholder: None,
            description: None,
        }
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the allowed values of a select field.
    #[must_use]
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Checks a literal value against this field's type and options.
    ///
    /// # Errors
    ///
    /// Returns the reason the value was rejected.
    pub fn check_literal(&self, value: &JsonValue) -> Result<(), String> {
        self.field_type.check_literal(value, &self.options)
    }
}

/// An entry in the integration catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationDefinition {
    /// Unique identifier (e.g. `gmail.send_email`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub kind: NodeKind,
    /// Category tag used to group definitions in the picker.
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared configuration fields, in form order.
    #[serde(default)]
    pub fields: Vec<ConfigField>,
}

impl IntegrationDefinition {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: NodeKind,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            category: category.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Appends a field.
    #[must_use]
    pub fn with_field(mut self, field: ConfigField) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the declared field with the given name, if any.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ConfigField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &ConfigField> {
        self.fields.iter().filter(|f| f.required)
    }
}
