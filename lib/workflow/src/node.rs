//! Workflow node types.
//!
//! A node is one placed instance of a catalog definition. Its kind is copied
//! from the definition at creation time; the step number and the configured
//! flag are derived and only ever written by the graph.

use crate::error::TemplateError;
use crate::execution::ExecutionContext;
use crate::template::ParsedValue;
use autoflow_catalog::{IntegrationDefinition, NodeKind};
use autoflow_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;

/// Canvas coordinates supplied by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    #[default]
    Constant,
    Linear,
    Exponential,
}

/// Per-node timeout and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Per-attempt timeout. Falls back to the runner's default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Total attempts including the first one. Must be at least 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: RetryBackoff,
    /// Delay before the first retry.
    #[serde(default)]
    pub initial_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_attempts: default_max_attempts(),
            backoff: RetryBackoff::default(),
            initial_delay_ms: 0,
        }
    }
}

impl ExecutionPolicy {
    /// A policy that retries up to `max_attempts` times in total.
    #[must_use]
    pub fn with_retries(max_attempts: u32, backoff: RetryBackoff, initial_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff,
            initial_delay_ms,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn retry_delay(&self, failed_attempt: u32) -> Duration {
        let base = self.initial_delay_ms;
        let millis = match self.backoff {
            RetryBackoff::Constant => base,
            RetryBackoff::Linear => base.saturating_mul(u64::from(failed_attempt)),
            RetryBackoff::Exponential => {
                let factor = 1u64
                    .checked_shl(failed_attempt.saturating_sub(1))
                    .unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        };
        Duration::from_millis(millis)
    }
}

/// A node placed on the workflow canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Catalog definition this node was created from.
    pub definition_id: String,
    pub position: Position,
    /// 1-based execution order; `None` while unreachable from the trigger.
    pub step_number: Option<u32>,
    /// Raw values keyed by field name. Strings may embed placeholders.
    #[serde(default)]
    pub config: BTreeMap<String, JsonValue>,
    /// Every required field holds a non-empty value.
    pub is_configured: bool,
    #[serde(default)]
    pub policy: ExecutionPolicy,
    #[serde(skip)]
    parsed: BTreeMap<String, ParsedValue>,
}

impl WorkflowNode {
    /// Creates an unconfigured node for `definition`.
    #[must_use]
    pub fn new(definition: &IntegrationDefinition, position: Position) -> Self {
        Self::with_id(NodeId::new(), definition, position)
    }

    pub(crate) fn with_id(
        id: NodeId,
        definition: &IntegrationDefinition,
        position: Position,
    ) -> Self {
        let mut node = Self {
            id,
            kind: definition.kind,
            definition_id: definition.id.clone(),
            position,
            step_number: None,
            config: BTreeMap::new(),
            is_configured: false,
            policy: ExecutionPolicy::default(),
            parsed: BTreeMap::new(),
        };
        node.refresh_configured(definition);
        node
    }

    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.kind == NodeKind::Trigger
    }

    #[must_use]
    pub fn is_condition(&self) -> bool {
        self.kind == NodeKind::Condition
    }

    /// Writes one config field. `null` clears it.
    pub(crate) fn set_field(
        &mut self,
        definition: &IntegrationDefinition,
        field: &str,
        value: JsonValue,
    ) {
        if value.is_null() {
            self.config.remove(field);
            self.parsed.remove(field);
        } else {
            self.parsed
                .insert(field.to_string(), ParsedValue::parse(&value));
            self.config.insert(field.to_string(), value);
        }
        self.refresh_configured(definition);
    }

    fn refresh_configured(&mut self, definition: &IntegrationDefinition) {
        self.is_configured = definition
            .required_fields()
            .all(|field| self.config.get(&field.name).is_some_and(has_content));
    }

    /// Rebuilds the parsed template cache from the raw config.
    pub(crate) fn reparse(&mut self) {
        self.parsed = self
            .config
            .iter()
            .map(|(field, value)| (field.clone(), ParsedValue::parse(value)))
            .collect();
    }

    /// Parsed form of a config field.
    #[must_use]
    pub fn parsed(&self, field: &str) -> Option<&ParsedValue> {
        self.parsed.get(field)
    }

    pub fn parsed_fields(&self) -> impl Iterator<Item = (&str, &ParsedValue)> {
        self.parsed
            .iter()
            .map(|(field, value)| (field.as_str(), value))
    }

    /// Resolves every config field against a run's outputs.
    ///
    /// # Errors
    ///
    /// Returns the first [`TemplateError`] encountered.
    pub fn resolve_config(
        &self,
        context: &ExecutionContext,
    ) -> Result<Map<String, JsonValue>, TemplateError> {
        let mut resolved = Map::with_capacity(self.parsed.len());
        for (field, value) in &self.parsed {
            resolved.insert(field.clone(), value.resolve(context)?);
        }
        Ok(resolved)
    }
}

fn has_content(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.trim().is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => true,
    }
}
