//! Inter-step data templating.
//!
//! Config values may embed placeholders of the form
//! `{{node_<ULID>.field.path}}`. A placeholder names the step by node id
//! (stable across renumbering) followed by one or more dot-separated path
//! segments; a numeric segment indexes into an array.
//!
//! Values are parsed once when a config field is written and the parsed form
//! is cached on the node. Resolution against a run's outputs is a pure
//! substitution over that parsed form.

use crate::error::TemplateError;
use crate::execution::ExecutionContext;
use autoflow_core::NodeId;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::str::FromStr;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// A reference to a field of an earlier step's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub node_id: NodeId,
    pub path: Vec<String>,
}

impl Reference {
    /// Dotted form of the field path.
    #[must_use]
    pub fn field_path(&self) -> String {
        self.path.join(".")
    }

    fn lookup<'a>(&self, output: &'a JsonValue) -> Option<&'a JsonValue> {
        self.path.iter().try_fold(output, |current, segment| match current {
            JsonValue::Object(map) => map.get(segment),
            JsonValue::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Reference(Reference),
    /// Placeholder text that could not be parsed.
    Malformed { raw: String, reason: String },
}

/// A parsed string value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Splits a string into literal text and placeholders.
    ///
    /// Never fails: unparseable placeholders become [`Segment::Malformed`]
    /// so validation can report every problem at once.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = input;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                segments.push(Segment::Malformed {
                    raw: rest[start..].to_string(),
                    reason: "unterminated placeholder".to_string(),
                });
                rest = "";
                break;
            };

            let raw = &rest[start..start + OPEN.len() + end + CLOSE.len()];
            segments.push(parse_placeholder(raw, &after_open[..end]));
            rest = &after_open[end + CLOSE.len()..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the string contains no placeholders at all.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Reference(reference) => Some(reference),
            _ => None,
        })
    }

    /// `(raw, reason)` for every malformed placeholder.
    pub fn malformed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Malformed { raw, reason } => Some((raw.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// Substitutes every placeholder from `context`.
    ///
    /// A template that is exactly one placeholder yields the referenced
    /// value with its JSON type intact. Mixed text interpolates: strings are
    /// inserted verbatim, other values as their JSON text.
    ///
    /// # Errors
    ///
    /// Fails on malformed placeholders, steps with no recorded output, and
    /// paths that do not exist in the output.
    pub fn resolve(&self, context: &ExecutionContext) -> Result<JsonValue, TemplateError> {
        if let [Segment::Reference(reference)] = self.segments.as_slice() {
            return lookup(reference, context).cloned();
        }

        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Reference(reference) => match lookup(reference, context)? {
                    JsonValue::String(text) => rendered.push_str(text),
                    other => rendered.push_str(&other.to_string()),
                },
                Segment::Malformed { raw, reason } => {
                    return Err(TemplateError::MalformedPlaceholder {
                        placeholder: raw.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }
        Ok(JsonValue::String(rendered))
    }
}

fn parse_placeholder(raw: &str, inner: &str) -> Segment {
    let malformed = |reason: &str| Segment::Malformed {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = inner.split('.').map(str::trim);
    let step = parts.next().unwrap_or_default();
    if step.is_empty() {
        return malformed("missing step identifier");
    }
    let Ok(node_id) = NodeId::from_str(step) else {
        return malformed("step identifier is not a node id");
    };

    let path: Vec<String> = parts.map(str::to_string).collect();
    if path.is_empty() {
        return malformed("missing field path");
    }
    if path.iter().any(String::is_empty) {
        return malformed("empty field path segment");
    }

    Segment::Reference(Reference { node_id, path })
}

fn lookup<'a>(
    reference: &Reference,
    context: &'a ExecutionContext,
) -> Result<&'a JsonValue, TemplateError> {
    let output = context
        .output(reference.node_id)
        .ok_or(TemplateError::MissingStepOutput {
            node_id: reference.node_id,
        })?;
    reference
        .lookup(output)
        .ok_or_else(|| TemplateError::MissingOutputField {
            node_id: reference.node_id,
            path: reference.field_path(),
        })
}

/// A config value with every string leaf parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    /// Non-string scalar (null, bool, number), kept as-is.
    Scalar(JsonValue),
    String(Template),
    Array(Vec<ParsedValue>),
    Object(BTreeMap<String, ParsedValue>),
}

impl ParsedValue {
    #[must_use]
    pub fn parse(value: &JsonValue) -> Self {
        match value {
            JsonValue::String(text) => Self::String(Template::parse(text)),
            JsonValue::Array(items) => Self::Array(items.iter().map(Self::parse).collect()),
            JsonValue::Object(map) => Self::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::parse(value)))
                    .collect(),
            ),
            scalar => Self::Scalar(scalar.clone()),
        }
    }

    /// Every template contained in this value, depth first.
    #[must_use]
    pub fn templates(&self) -> Vec<&Template> {
        let mut found = Vec::new();
        self.collect_templates(&mut found);
        found
    }

    fn collect_templates<'a>(&'a self, found: &mut Vec<&'a Template>) {
        match self {
            Self::Scalar(_) => {}
            Self::String(template) => found.push(template),
            Self::Array(items) => items.iter().for_each(|item| item.collect_templates(found)),
            Self::Object(map) => map.values().for_each(|value| value.collect_templates(found)),
        }
    }

    /// True when no string leaf contains a placeholder.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.templates().iter().all(|template| template.is_literal())
    }

    /// Resolves every string leaf against `context`.
    ///
    /// # Errors
    ///
    /// Returns the first [`TemplateError`] hit while resolving.
    pub fn resolve(&self, context: &ExecutionContext) -> Result<JsonValue, TemplateError> {
        Ok(match self {
            Self::Scalar(value) => value.clone(),
            Self::String(template) => template.resolve(context)?,
            Self::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| item.resolve(context))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), value.resolve(context)?);
                }
                JsonValue::Object(resolved)
            }
        })
    }
}
