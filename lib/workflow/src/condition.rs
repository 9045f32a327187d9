//! Condition evaluation.
//!
//! A condition node compares its resolved `left` value against an optional
//! `right` value using one of a fixed set of operators, and the run follows
//! the `true` or `false` branch accordingly.

use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// Comparison operators offered by condition definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
    IsTrue,
    IsFalse,
}

impl FromStr for Operator {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            "is_empty" => Self::IsEmpty,
            "is_not_empty" => Self::IsNotEmpty,
            "is_true" => Self::IsTrue,
            "is_false" => Self::IsFalse,
            other => {
                return Err(ConditionError::UnknownOperator {
                    operator: other.to_string(),
                });
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    MissingOperator,
    UnknownOperator { operator: String },
    NotANumber { value: String },
    NotABoolean { value: String },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOperator => write!(f, "condition has no operator"),
            Self::UnknownOperator { operator } => write!(f, "unknown operator '{operator}'"),
            Self::NotANumber { value } => write!(f, "'{value}' is not a number"),
            Self::NotABoolean { value } => write!(f, "'{value}' is not a boolean"),
        }
    }
}

impl std::error::Error for ConditionError {}

/// Evaluates a condition from its resolved config.
///
/// # Errors
///
/// Fails when the operator is missing or unknown, or when an ordering or
/// boolean operator gets a value of the wrong shape.
pub fn evaluate(config: &Map<String, JsonValue>) -> Result<bool, ConditionError> {
    let operator: Operator = config
        .get("operator")
        .and_then(JsonValue::as_str)
        .ok_or(ConditionError::MissingOperator)?
        .parse()?;
    let left = config.get("left").unwrap_or(&JsonValue::Null);
    let right = config.get("right").unwrap_or(&JsonValue::Null);
    compare(operator, left, right)
}

/// Applies `operator` to two values.
///
/// # Errors
///
/// See [`evaluate`].
pub fn compare(
    operator: Operator,
    left: &JsonValue,
    right: &JsonValue,
) -> Result<bool, ConditionError> {
    Ok(match operator {
        Operator::Equals => loosely_equal(left, right),
        Operator::NotEquals => !loosely_equal(left, right),
        Operator::Contains => contains(left, right),
        Operator::NotContains => !contains(left, right),
        Operator::GreaterThan => number(left)? > number(right)?,
        Operator::LessThan => number(left)? < number(right)?,
        Operator::IsEmpty => is_empty(left),
        Operator::IsNotEmpty => !is_empty(left),
        Operator::IsTrue => boolean(left)?,
        Operator::IsFalse => !boolean(left)?,
    })
}

/// Text form used for loose comparisons: strings verbatim, others as JSON.
fn text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(value: &JsonValue) -> Result<f64, ConditionError> {
    as_number(value).ok_or_else(|| ConditionError::NotANumber { value: text(value) })
}

fn boolean(value: &JsonValue) -> Result<bool, ConditionError> {
    match value {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        JsonValue::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        other => Err(ConditionError::NotABoolean { value: text(other) }),
    }
}

fn loosely_equal(left: &JsonValue, right: &JsonValue) -> bool {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l == r;
    }
    left == right || text(left) == text(right)
}

fn contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    match haystack {
        JsonValue::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        JsonValue::Object(map) => map.contains_key(&text(needle)),
        other => text(other).contains(&text(needle)),
    }
}

fn is_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => false,
    }
}
