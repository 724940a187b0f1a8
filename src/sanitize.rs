//! Coercion of loosely-typed upstream payloads into well-typed scalars.
//!
//! Nothing in here fails. Input that cannot be represented resolves to
//! `None` (or `false` for booleans) so a single malformed row never poisons
//! an aggregate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::question::QuestionType;

/// Finite number from a numeric literal or a numeric string.
///
/// Structured `{value, label}` wrappers are unwrapped through their `value`
/// field. NaN, infinities, empty strings and every other shape yield `None`.
pub fn to_number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(number) => number.as_f64().filter(|value| value.is_finite()),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
        }
        Value::Object(map) => map.get("value").and_then(to_number),
        _ => None,
    }
}

/// [`to_number`] truncated toward zero.
pub fn to_integer(raw: &Value) -> Option<i64> {
    let value = to_number(raw)?.trunc();
    if value < i64::MIN as f64 || value > i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

/// Non-negative count; negative or missing values collapse to zero.
pub fn to_count(raw: &Value) -> u64 {
    to_integer(raw).map(|value| value.max(0) as u64).unwrap_or(0)
}

/// Absent or unrecognised data is `false`, never an error.
pub fn to_boolean(raw: &Value) -> bool {
    match raw {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|value| value != 0.0 && value.is_finite()),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "1"
        ),
        _ => false,
    }
}

/// Trimmed, non-empty text. Finite numbers are rendered; wrappers resolve
/// through `value` and then `label`.
pub fn to_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(_) => to_number(raw).map(format_number),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Object(map) => map
            .get("value")
            .and_then(to_text)
            .or_else(|| map.get("label").and_then(to_text)),
        _ => None,
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// A raw answer payload resolved once at ingestion so that merge logic never
/// has to look at the original JSON shape again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum AnswerValue {
    Numeric(f64),
    Text(String),
    Choice(String),
    Unknown,
}

impl AnswerValue {
    pub fn classify(question_type: QuestionType, raw: &Value) -> Self {
        if question_type.is_numeric() {
            return to_number(raw).map_or(AnswerValue::Unknown, AnswerValue::Numeric);
        }
        match (question_type, to_text(raw)) {
            (QuestionType::Choice, Some(label)) => AnswerValue::Choice(label),
            (QuestionType::Text, Some(text)) => AnswerValue::Text(text),
            _ => AnswerValue::Unknown,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerValue::Numeric(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(text) => Some(text),
            _ => None,
        }
    }
}
