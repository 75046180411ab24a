//! The condition tree: a sum type deliberately weaker than full Rego,
//! sufficient for the rule templates this system needs to express.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A predicate over a change-request document, evaluated by dotted field
/// path (`"resource.tags.Environment"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    FieldEquals { field: String, value: Value },
    FieldNotEquals { field: String, value: Value },
    FieldContains { field: String, value: Value },
    FieldMatches { field: String, pattern: String },
    FieldGt { field: String, value: f64 },
    FieldLt { field: String, value: f64 },
    FieldIn { field: String, values: Vec<Value> },
    FieldNotIn { field: String, values: Vec<Value> },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

/// Look up a dotted field path in a JSON document. Absent intermediate
/// objects or array-indexed segments resolve to `None` rather than erroring.
fn lookup<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in field.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Evaluate `condition` against `doc`. A field that does not resolve is
/// treated as non-matching for every comparison operator (never panics,
/// never throws — per the "no operation throws across the public
/// boundary" contract).
pub fn evaluate(condition: &Condition, doc: &Value) -> bool {
    match condition {
        Condition::FieldEquals { field, value } => lookup(doc, field) == Some(value),
        Condition::FieldNotEquals { field, value } => lookup(doc, field) != Some(value),
        Condition::FieldContains { field, value } => match lookup(doc, field) {
            Some(Value::Array(items)) => items.contains(value),
            Some(Value::String(s)) => value.as_str().is_some_and(|needle| s.contains(needle)),
            _ => false,
        },
        Condition::FieldMatches { field, pattern } => {
            let Some(Value::String(s)) = lookup(doc, field) else { return false };
            Regex::new(pattern).is_ok_and(|re| re.is_match(s))
        }
        Condition::FieldGt { field, value } => lookup(doc, field).and_then(as_f64).is_some_and(|v| v > *value),
        Condition::FieldLt { field, value } => lookup(doc, field).and_then(as_f64).is_some_and(|v| v < *value),
        Condition::FieldIn { field, values } => lookup(doc, field).is_some_and(|v| values.contains(v)),
        Condition::FieldNotIn { field, values } => !lookup(doc, field).is_some_and(|v| values.contains(v)),
        Condition::And(children) => children.iter().all(|c| evaluate(c, doc)),
        Condition::Or(children) => children.iter().any(|c| evaluate(c, doc)),
        Condition::Not(inner) => !evaluate(inner, doc),
    }
}

/// Fill `{{field}}` placeholders in a rule's message template with the
/// resolved value from `doc` (empty string if unresolved).
pub fn interpolate(template: &str, doc: &Value) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        let Some(end) = rest.find("}}") else {
            result.push_str("{{");
            result.push_str(rest);
            return result;
        };
        let field = rest[..end].trim();
        let value = lookup(doc, field).map(value_to_display).unwrap_or_default();
        result.push_str(&value);
        rest = &rest[end + 2..];
    }
    result.push_str(rest);
    result
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
