//! Recursive redaction of sensitive field values, applied at the
//! audit/write boundary — never to the document handed to the policy
//! backend, which needs the real values to evaluate conditions.

use regex_lite::Regex;
use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

fn sensitive_key_pattern() -> Regex {
    Regex::new(r"(?i)password|secret|token|key|credential").expect("pattern is valid")
}

/// Return a redacted clone of `value`: any object key matching the
/// sensitive-key pattern has its value replaced, recursively.
pub fn redact(value: &Value) -> Value {
    let pattern = sensitive_key_pattern();
    redact_with(value, &pattern)
}

fn redact_with(value: &Value, pattern: &Regex) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let redacted = if pattern.is_match(k) { Value::String(REDACTED.into()) } else { redact_with(v, pattern) };
                    (k.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_with(v, pattern)).collect()),
        other => other.clone(),
    }
}
