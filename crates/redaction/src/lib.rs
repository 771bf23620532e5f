//! mab_redaction
//!
//! A pure, depth-first redactor: any object key whose lowercased form
//! contains one of a fixed set of sensitive substrings has its value
//! replaced, and its subtree is not descended into. No I/O, no audit
//! emission — callers record the returned `RedactionRecord`s themselves.

use mab_contract::RedactionRecord;
use serde_json::Value;

const SENSITIVE_KEYWORDS: &[&str] = &[
    "token",
    "secret",
    "authorization",
    "cookie",
    "password",
    "api_key",
];

const REDACTED_VALUE: &str = "***REDACTED***";

/// Redact `value` in place (conceptually — the input is consumed and a new
/// value returned) and report every field that was redacted, in the order
/// visited (object keys in insertion order, array elements in index order).
pub fn redact(value: Value) -> (Value, Vec<RedactionRecord>) {
    let mut records = Vec::new();
    let redacted = redact_at("", value, &mut records);
    (redacted, records)
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

fn redact_at(path: &str, value: Value, records: &mut Vec<RedactionRecord>) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                if is_sensitive_key(&key) {
                    records.push(RedactionRecord {
                        field: child_path,
                        reason: "sensitive".to_string(),
                    });
                    out.insert(key, Value::String(REDACTED_VALUE.to_string()));
                } else {
                    let redacted_child = redact_at(&child_path, v, records);
                    out.insert(key, redacted_child);
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let redacted_items = items
                .into_iter()
                .enumerate()
                .map(|(i, v)| redact_at(&format!("{path}[{i}]"), v, records))
                .collect();
            Value::Array(redacted_items)
        }
        other => other,
    }
}
