//! mab_common
//!
//! Canonical JSON serialization + SHA-256 hashing shared by the audit sink
//! and the smoke harness.
//!
//! IMPORTANT: do not "pretty print" anywhere this is used for a fingerprint
//! or a log line — keys must be sorted and whitespace must be absent.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize to canonical JSON bytes: sorted keys, no whitespace, UTF-8.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Canonical JSON as a `String` (sorted keys, no whitespace).
pub fn canonical_json_string<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(String::from_utf8(bytes).expect("canonical json is always valid utf-8"))
}

/// Return "sha256:<hex>" of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_bytes(&bytes))
}

/// Return "sha256:<hex>" of raw bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(digest))
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Obj {
        b: u32,
        a: u32,
    }

    #[test]
    fn canonical_hash_is_stable_under_key_order() {
        let x = Obj { b: 2, a: 1 };
        let y = Obj { a: 1, b: 2 };
        assert_eq!(
            sha256_canonical_json(&x).unwrap(),
            sha256_canonical_json(&y).unwrap()
        );
    }

    #[test]
    fn canonical_json_string_has_sorted_keys_no_whitespace() {
        let s = canonical_json_string(&Obj { b: 2, a: 1 }).unwrap();
        assert_eq!(s, r#"{"a":1,"b":2}"#);
    }
}
