//! Canonical JSON digest used to identify the model a plan was built from.

use sha2::{Digest, Sha256};

/// Recursively sort object keys so logically equal documents serialise identically.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// SHA256 hex digest of the canonical JSON form of `value`.
pub fn compute_digest(value: &serde_json::Value) -> String {
    let canonical = canonicalize(value).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_digest() {
        let a = json!({"project": {"name": "X", "customer": "Y"}, "n": [1, 2]});
        let b = json!({"n": [1, 2], "project": {"customer": "Y", "name": "X"}});
        assert_eq!(compute_digest(&a), compute_digest(&b));
    }

    #[test]
    fn array_order_changes_digest() {
        assert_ne!(
            compute_digest(&json!([1, 2])),
            compute_digest(&json!([2, 1]))
        );
    }

    #[test]
    fn digest_is_sha256_hex() {
        let d = compute_digest(&json!({}));
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
