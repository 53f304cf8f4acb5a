//! Deterministic JSON canonicalisation and content hashing.
//!
//! Produces byte-exact serialisation of any JSON-representable value: keys
//! sorted lexicographically at every depth, no insignificant whitespace,
//! UTF-8 encoding. This is the sole source of every `json_canonical` value
//! and every content hash used by the approval/execution services — two
//! callers that feed it structurally-equal JSON trees get identical bytes.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Recursively sort object keys so serialisation is stable regardless of
/// insertion order (relevant if `serde_json`'s `preserve_order` feature is
/// ever turned on transitively).
fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), canonical_value(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

/// Serialise `value` to its canonical byte string: sorted keys, no
/// whitespace, UTF-8.
pub fn canonicalise(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&canonical_value(value)).expect("Value serialisation cannot fail")
}

/// Canonical JSON as a `String`, for storage in text columns.
pub fn canonicalise_string(value: &Value) -> String {
    String::from_utf8(canonicalise(value)).expect("canonical JSON is always valid UTF-8")
}

/// SHA-256 of arbitrary bytes, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 of a UTF-8 string's bytes, lowercase hex.
pub fn sha256_text(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Canonicalise then hash in one step — the operation the approval and
/// execution services actually need.
pub fn canonical_hash(value: &Value) -> (String, String) {
    let canonical = canonicalise_string(value);
    let hash = sha256_text(&canonical);
    (canonical, hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_at_every_depth() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(canonicalise(&a), canonicalise(&b));
    }

    #[test]
    fn no_insignificant_whitespace() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        let bytes = canonicalise(&v);
        assert!(!bytes.windows(2).any(|w| w == b": " || w == b", "));
    }

    #[test]
    fn arrays_preserve_order() {
        let a = json!({"urls": ["https://b.com", "https://a.com"]});
        let b = json!({"urls": ["https://a.com", "https://b.com"]});
        assert_ne!(canonicalise(&a), canonicalise(&b));
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let v = json!({"tool": "open_links", "params": {"urls": ["https://example.com"]}});
        let (_, h1) = canonical_hash(&v);
        let (_, h2) = canonical_hash(&v);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn distinct_trees_hash_differently() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        assert_ne!(canonical_hash(&a).1, canonical_hash(&b).1);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn structurally_equal_values_canonicalise_identically(
            a in 0i64..1000, b in 0i64..1000, k1 in "[a-z]{1,8}", k2 in "[a-z]{1,8}"
        ) {
            if k1 != k2 {
                let x = json!({ k1.clone(): a, k2.clone(): b });
                let y = json!({ k2: b, k1: a });
                prop_assert_eq!(canonicalise(&x), canonicalise(&y));
            }
        }
    }
}
