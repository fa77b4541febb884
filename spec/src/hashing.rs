//! Deterministic canonicalization and the SHA-256 hashing used throughout
//! the ledger: every hash in this system is a lowercase hex digest of
//! `SHA256(canonicalize(value))`, with no domain-separation prefix — spec
//! §4.1 defines `H` as plain SHA-256 so that an independent implementation
//! of the documented formula reproduces the same hash.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Recursion guard for canonicalization. Tree-structured domain types can
/// never actually hit this; see spec Design Notes on `"[Circular]"`.
const MAX_CANONICAL_DEPTH: usize = 128;

/// A lowercase hex-encoded SHA-256 digest (64 characters).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(String);

impl Hash {
    /// Wrap an already-computed hex string without re-hashing.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Hash(hex.into())
    }

    /// Borrow the lowercase hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Plain `SHA256(body)`, hex-encoded.
    pub fn digest(body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(body);
        Hash(hex::encode(hasher.finalize()))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Recursively strip `null` values (the "undefined dropped" rule) and sort
/// object keys lexicographically. Arrays preserve order per spec.
fn canonical_value_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_CANONICAL_DEPTH {
        // Defensive only: true Value trees are acyclic. Triggering this is a bug.
        return Value::String("[Circular]".to_string());
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                let v = &map[key];
                if v.is_null() {
                    continue;
                }
                out.insert(key.clone(), canonical_value_at(v, depth + 1));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| canonical_value_at(item, depth + 1))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Canonicalize a JSON value into its deterministic byte encoding.
pub fn canonicalize_to_bytes(value: &Value) -> Vec<u8> {
    let canon = canonical_value_at(value, 0);
    serde_json::to_vec(&canon).expect("canonical value must serialize")
}

/// Canonicalize any `Serialize` value by round-tripping through `Value`.
pub fn canonicalize<T: Serialize>(value: &T) -> Vec<u8> {
    let v = serde_json::to_value(value).expect("value must serialize to canonicalize");
    canonicalize_to_bytes(&v)
}

/// `H(canonicalize(value))`.
pub fn hash_value<T: Serialize>(value: &T) -> Hash {
    Hash::digest(&canonicalize(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_drops_nulls() {
        let value = json!({"b": 1, "a": null, "c": {"z": 1, "y": null}});
        let bytes = canonicalize_to_bytes(&value);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"b":1,"c":{"z":1}}"#);
    }

    #[test]
    fn preserves_array_order() {
        let value = json!([3, 1, 2]);
        let bytes = canonicalize_to_bytes(&value);
        assert_eq!(String::from_utf8(bytes).unwrap(), "[3,1,2]");
    }

    #[test]
    fn hash_is_pure_function_of_value() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn different_values_produce_different_hashes() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        assert_ne!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn matches_an_independent_sha256_of_the_canonical_bytes() {
        let value = json!({"b": 1, "a": 2});
        let bytes = canonicalize_to_bytes(&value);
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let expected = hex::encode(hasher.finalize());
        assert_eq!(hash_value(&value).as_str(), expected);
    }
}
