//! The two hash families over a `Decision` (spec §4.1): the tamper hash
//! used for store-internal integrity, and the narrower public hash shared
//! with external parties.
//!
//! Open Question resolution (spec §9: "`normalizeDecisionForHash` strips
//! `accountability` and `signatures`; ... define the canonical hash fields
//! explicitly and tests should pin them"):
//!
//! - **Tamper hash** strips only `signatures`. A signature is computed
//!   over a state hash, so it cannot also be part of the value that hash
//!   covers without becoming self-referential; every other field
//!   (including `accountability` and `artifacts.provenance`) is store
//!   content and belongs in the integrity digest.
//! - **Public hash** strips everything the tamper hash strips, plus
//!   `accountability` (internal actor bookkeeping), the top-level `risk`
//!   record (sensitive business detail), and the internal-only artifact
//!   sub-containers `trust`, `liability_shield`, and `dispute`; and it
//!   additionally drops any `meta` key ending in `_patch` (spec §4.1,
//!   §8 invariant 7).

use crate::decision::Decision;
use crate::hashing::{hash_value, Hash};
use serde_json::Value;

fn strip_patch_meta_keys(value: &mut Value) {
    if let Some(meta) = value.get_mut("meta").and_then(Value::as_object_mut) {
        let patch_keys: Vec<String> = meta
            .keys()
            .filter(|k| k.ends_with("_patch"))
            .cloned()
            .collect();
        for key in patch_keys {
            meta.remove(&key);
        }
    }
}

fn remove_path(value: &mut Value, path: &[&str]) {
    let mut current = value;
    for segment in &path[..path.len().saturating_sub(1)] {
        match current.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(last) = path.last() {
        if let Some(obj) = current.as_object_mut() {
            obj.remove(*last);
        }
    }
}

fn to_value(decision: &Decision) -> Value {
    serde_json::to_value(decision).expect("Decision must serialize to a JSON value")
}

/// `tamper_hash(decision)`: strips only `signatures`.
pub fn tamper_hash(decision: &Decision) -> Hash {
    let mut value = to_value(decision);
    remove_path(&mut value, &["signatures"]);
    hash_value(&value)
}

/// `public_hash(decision)`: the tamper-hash strip set, plus
/// `accountability`, `risk`, the internal artifact sub-containers, and any
/// `meta` key ending in `_patch`.
pub fn public_hash(decision: &Decision) -> Hash {
    let mut value = to_value(decision);
    remove_path(&mut value, &["signatures"]);
    remove_path(&mut value, &["accountability"]);
    remove_path(&mut value, &["risk"]);
    remove_path(&mut value, &["artifacts", "trust"]);
    remove_path(&mut value, &["artifacts", "liability_shield"]);
    remove_path(&mut value, &["artifacts", "dispute"]);
    strip_patch_meta_keys(&mut value);
    hash_value(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use serde_json::Map;

    fn sample() -> Decision {
        Decision::genesis("d1", Timestamp::from_millis_epoch(0), Map::new())
    }

    #[test]
    fn tamper_hash_is_pure_function_of_decision() {
        let d = sample();
        assert_eq!(tamper_hash(&d), tamper_hash(&d));
    }

    #[test]
    fn public_hash_ignores_patch_meta_keys() {
        let mut a = sample();
        let mut b = sample();
        a.meta.insert("amount_patch".to_string(), serde_json::json!(1));
        b.meta.insert("amount_patch".to_string(), serde_json::json!(2));
        assert_eq!(public_hash(&a), public_hash(&b));
    }

    #[test]
    fn public_hash_differs_when_non_patch_meta_differs() {
        let mut a = sample();
        let mut b = sample();
        a.meta.insert("title".to_string(), serde_json::json!("A"));
        b.meta.insert("title".to_string(), serde_json::json!("B"));
        assert_ne!(public_hash(&a), public_hash(&b));
    }

    #[test]
    fn tamper_and_public_hash_diverge_for_same_decision() {
        let d = sample();
        assert_ne!(tamper_hash(&d), public_hash(&d));
    }
}
