//! Hash-chain, snapshot/anchor, and decision-integrity verification (spec
//! §4.8 "Snapshot/Anchor Verifier", §2 "Integrity verifier"). Every check
//! here is read-only: it recomputes hashes and links from stored records
//! and compares them to what is stored, never mutating the store.
//!
//! Grounded on the teacher's verifier-style passes over `AppendLog` (the
//! same read-lock, recompute-and-compare discipline as `merkle.rs`), with
//! the chain-walk and snapshot-anchoring rules taken directly from spec
//! §4.8/§8.

use crate::merkle::MerkleProof;
use crate::records::{Anchor, EventRecord, LiabilityReceipt, Snapshot};
use crate::signing::SignerRegistry;
use crate::store::DecisionStore;
use decision_ledger_spec::hash_families::{public_hash, tamper_hash};
use decision_ledger_spec::provenance::ProvenanceErrorCode;
use decision_ledger_spec::{Decision, Hash, Violation};
use serde::{Deserialize, Serialize};

/// Cryptographically verify every signature recorded on a decision against
/// its own `signed_hash` (spec §7 `SIGNATURE_TAMPERED`). This does not check
/// freshness against the decision's current state — see
/// `verify_decision_seal` for that.
pub fn verify_decision_signatures(decision: &Decision, registry: &SignerRegistry) -> Result<(), Violation> {
    for sig in &decision.signatures {
        if !registry.verify(&sig.key_id, &sig.signed_hash, &sig.signature_hex) {
            return Err(Violation::block(
                "SIGNATURE_TAMPERED",
                format!("signature for key {} fails cryptographic verification", sig.key_id),
            ));
        }
    }
    Ok(())
}

/// Strict seal check (spec §8 S7 "seal idempotence"): the most recent
/// signature under `key_id` must have been taken over the decision's
/// *current* tamper hash. Any mutation since sealing — a meta patch, a
/// new obligation, anything — "unseals" the decision until it is signed
/// again with the same key.
pub fn verify_decision_seal(decision: &Decision, key_id: &str) -> Result<(), Violation> {
    let sig = decision
        .signatures
        .iter()
        .rev()
        .find(|s| s.key_id == key_id)
        .ok_or_else(|| Violation::block("SIGNATURE_TAMPERED", format!("no signature recorded for key {key_id}")))?;
    if sig.signed_hash != tamper_hash(decision) {
        return Err(Violation::block(
            "SIGNATURE_TAMPERED",
            format!("decision state has changed since key {key_id} last sealed it"),
        ));
    }
    Ok(())
}

/// `verifyDecisionHashChain(decision_id)` (spec §4.8): walk events in seq
/// order, checking monotonicity, prev_hash linkage, hash presence, and
/// hash recomputation. Returns the first failing code.
pub fn verify_decision_hash_chain(store: &dyn DecisionStore, decision_id: &str) -> Result<(), Violation> {
    verify_event_sequence(&store.events_from(decision_id, 1), 1, None)
}

fn verify_event_sequence(records: &[EventRecord], first_seq: u64, mut prev_hash: Option<Hash>) -> Result<(), Violation> {
    let mut expected_seq = first_seq;
    for record in records {
        if record.seq != expected_seq {
            return Err(Violation::block(
                "NON_MONOTONIC_SEQ",
                format!("expected seq {expected_seq}, found {} for decision {}", record.seq, record.decision_id),
            ));
        }
        if record.hash.as_str().is_empty() {
            return Err(Violation::block(
                "MISSING_HASHES",
                format!("event at seq {} carries no hash", record.seq),
            ));
        }
        if record.prev_hash != prev_hash {
            return Err(Violation::block(
                "PREV_HASH_MISMATCH",
                format!("event at seq {} does not chain from the prior record's hash", record.seq),
            ));
        }
        if record.recompute_hash() != record.hash {
            return Err(Violation::block(
                "HASH_MISMATCH",
                format!("event at seq {} fails hash recomputation", record.seq),
            ));
        }
        prev_hash = Some(record.hash.clone());
        expected_seq += 1;
    }
    Ok(())
}

/// `verifyDecisionFromSnapshot` (spec §4.8): anchor at `snapshot.up_to_seq`
/// and `snapshot.checkpoint_hash`, then verify the delta tail as above.
/// If `checkpoint_hash` is absent, it is computed by re-hashing up to
/// `up_to_seq` (i.e. the checkpoint event's own hash stands in for it).
pub fn verify_decision_from_snapshot(
    store: &dyn DecisionStore,
    decision_id: &str,
    snapshot: &Snapshot,
) -> Result<(), Violation> {
    let checkpoint_event = store.event_at(decision_id, snapshot.up_to_seq).ok_or_else(|| {
        Violation::block(
            "CHECKPOINT_EVENT_NOT_FOUND",
            format!("no event at seq {} for decision {decision_id}", snapshot.up_to_seq),
        )
    })?;

    let expected_checkpoint = snapshot.checkpoint_hash.clone().unwrap_or_else(|| checkpoint_event.hash.clone());
    if checkpoint_event.hash != expected_checkpoint {
        return Err(Violation::block(
            "CHECKPOINT_HASH_MISMATCH",
            format!("event hash at seq {} does not match snapshot.checkpoint_hash", snapshot.up_to_seq),
        ));
    }

    let tail = store.events_from(decision_id, snapshot.up_to_seq + 1);
    verify_event_sequence(&tail, snapshot.up_to_seq + 1, Some(checkpoint_event.hash))
}

/// Same check anchored at the latest stored snapshot. `NO_SNAPSHOT` if the
/// decision has never been snapshotted.
pub fn verify_decision_from_latest_snapshot(store: &dyn DecisionStore, decision_id: &str) -> Result<(), Violation> {
    let snapshot = store
        .latest_snapshot(decision_id)
        .ok_or_else(|| Violation::block("NO_SNAPSHOT", format!("decision {decision_id} has no snapshot")))?;
    verify_decision_from_snapshot(store, decision_id, &snapshot)
}

/// Also verifies the snapshot's own derived fields against what the store
/// can recompute: §8 invariants 3-5 (`checkpoint_hash`, `root_hash`,
/// `state_hash`, `provenance_tail_hash`).
pub fn verify_snapshot_fields(store: &dyn DecisionStore, snapshot: &Snapshot) -> Result<(), Violation> {
    let expected_root = crate::store::merkle_root_up_to(store, &snapshot.decision_id, snapshot.up_to_seq);
    if snapshot.root_hash != expected_root {
        return Err(Violation::block(
            "SNAPSHOT_STATE_HASH_MISMATCH",
            format!(
                "snapshot root_hash for {} at seq {} does not match the recomputed Merkle root",
                snapshot.decision_id, snapshot.up_to_seq
            ),
        ));
    }
    if snapshot.state_hash != tamper_hash(&snapshot.decision) {
        return Err(Violation::block(
            "SNAPSHOT_STATE_HASH_MISMATCH",
            format!("snapshot state_hash for {} does not match tamper_hash(decision)", snapshot.decision_id),
        ));
    }
    let expected_tail = snapshot.decision.artifacts.provenance.last_node_hash.clone();
    if snapshot.provenance_tail_hash != expected_tail {
        return Err(Violation::block(
            "SNAPSHOT_PROVENANCE_TAIL_MISMATCH",
            format!("snapshot provenance_tail_hash for {} does not match the decision's provenance tail", snapshot.decision_id),
        ));
    }
    Ok(())
}

/// A Merkle inclusion proof of `seq` within the leaf set `1..=up_to_seq`
/// (spec §4.8 "Merkle proof of inclusion").
pub fn build_merkle_proof(store: &dyn DecisionStore, decision_id: &str, seq: u64, up_to_seq: u64) -> Option<MerkleProof> {
    if seq == 0 || seq > up_to_seq {
        return None;
    }
    let mut leaves = Vec::with_capacity(up_to_seq as usize);
    for s in 1..=up_to_seq {
        leaves.push(store.event_at(decision_id, s)?.hash);
    }
    MerkleProof::build(&leaves, (seq - 1) as usize)
}

/// A self-verifiable receipt for one anchor, optionally pinned to a global
/// chain head observed at issuance time (spec §4.8 "Anchor receipt").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub anchor: Anchor,
    pub pinned_head_seq: Option<u64>,
}

impl AnchorReceipt {
    pub fn issue(anchor: Anchor, pinned_head: Option<&Anchor>) -> Self {
        AnchorReceipt {
            anchor,
            pinned_head_seq: pinned_head.map(|a| a.seq),
        }
    }

    /// Checks that the anchor's hash is correctly computable from its
    /// declared fields, then (if pinned) that the pinned head has not
    /// rolled back behind this anchor's seq.
    pub fn verify(&self) -> Result<(), Violation> {
        if self.anchor.recompute_hash() != self.anchor.hash {
            return Err(Violation::block(
                "HASH_MISMATCH",
                format!("anchor at seq {} fails hash recomputation", self.anchor.seq),
            ));
        }
        if let Some(pinned_seq) = self.pinned_head_seq {
            if pinned_seq < self.anchor.seq {
                return Err(Violation::block(
                    "ANCHOR_ROLLBACK_DETECTED",
                    format!("pinned chain head at seq {pinned_seq} precedes anchor seq {}", self.anchor.seq),
                ));
            }
        }
        Ok(())
    }
}

fn provenance_error_code(code: ProvenanceErrorCode) -> &'static str {
    match code {
        ProvenanceErrorCode::BadGenesisLink => "BAD_GENESIS_LINK",
        ProvenanceErrorCode::BrokenPrevId => "BROKEN_PREV_ID",
        ProvenanceErrorCode::BrokenPrevHash => "BROKEN_PREV_HASH",
        ProvenanceErrorCode::NodeIdMismatch => "NODE_ID_MISMATCH",
        ProvenanceErrorCode::NodeHashMismatch => "NODE_HASH_MISMATCH",
        ProvenanceErrorCode::BagTailMismatch => "BAG_TAIL_MISMATCH",
    }
}

/// Which named check in the `verifyDecisionIntegrity` bundle failed (spec
/// §2: "DECISION_EXISTS, PROVENANCE_CHAIN, RECEIPT_MATCHES, DIA,
/// FORK_RECEIPT bundle").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityCheck {
    DecisionExists,
    ProvenanceChain,
    ReceiptMatches,
    /// Decision Integrity Anchor: the receipt chain is internally
    /// consistent — each receipt's `state_before_hash` equals the prior
    /// receipt's `state_after_hash`, and the latest receipt's
    /// `state_after_hash`/`public_state_after_hash` match the live
    /// decision's tamper/public hash.
    Dia,
    /// Two receipts recorded against the same `event_seq` whose hashes
    /// diverge — evidence of a forked or replayed-with-different-input
    /// apply for that event.
    ForkReceipt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityFailure {
    pub check: IntegrityCheck,
    pub violation: Violation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub decision_id: String,
    pub ok: bool,
    pub failures: Vec<IntegrityFailure>,
}

/// `verifyDecisionIntegrity(decision_id)` (spec §2, §6): the unified bundle
/// run before every `apply_event` call (spec §4.6 step 14 covers the
/// narrower provenance-only check; this is the full bundle exposed as a
/// standalone audit entry point).
pub fn verify_decision_integrity(store: &dyn DecisionStore, decision_id: &str) -> IntegrityReport {
    let mut failures = Vec::new();

    let decision = match store.get_decision(decision_id) {
        Some(d) => d,
        None => {
            failures.push(IntegrityFailure {
                check: IntegrityCheck::DecisionExists,
                violation: Violation::block("DECISION_NOT_FOUND", format!("no decision {decision_id}")),
            });
            return IntegrityReport {
                decision_id: decision_id.to_string(),
                ok: false,
                failures,
            };
        }
    };

    if let Err(err) = decision.artifacts.provenance.verify() {
        failures.push(IntegrityFailure {
            check: IntegrityCheck::ProvenanceChain,
            violation: Violation::block(
                provenance_error_code(err.code),
                match err.node_index {
                    Some(i) => format!("provenance node {i} failed verification"),
                    None => "provenance chain tail mismatch".to_string(),
                },
            ),
        });
    }

    let receipts = store.receipts_for(decision_id);

    if let Some(latest) = receipts.last() {
        if latest.state_after_hash != tamper_hash(&decision) {
            failures.push(IntegrityFailure {
                check: IntegrityCheck::ReceiptMatches,
                violation: Violation::block(
                    "DECISION_TAMPERED",
                    "latest receipt's state_after_hash does not match the live decision's tamper hash".to_string(),
                ),
            });
        } else if latest.public_state_after_hash != public_hash(&decision) {
            failures.push(IntegrityFailure {
                check: IntegrityCheck::ReceiptMatches,
                violation: Violation::block(
                    "DECISION_PUBLIC_HASH_MISMATCH",
                    "latest receipt's public_state_after_hash does not match the live decision's public hash".to_string(),
                ),
            });
        }
    }

    if let Some(err) = verify_receipt_chain_linkage(&receipts) {
        failures.push(IntegrityFailure {
            check: IntegrityCheck::Dia,
            violation: err,
        });
    }

    if let Some(err) = find_fork_receipt(&receipts) {
        failures.push(IntegrityFailure {
            check: IntegrityCheck::ForkReceipt,
            violation: err,
        });
    }

    IntegrityReport {
        decision_id: decision_id.to_string(),
        ok: failures.is_empty(),
        failures,
    }
}

fn verify_receipt_chain_linkage(receipts: &[LiabilityReceipt]) -> Option<Violation> {
    for pair in receipts.windows(2) {
        let (prior, next) = (&pair[0], &pair[1]);
        if next.state_before_hash != prior.state_after_hash {
            return Some(Violation::block(
                "DIA_CHAIN_BROKEN",
                format!(
                    "receipt at seq {} does not chain from receipt at seq {}'s state_after_hash",
                    next.event_seq, prior.event_seq
                ),
            ));
        }
    }
    None
}

fn find_fork_receipt(receipts: &[LiabilityReceipt]) -> Option<Violation> {
    for pair in receipts.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.event_seq == b.event_seq && a.receipt_hash != b.receipt_hash {
            return Some(Violation::block(
                "FORK_RECEIPT_DETECTED",
                format!("two diverging receipts recorded for event_seq {}", a.event_seq),
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{apply_event, EngineOptions};
    use crate::store::InMemoryStore;
    use decision_ledger_spec::DeterministicClock;
    use serde_json::{json, Map};

    fn three_event_decision() -> InMemoryStore {
        let store = InMemoryStore::new();
        let clock = DeterministicClock::starting_at(1_735_689_600_000);
        let options = EngineOptions::default();
        store.upsert_role(crate::records::DecisionRole {
            decision_id: "d1".to_string(),
            actor_id: "alice".to_string(),
            role: "APPROVER".to_string(),
            created_at: decision_ledger_spec::Timestamp::from_millis_epoch(0),
        });
        let mut meta = Map::new();
        meta.insert("title".to_string(), json!("T"));
        meta.insert("owner_id".to_string(), json!("o"));
        meta.insert("amount".to_string(), json!(100));

        apply_event(
            &store, &clock, &options, "d1",
            json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"}),
            meta.clone(), None, false,
        )
        .unwrap();
        apply_event(
            &store, &clock, &options, "d1",
            json!({"type": "SIMULATE", "actor_id": "alice", "actor_type": "human"}),
            meta.clone(), None, false,
        )
        .unwrap();
        apply_event(
            &store, &clock, &options, "d1",
            json!({"type": "APPROVE", "actor_id": "alice", "actor_type": "human", "payload": {"reason": null}}),
            meta, None, false,
        )
        .unwrap();
        store
    }

    #[test]
    fn hash_chain_verifies_after_three_events() {
        let store = three_event_decision();
        assert!(verify_decision_hash_chain(&store, "d1").is_ok());
    }

    #[test]
    fn tampered_event_hash_fails_chain_verification() {
        let store = three_event_decision();
        let mut events = store.events_from("d1", 1);
        events[1].hash = decision_ledger_spec::Hash::from_hex("1".repeat(64));
        store.seed_events("d1", events);
        let err = verify_decision_hash_chain(&store, "d1").unwrap_err();
        assert_eq!(err.code, "HASH_MISMATCH");
    }

    #[test]
    fn merkle_proof_verifies_against_snapshot_root() {
        let store = three_event_decision();
        let proof = build_merkle_proof(&store, "d1", 2, 3).unwrap();
        assert!(proof.verify());
        let mut tampered = proof;
        tampered.leaf = decision_ledger_spec::Hash::from_hex("0".repeat(64));
        assert!(!tampered.verify());
    }

    #[test]
    fn integrity_bundle_passes_for_untouched_decision() {
        let store = three_event_decision();
        let report = verify_decision_integrity(&store, "d1");
        assert!(report.ok, "unexpected failures: {:?}", report.failures);
    }

    #[test]
    fn integrity_bundle_flags_tampered_decision() {
        let store = three_event_decision();
        let mut decision = store.get_decision("d1").unwrap();
        decision.meta.insert("amount".to_string(), serde_json::json!(999));
        store.save_decision(decision, None).unwrap();
        let report = verify_decision_integrity(&store, "d1");
        assert!(!report.ok);
        assert!(report.failures.iter().any(|f| matches!(f.check, IntegrityCheck::ReceiptMatches)));
    }

    #[test]
    fn anchor_receipt_detects_rollback() {
        let store = three_event_decision();
        let decision = store.get_decision("d1").unwrap();
        let snapshot = Snapshot {
            decision_id: "d1".to_string(),
            up_to_seq: 3,
            state_hash: tamper_hash(&decision),
            checkpoint_hash: store.event_at("d1", 3).map(|r| r.hash),
            root_hash: crate::store::merkle_root_up_to(&store, "d1", 3),
            provenance_tail_hash: decision.artifacts.provenance.last_node_hash.clone(),
            decision,
            created_at: decision_ledger_spec::Timestamp::from_millis_epoch(0),
        };
        store.put_snapshot(snapshot).unwrap();
        let anchor = store
            .append_anchor("d1", 3, decision_ledger_spec::Timestamp::from_millis_epoch(1))
            .unwrap();
        let receipt = AnchorReceipt::issue(anchor.clone(), Some(&anchor));
        assert!(receipt.verify().is_ok());

        let stale_head = Anchor { seq: 0, ..anchor.clone() };
        let rolled_back = AnchorReceipt::issue(anchor, Some(&stale_head));
        let err = rolled_back.verify().unwrap_err();
        assert_eq!(err.code, "ANCHOR_ROLLBACK_DETECTED");
    }

    #[test]
    fn seal_is_idempotent_and_unseals_on_tamper() {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]);
        let mut registry = SignerRegistry::new();
        registry.register("key-1", signing_key.verifying_key());

        let store = three_event_decision();
        let clock = DeterministicClock::starting_at(1_735_689_600_000);
        let mut options = EngineOptions::default();
        options.signing_keys.insert("key-1".to_string(), signing_key);

        let sign_event = json!({"type": "SIGN", "actor_id": "alice", "actor_type": "human", "payload": {"key_id": "key-1"}});
        apply_event(&store, &clock, &options, "d1", sign_event.clone(), Map::new(), None, false).unwrap();
        apply_event(&store, &clock, &options, "d1", sign_event, Map::new(), None, false).unwrap();

        let decision = store.get_decision("d1").unwrap();
        assert_eq!(decision.signatures.len(), 1);
        assert!(verify_decision_signatures(&decision, &registry).is_ok());
        assert!(verify_decision_seal(&decision, "key-1").is_ok());

        let mut tampered = decision.clone();
        tampered.meta.insert("amount".to_string(), json!(999));
        let err = verify_decision_seal(&tampered, "key-1").unwrap_err();
        assert_eq!(err.code, "SIGNATURE_TAMPERED");
        // signatures still verify cryptographically; only the seal is stale.
        assert!(verify_decision_signatures(&tampered, &registry).is_ok());

        store.save_decision(tampered, None).unwrap();
        let resign = json!({"type": "SIGN", "actor_id": "alice", "actor_type": "human", "payload": {"key_id": "key-1"}});
        apply_event(&store, &clock, &options, "d1", resign, Map::new(), None, false).unwrap();
        let resealed = store.get_decision("d1").unwrap();
        assert_eq!(resealed.signatures.len(), 1);
        assert!(verify_decision_seal(&resealed, "key-1").is_ok());
    }
}
