//! Cross-module lifecycle coverage: each test below drives a decision
//! through `apply_event` the way a real caller would and then checks it
//! with the verification surface a caller would actually reach for,
//! rather than poking at one module in isolation.

use decision_ledger_core::spec::{DecisionState, DeterministicClock, Timestamp};
use decision_ledger_core::{
    apply_event, build_merkle_proof, merkle_root_up_to, rewind_decision, run_counterfactual,
    verify_decision_hash_chain, CounterfactualEdit, DecisionRole, DecisionStore, EngineOptions,
    InMemoryStore,
};
use serde_json::{json, Map};

fn store_with_approver() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.upsert_role(DecisionRole {
        decision_id: "d1".to_string(),
        actor_id: "alice".to_string(),
        role: "APPROVER".to_string(),
        created_at: Timestamp::from_millis_epoch(0),
    });
    store
}

fn base_meta() -> Map<String, serde_json::Value> {
    let mut meta = Map::new();
    meta.insert("title".to_string(), json!("T"));
    meta.insert("owner_id".to_string(), json!("o"));
    meta.insert("amount".to_string(), json!(100));
    meta
}

/// S1: chain integrity after three events.
#[test]
fn three_events_reach_approved_with_a_clean_chain_and_provenance() {
    let store = store_with_approver();
    let clock = DeterministicClock::starting_at(1_735_689_600_000);
    let options = EngineOptions::default();
    let meta = base_meta();

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
    let outcome = apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "APPROVE", "actor_id": "alice", "actor_type": "human", "payload": {"reason": null}}),
        meta, None, false,
    )
    .unwrap();

    assert_eq!(outcome.decision.state, DecisionState::Approved);
    assert_eq!(store.latest_seq("d1"), 3);
    assert_eq!(outcome.decision.artifacts.provenance.nodes.len(), 3);
    assert!(verify_decision_hash_chain(&store, "d1").is_ok());
    assert!(outcome.decision.artifacts.provenance.verify().is_ok());
}

/// S2: a tampered provenance node is caught by chain verification, not by
/// silently accepting whatever node_hash happens to be stored.
#[test]
fn tampering_a_provenance_node_breaks_verification() {
    let store = store_with_approver();
    let clock = DeterministicClock::starting_at(1_735_689_600_000);
    let options = EngineOptions::default();
    let meta = base_meta();

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

    let mut decision = store.get_decision("d1").unwrap();
    decision.artifacts.provenance.nodes[1].event_type = "HACKED".to_string();
    store.save_decision(decision, None).unwrap();

    let decision = store.get_decision("d1").unwrap();
    let err = decision.artifacts.provenance.verify().unwrap_err();
    use decision_ledger_core::spec::ProvenanceErrorCode::*;
    assert!(matches!(err.code, NodeHashMismatch | NodeIdMismatch | BrokenPrevHash));
}

/// S3: an open BLOCK-severity obligation breach blocks APPROVE until the
/// obligation is fulfilled.
#[test]
fn sla_breach_blocks_approve_until_fulfilled() {
    let store = store_with_approver();
    let clock = DeterministicClock::starting_at(1_735_689_600_000);
    let options = EngineOptions::default();
    let mut meta = base_meta();
    meta.insert("amount".to_string(), json!(100));

    apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"}),
        meta.clone(), None, false,
    )
    .unwrap();
    apply_event(
        &store, &clock, &options, "d1",
        json!({
            "type": "ADD_OBLIGATION",
            "actor_id": "alice",
            "actor_type": "human",
            "payload": {"obligation": {
                "id": "ob-1", "title": "Remediate", "description": null, "owner": null,
                "due_at": "2024-01-01T00:00:00.000Z", "grace_seconds": 0, "severity": "BLOCK", "tags": []
            }}
        }),
        meta.clone(), None, false,
    )
    .unwrap();
    apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "SIMULATE", "actor_id": "alice", "actor_type": "human"}),
        meta.clone(), None, false,
    )
    .unwrap();

    let blocked = apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "APPROVE", "actor_id": "alice", "actor_type": "human", "payload": {"reason": null}}),
        meta.clone(), None, false,
    )
    .unwrap_err();
    assert_eq!(blocked.code(), "EXECUTION_BLOCKED");

    apply_event(
        &store, &clock, &options, "d1",
        json!({
            "type": "FULFILL_OBLIGATION",
            "actor_id": "alice",
            "actor_type": "human",
            "payload": {"obligation_id": "ob-1", "proof": "done"}
        }),
        meta.clone(), None, false,
    )
    .unwrap();

    let outcome = apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "APPROVE", "actor_id": "alice", "actor_type": "human", "payload": {"reason": null}}),
        meta, None, false,
    )
    .unwrap();
    assert_eq!(outcome.decision.state, DecisionState::Approved);
}

/// S4: replaying the same idempotency key never produces a second event or
/// a second receipt.
#[test]
fn repeated_idempotency_key_produces_exactly_one_event_and_one_receipt() {
    let store = store_with_approver();
    let clock = DeterministicClock::starting_at(1_735_689_600_000);
    let options = EngineOptions::default();
    let meta = base_meta();

    let event = json!({
        "type": "ATTACH_ARTIFACTS",
        "actor_id": "alice",
        "actor_type": "human",
        "idempotency_key": "k1",
        "payload": {}
    });

    let first = apply_event(&store, &clock, &options, "d1", event.clone(), meta.clone(), None, false).unwrap();
    let second = apply_event(&store, &clock, &options, "d1", event, meta, None, false).unwrap();

    assert_eq!(first.event_record.seq, second.event_record.seq);
    assert_eq!(store.latest_seq("d1"), 1);
    assert_eq!(store.receipts_for("d1").len(), 1);
}

/// S5: a Merkle inclusion proof over a 5-event log verifies against the
/// recomputed root, and fails once the proof's leaf is tampered with.
#[test]
fn merkle_inclusion_proof_verifies_and_catches_a_tampered_leaf() {
    let store = store_with_approver();
    let clock = DeterministicClock::starting_at(1_735_689_600_000);
    let options = EngineOptions::default();
    let mut meta = base_meta();
    meta.insert("amount".to_string(), json!(100));

    for event in [
        json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"}),
        json!({"type": "SIMULATE", "actor_id": "alice", "actor_type": "human"}),
        json!({"type": "ATTACH_ARTIFACTS", "actor_id": "alice", "actor_type": "human", "payload": {}}),
        json!({
            "type": "ADD_OBLIGATION", "actor_id": "alice", "actor_type": "human",
            "payload": {"obligation": {
                "id": "ob-1", "title": "R", "description": null, "owner": null,
                "due_at": "2030-01-01T00:00:00.000Z", "grace_seconds": 0, "severity": "WARN", "tags": []
            }}
        }),
        json!({"type": "APPROVE", "actor_id": "alice", "actor_type": "human", "payload": {"reason": null}}),
    ] {
        apply_event(&store, &clock, &options, "d1", event, meta.clone(), None, false).unwrap();
    }

    let expected_root = merkle_root_up_to(&store, "d1", 5).unwrap();
    let proof = build_merkle_proof(&store, "d1", 3, 5).unwrap();
    assert_eq!(proof.root, expected_root);
    assert!(proof.verify());

    let mut tampered = proof;
    tampered.leaf = decision_ledger_core::spec::Hash::from_hex("0".repeat(64));
    assert!(!tampered.verify());
}

/// S6: rewinding to an earlier seq and replaying a counterfactual REJECT
/// leaves the live decision untouched and yields a deterministic id.
#[test]
fn rewind_and_counterfactual_diverge_from_the_live_decision() {
    let store = store_with_approver();
    let clock = DeterministicClock::starting_at(1_735_689_600_000);
    let mut options = EngineOptions::default();
    options.rbac_bypass = true;
    let meta = base_meta();

    apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"}),
        meta.clone(), None, false,
    )
    .unwrap();
    apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "APPROVE", "actor_id": "alice", "actor_type": "human", "payload": {"reason": null}}),
        meta.clone(), None, false,
    )
    .unwrap();

    let live = store.get_decision("d1").unwrap();
    assert_eq!(live.state, DecisionState::Approved);

    let rewound = rewind_decision(&store, &clock, &options, "d1", 1, meta.clone());
    assert!(rewound.stopped_at.is_none());
    assert_eq!(rewound.decision.state, DecisionState::Validated);

    let edits = CounterfactualEdit {
        replace: Vec::new(),
        truncate_after_seq: Some(1),
        append: vec![json!({
            "type": "REJECT", "actor_id": "alice", "actor_type": "human",
            "payload": {"reason": "too risky"}
        })],
    };
    let first = run_counterfactual(&store, &clock, &options, "d1", meta.clone(), &edits).unwrap();
    let second = run_counterfactual(&store, &clock, &options, "d1", meta, &edits).unwrap();

    assert_eq!(first.baseline.state, DecisionState::Approved);
    assert_eq!(first.replay.decision.state, DecisionState::Rejected);
    assert_eq!(first.counterfactual_id, second.counterfactual_id);

    let unchanged = store.get_decision("d1").unwrap();
    assert_eq!(unchanged.state, DecisionState::Approved);
}

/// S7: sealing twice with the same key is idempotent; tampering after the
/// seal is detected, and re-sealing restores verification.
#[test]
fn sealing_is_idempotent_and_detects_post_seal_tampering() {
    use decision_ledger_core::{verify_decision_seal, SignerRegistry};
    use ed25519_dalek::SigningKey;

    let signing_key = SigningKey::from_bytes(&[9u8; 32]);
    let mut registry = SignerRegistry::new();
    registry.register("key-1", signing_key.verifying_key());

    let store = store_with_approver();
    let clock = DeterministicClock::starting_at(1_735_689_600_000);
    let mut options = EngineOptions::default();
    options.signing_keys.insert("key-1".to_string(), signing_key);
    let meta = base_meta();

    apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"}),
        meta.clone(), None, false,
    )
    .unwrap();
    apply_event(
        &store, &clock, &options, "d1",
        json!({"type": "APPROVE", "actor_id": "alice", "actor_type": "human", "payload": {"reason": null}}),
        meta.clone(), None, false,
    )
    .unwrap();

    let seal_event = json!({"type": "SIGN", "actor_id": "alice", "actor_type": "human", "payload": {"key_id": "key-1"}});
    apply_event(&store, &clock, &options, "d1", seal_event.clone(), Map::new(), None, false).unwrap();
    apply_event(&store, &clock, &options, "d1", seal_event, Map::new(), None, false).unwrap();

    let sealed = store.get_decision("d1").unwrap();
    assert_eq!(sealed.signatures.len(), 1);
    assert!(verify_decision_seal(&sealed, "key-1").is_ok());

    let mut tampered = sealed.clone();
    tampered.meta.insert("title".to_string(), json!("tampered"));
    let err = verify_decision_seal(&tampered, "key-1").unwrap_err();
    assert_eq!(err.code, "SIGNATURE_TAMPERED");

    store.save_decision(tampered, None).unwrap();
    let reseal = json!({"type": "SIGN", "actor_id": "alice", "actor_type": "human", "payload": {"key_id": "key-1"}});
    apply_event(&store, &clock, &options, "d1", reseal, Map::new(), None, false).unwrap();

    let resealed = store.get_decision("d1").unwrap();
    assert_eq!(resealed.signatures.len(), 1);
    assert!(verify_decision_seal(&resealed, "key-1").is_ok());
}
