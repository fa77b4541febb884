//! Persisted record types (spec §3, §6): `EventRecord`, `Snapshot`,
//! `Anchor`, `LiabilityReceipt`, `PlsShield`, `DecisionRole`, `LedgerEntry`,
//! `CounterfactualRun`. Each carries its own hash-computation helper so the
//! store and the verifier call the same function.

use decision_ledger_spec::hashing::hash_value;
use decision_ledger_spec::{DecisionEdge, DecisionEvent, Decision, Hash, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The persisted form of one applied event (spec §3 `EventRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub decision_id: String,
    pub seq: u64,
    pub at: Timestamp,
    pub event: DecisionEvent,
    pub idempotency_key: Option<String>,
    pub prev_hash: Option<Hash>,
    pub hash: Hash,
}

impl EventRecord {
    /// `H(canonicalize({decision_id, seq, at, idempotency_key, event, prev_hash}))`
    /// (spec §3 invariant (d), §8 invariant 1).
    pub fn compute_hash(
        decision_id: &str,
        seq: u64,
        at: &Timestamp,
        idempotency_key: &Option<String>,
        event: &DecisionEvent,
        prev_hash: &Option<Hash>,
    ) -> Hash {
        hash_value(&serde_json::json!({
            "decision_id": decision_id,
            "seq": seq,
            "at": at,
            "idempotency_key": idempotency_key,
            "event": event,
            "prev_hash": prev_hash,
        }))
    }

    pub fn recompute_hash(&self) -> Hash {
        Self::compute_hash(
            &self.decision_id,
            self.seq,
            &self.at,
            &self.idempotency_key,
            &self.event,
            &self.prev_hash,
        )
    }
}

/// `(decision_id, up_to_seq, decision_blob, checkpoint_hash, root_hash,
/// state_hash, provenance_tail_hash, created_at)` (spec §3 `Snapshot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub decision_id: String,
    pub up_to_seq: u64,
    pub decision: Decision,
    pub checkpoint_hash: Option<Hash>,
    pub root_hash: Option<Hash>,
    pub state_hash: Hash,
    pub provenance_tail_hash: Option<Hash>,
    pub created_at: Timestamp,
}

/// Anchors form their own global chain across decisions (spec §3 `Anchor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub seq: u64,
    pub at: Timestamp,
    pub decision_id: String,
    pub snapshot_up_to_seq: u64,
    pub checkpoint_hash: Hash,
    pub root_hash: Option<Hash>,
    pub state_hash: Hash,
    pub prev_hash: Option<Hash>,
    pub hash: Hash,
}

impl Anchor {
    pub fn compute_hash(
        seq: u64,
        at: &Timestamp,
        decision_id: &str,
        snapshot_up_to_seq: u64,
        checkpoint_hash: &Hash,
        root_hash: &Option<Hash>,
        state_hash: &Hash,
        prev_hash: &Option<Hash>,
    ) -> Hash {
        hash_value(&serde_json::json!({
            "seq": seq,
            "at": at,
            "decision_id": decision_id,
            "snapshot_up_to_seq": snapshot_up_to_seq,
            "checkpoint_hash": checkpoint_hash,
            "root_hash": root_hash,
            "state_hash": state_hash,
            "prev_hash": prev_hash,
        }))
    }

    pub fn recompute_hash(&self) -> Hash {
        Self::compute_hash(
            self.seq,
            &self.at,
            &self.decision_id,
            self.snapshot_up_to_seq,
            &self.checkpoint_hash,
            &self.root_hash,
            &self.state_hash,
            &self.prev_hash,
        )
    }
}

/// One row per applied event (spec §3/§4.9 `LiabilityReceipt`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiabilityReceipt {
    pub decision_id: String,
    pub event_seq: u64,
    pub receipt_id: String,
    pub event_type: String,
    pub actor_id: Option<String>,
    pub actor_type: Option<String>,
    pub trust_score: f64,
    pub trust_reason: String,
    pub state_before_hash: Hash,
    pub state_after_hash: Hash,
    pub public_state_before_hash: Hash,
    pub public_state_after_hash: Hash,
    pub obligations_hash: Hash,
    pub created_at: Timestamp,
    pub receipt_hash: Hash,
}

impl LiabilityReceipt {
    #[allow(clippy::too_many_arguments)]
    pub fn compute_hash(
        decision_id: &str,
        event_seq: u64,
        receipt_id: &str,
        event_type: &str,
        actor_id: &Option<String>,
        actor_type: &Option<String>,
        trust_score: f64,
        trust_reason: &str,
        state_before_hash: &Hash,
        state_after_hash: &Hash,
        public_state_before_hash: &Hash,
        public_state_after_hash: &Hash,
        obligations_hash: &Hash,
        created_at: &Timestamp,
    ) -> Hash {
        hash_value(&serde_json::json!({
            "decision_id": decision_id,
            "event_seq": event_seq,
            "receipt_id": receipt_id,
            "event_type": event_type,
            "actor_id": actor_id,
            "actor_type": actor_type,
            "trust_score": trust_score,
            "trust_reason": trust_reason,
            "state_before_hash": state_before_hash,
            "state_after_hash": state_after_hash,
            "public_state_before_hash": public_state_before_hash,
            "public_state_after_hash": public_state_after_hash,
            "obligations_hash": obligations_hash,
            "created_at": created_at,
        }))
    }
}

/// Personal Liability Shield row (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlsShield {
    pub decision_id: String,
    pub event_seq: u64,
    pub event_type: String,
    pub owner_id: String,
    pub approver_id: String,
    pub signer_state_hash: Hash,
    pub payload: Value,
    pub shield_hash: Hash,
    pub created_at: Timestamp,
}

impl PlsShield {
    pub fn compute_hash(
        decision_id: &str,
        event_seq: u64,
        event_type: &str,
        owner_id: &str,
        approver_id: &str,
        signer_state_hash: &Hash,
        receipt_hash: &Hash,
        payload: &Value,
        created_at: &Timestamp,
    ) -> Hash {
        hash_value(&serde_json::json!({
            "decision_id": decision_id,
            "event_seq": event_seq,
            "event_type": event_type,
            "owner_id": owner_id,
            "approver_id": approver_id,
            "signer_state_hash": signer_state_hash,
            "receipt_hash": receipt_hash,
            "payload": payload,
            "created_at": created_at,
        }))
    }
}

/// `decision_roles(decision_id, actor_id, role, created_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRole {
    pub decision_id: String,
    pub actor_id: String,
    pub role: String,
    pub created_at: Timestamp,
}

/// Ledger entry kinds (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    DecisionEventAppended,
    SnapshotCreated,
    AnchorAppended,
}

/// `enterprise_ledger(...)` row (spec §4.7/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub at: Timestamp,
    pub tenant_id: Option<String>,
    pub entry_type: LedgerEntryType,
    pub decision_id: Option<String>,
    pub event_seq: Option<u64>,
    pub snapshot_up_to_seq: Option<u64>,
    pub anchor_seq: Option<u64>,
    pub payload: Value,
    pub prev_hash: Option<Hash>,
    pub hash: Hash,
    pub sig_alg: Option<String>,
    pub key_id: Option<String>,
    pub sig: Option<String>,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn compute_hash(
        seq: u64,
        at: &Timestamp,
        tenant_id: &Option<String>,
        entry_type: LedgerEntryType,
        decision_id: &Option<String>,
        event_seq: &Option<u64>,
        snapshot_up_to_seq: &Option<u64>,
        anchor_seq: &Option<u64>,
        payload: &Value,
        prev_hash: &Option<Hash>,
    ) -> Hash {
        hash_value(&serde_json::json!({
            "seq": seq,
            "at": at,
            "tenant_id": tenant_id,
            "type": entry_type,
            "decision_id": decision_id,
            "event_seq": event_seq,
            "snapshot_up_to_seq": snapshot_up_to_seq,
            "anchor_seq": anchor_seq,
            "payload": payload,
            "prev_hash": prev_hash,
        }))
    }

    pub fn recompute_hash(&self) -> Hash {
        Self::compute_hash(
            self.seq,
            &self.at,
            &self.tenant_id,
            self.entry_type,
            &self.decision_id,
            &self.event_seq,
            &self.snapshot_up_to_seq,
            &self.anchor_seq,
            &self.payload,
            &self.prev_hash,
        )
    }
}

/// A persisted edge insertion row, mirroring `DecisionEdge` plus storage
/// bookkeeping. `DecisionEdge` itself (spec §3) lives in `decision-ledger-spec`.
pub type EdgeRecord = DecisionEdge;

/// `counterfactual_runs` audit row (spec §4.10 SPEC_FULL addition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualRun {
    pub counterfactual_id: Hash,
    pub source_id: String,
    pub branch_id: Option<String>,
    pub edits: Value,
    pub created_at: Timestamp,
}
