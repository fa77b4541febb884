//! The append-only store (spec §4.7, §5): decisions, hash-chained events,
//! snapshots, the global anchor chain, liability receipts, PLS shields,
//! edges, roles, and the enterprise ledger — all behind one
//! `DecisionStore` trait so the engine and verifier are storage-agnostic.
//!
//! `InMemoryStore` is the primary implementation, grounded on the
//! teacher's `AppendLog` (`parking_lot::RwLock`-guarded `Vec`, one
//! `tracing::info_span!` per mutating call). `PersistentStore` (see
//! `persistent_store.rs`) adds WAL durability on top of the same tables.

use crate::errors::StoreError;
use crate::merkle::merkle_root;
use crate::records::{
    Anchor, CounterfactualRun, DecisionRole, EdgeRecord, EventRecord, LedgerEntry,
    LedgerEntryType, LiabilityReceipt, PlsShield, Snapshot,
};
use decision_ledger_spec::{hash_families::tamper_hash, Decision, DecisionEvent, Hash, Timestamp};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Shared table state, `parking_lot::RwLock`-guarded so reads never block
/// behind other readers (spec §5: "single-writer, cooperative-concurrency").
#[derive(Default)]
pub struct StoreTables {
    pub(crate) decisions: HashMap<String, Decision>,
    pub(crate) events: HashMap<String, Vec<EventRecord>>,
    pub(crate) idempotency_index: HashMap<(String, String), u64>,
    pub(crate) snapshots: HashMap<String, Vec<Snapshot>>,
    pub(crate) anchors: Vec<Anchor>,
    pub(crate) receipts: HashMap<String, Vec<LiabilityReceipt>>,
    pub(crate) pls_shields: Vec<PlsShield>,
    pub(crate) edges: Vec<EdgeRecord>,
    pub(crate) roles: HashMap<String, Vec<DecisionRole>>,
    pub(crate) ledger: Vec<LedgerEntry>,
    pub(crate) counterfactual_runs: Vec<CounterfactualRun>,
}

/// The storage contract every subsystem (engine, replay, verifier) relies
/// on. All mutating calls are transactional in the sense of spec §5: one
/// `applyEvent` call's worth of appends either all land or none do, from
/// the caller's point of view (`InMemoryStore` achieves this by holding
/// the write lock for the call's duration; `PersistentStore` additionally
/// fsyncs the WAL before releasing it).
pub trait DecisionStore: Send + Sync {
    fn get_decision(&self, decision_id: &str) -> Option<Decision>;
    fn get_version(&self, decision_id: &str) -> Option<u64>;

    /// Persist the given decision as its new current state. If
    /// `expected_version` is `Some` and does not match the stored version,
    /// fails `CONCURRENT_MODIFICATION` (spec §5).
    fn save_decision(
        &self,
        decision: Decision,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError>;

    fn latest_seq(&self, decision_id: &str) -> u64;
    fn events_from(&self, decision_id: &str, from_seq: u64) -> Vec<EventRecord>;
    fn event_at(&self, decision_id: &str, seq: u64) -> Option<EventRecord>;
    fn find_by_idempotency_key(&self, decision_id: &str, key: &str) -> Option<EventRecord>;

    /// `appendEvent` (spec §4.7): idempotency short-circuit, `MAX(seq)+1`,
    /// `prev_hash` chained to the prior record, insert.
    fn append_event(
        &self,
        decision_id: &str,
        event: DecisionEvent,
        at: Timestamp,
        idempotency_key: Option<String>,
    ) -> Result<EventRecord, StoreError>;

    fn put_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError>;
    fn latest_snapshot(&self, decision_id: &str) -> Option<Snapshot>;
    fn snapshot_at_or_before(&self, decision_id: &str, seq: u64) -> Option<Snapshot>;
    fn prune_snapshots(&self, decision_id: &str, keep: usize);

    /// `appendAnchor` (spec §4.7): one per `(decision_id, snapshot_up_to_seq)`.
    fn append_anchor(&self, decision_id: &str, snapshot_up_to_seq: u64, at: Timestamp) -> Result<Anchor, StoreError>;
    fn latest_anchor(&self) -> Option<Anchor>;
    fn anchor_for(&self, decision_id: &str, snapshot_up_to_seq: u64) -> Option<Anchor>;
    fn all_anchors(&self) -> Vec<Anchor>;

    /// `pruneAnchors(n)` (spec §4.7): keep the last `n` by seq, then
    /// recompute every remaining anchor's `(prev_hash, hash)` in order.
    fn prune_anchors(&self, keep: usize);

    fn insert_receipt(&self, receipt: LiabilityReceipt) -> Result<(), StoreError>;
    fn latest_receipt(&self, decision_id: &str) -> Option<LiabilityReceipt>;
    fn receipt_at(&self, decision_id: &str, event_seq: u64) -> Option<LiabilityReceipt>;

    /// All receipts for a decision in insertion (event_seq) order. Used by
    /// the integrity verifier to walk the receipt chain.
    fn receipts_for(&self, decision_id: &str) -> Vec<LiabilityReceipt>;

    fn insert_pls_shield(&self, shield: PlsShield) -> Result<(), StoreError>;
    fn pls_shields_for(&self, decision_id: &str) -> Vec<PlsShield>;

    fn insert_edge(&self, edge: EdgeRecord);
    fn edges_for(&self, decision_id: &str) -> Vec<EdgeRecord>;

    fn upsert_role(&self, role: DecisionRole);
    fn roles_for(&self, decision_id: &str, actor_id: &str) -> Vec<String>;

    fn append_ledger_entry(
        &self,
        tenant_id: Option<String>,
        entry_type: LedgerEntryType,
        decision_id: Option<String>,
        event_seq: Option<u64>,
        snapshot_up_to_seq: Option<u64>,
        anchor_seq: Option<u64>,
        payload: Value,
        at: Timestamp,
        signature: Option<(String, String, String)>,
    ) -> Result<LedgerEntry, StoreError>;
    fn ledger_range(&self, tenant_id: Option<&str>, from_seq: u64, limit: usize) -> Vec<LedgerEntry>;

    fn record_counterfactual_run(&self, run: CounterfactualRun);
    fn counterfactual_runs_for(&self, source_id: &str) -> Vec<CounterfactualRun>;

    /// One-time migration (spec §4.7 "Hash-chain backfill"): recompute
    /// `hash`/`prev_hash` for any event rows that predate hashing. A no-op
    /// on a fresh store; present so callers opening a possibly-legacy
    /// store always have a safe hook to call.
    fn backfill_hash_chains(&self);

    /// Seed a store's event log for one decision directly from
    /// already-hashed records, without recomputing or re-chaining them.
    /// Used by `core::replay` to give a throwaway shadow store the same
    /// seq/hash-chain continuity as the live store it's replaying from, so
    /// replayed history lines up seq-for-seq with the original. Not part of
    /// the normal `append_event` path.
    fn seed_events(&self, decision_id: &str, records: Vec<EventRecord>);
}

/// Primary store implementation: all tables live in memory behind one
/// `RwLock`, matching the teacher's `AppendLog` concurrency discipline.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<StoreTables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    /// Construct directly from a pre-populated table set (used by
    /// `PersistentStore` after WAL replay).
    pub fn from_tables(tables: StoreTables) -> Self {
        InMemoryStore {
            tables: RwLock::new(tables),
        }
    }

    pub fn with_tables<R>(&self, f: impl FnOnce(&StoreTables) -> R) -> R {
        f(&self.tables.read())
    }
}

impl DecisionStore for InMemoryStore {
    fn get_decision(&self, decision_id: &str) -> Option<Decision> {
        self.tables.read().decisions.get(decision_id).cloned()
    }

    fn get_version(&self, decision_id: &str) -> Option<u64> {
        self.tables.read().decisions.get(decision_id).map(|d| d.version)
    }

    fn save_decision(
        &self,
        decision: Decision,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let span = tracing::info_span!(
            "store.save_decision",
            decision_id = %decision.id,
            version = decision.version,
        );
        let _guard = span.enter();
        let mut tables = self.tables.write();
        if let Some(expected) = expected_version {
            let found = tables.decisions.get(&decision.id).map(|d| d.version).unwrap_or(0);
            if found != expected {
                tracing::error!(expected, found, "concurrent modification");
                return Err(StoreError::ConcurrentModification {
                    decision_id: decision.id,
                    expected,
                    found,
                });
            }
        }
        tables.decisions.insert(decision.id.clone(), decision);
        tracing::debug!("decision saved");
        Ok(())
    }

    fn latest_seq(&self, decision_id: &str) -> u64 {
        self.tables
            .read()
            .events
            .get(decision_id)
            .and_then(|events| events.last())
            .map(|r| r.seq)
            .unwrap_or(0)
    }

    fn events_from(&self, decision_id: &str, from_seq: u64) -> Vec<EventRecord> {
        self.tables
            .read()
            .events
            .get(decision_id)
            .map(|events| events.iter().filter(|r| r.seq >= from_seq).cloned().collect())
            .unwrap_or_default()
    }

    fn event_at(&self, decision_id: &str, seq: u64) -> Option<EventRecord> {
        self.tables
            .read()
            .events
            .get(decision_id)
            .and_then(|events| events.iter().find(|r| r.seq == seq).cloned())
    }

    fn find_by_idempotency_key(&self, decision_id: &str, key: &str) -> Option<EventRecord> {
        let tables = self.tables.read();
        let seq = *tables
            .idempotency_index
            .get(&(decision_id.to_string(), key.to_string()))?;
        tables
            .events
            .get(decision_id)
            .and_then(|events| events.iter().find(|r| r.seq == seq).cloned())
    }

    fn append_event(
        &self,
        decision_id: &str,
        event: DecisionEvent,
        at: Timestamp,
        idempotency_key: Option<String>,
    ) -> Result<EventRecord, StoreError> {
        let span = tracing::info_span!(
            "store.append_event",
            decision_id = %decision_id,
            seq = tracing::field::Empty,
        );
        let _guard = span.enter();
        let mut tables = self.tables.write();

        if let Some(key) = &idempotency_key {
            if let Some(seq) = tables
                .idempotency_index
                .get(&(decision_id.to_string(), key.clone()))
                .copied()
            {
                let existing = tables
                    .events
                    .get(decision_id)
                    .and_then(|events| events.iter().find(|r| r.seq == seq).cloned());
                if let Some(existing) = existing {
                    tracing::debug!(seq, "idempotent replay, returning existing record");
                    return Ok(existing);
                }
            }
        }

        let events = tables.events.entry(decision_id.to_string()).or_default();
        let seq = events.last().map(|r| r.seq + 1).unwrap_or(1);
        let prev_hash = events.last().map(|r| r.hash.clone());
        let hash = EventRecord::compute_hash(decision_id, seq, &at, &idempotency_key, &event, &prev_hash);
        let record = EventRecord {
            decision_id: decision_id.to_string(),
            seq,
            at,
            event,
            idempotency_key: idempotency_key.clone(),
            prev_hash,
            hash,
        };
        events.push(record.clone());
        if let Some(key) = idempotency_key {
            tables
                .idempotency_index
                .insert((decision_id.to_string(), key), seq);
        }
        span.record("seq", seq);
        tracing::debug!("event appended");
        Ok(record)
    }

    fn put_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let span = tracing::info_span!(
            "store.put_snapshot",
            decision_id = %snapshot.decision_id,
            up_to_seq = snapshot.up_to_seq,
        );
        let _guard = span.enter();
        let mut tables = self.tables.write();
        let list = tables.snapshots.entry(snapshot.decision_id.clone()).or_default();
        list.retain(|s| s.up_to_seq != snapshot.up_to_seq);
        list.push(snapshot);
        list.sort_by_key(|s| s.up_to_seq);
        tracing::debug!("snapshot stored");
        Ok(())
    }

    fn latest_snapshot(&self, decision_id: &str) -> Option<Snapshot> {
        self.tables.read().snapshots.get(decision_id).and_then(|s| s.last().cloned())
    }

    fn snapshot_at_or_before(&self, decision_id: &str, seq: u64) -> Option<Snapshot> {
        self.tables
            .read()
            .snapshots
            .get(decision_id)
            .and_then(|list| list.iter().rev().find(|s| s.up_to_seq <= seq).cloned())
    }

    fn prune_snapshots(&self, decision_id: &str, keep: usize) {
        let mut tables = self.tables.write();
        if let Some(list) = tables.snapshots.get_mut(decision_id) {
            if list.len() > keep {
                let drop_count = list.len() - keep;
                list.drain(0..drop_count);
            }
        }
    }

    fn append_anchor(
        &self,
        decision_id: &str,
        snapshot_up_to_seq: u64,
        at: Timestamp,
    ) -> Result<Anchor, StoreError> {
        let snapshot = self
            .snapshot_at_or_before(decision_id, snapshot_up_to_seq)
            .filter(|s| s.up_to_seq == snapshot_up_to_seq)
            .ok_or_else(|| StoreError::NoSnapshot(decision_id.to_string()))?;

        let mut tables = self.tables.write();
        if tables
            .anchors
            .iter()
            .any(|a| a.decision_id == decision_id && a.snapshot_up_to_seq == snapshot_up_to_seq)
        {
            return Err(anyhow::anyhow!(
                "anchor already exists for decision {decision_id} at seq {snapshot_up_to_seq}"
            )
            .into());
        }

        let checkpoint_hash = snapshot
            .checkpoint_hash
            .clone()
            .unwrap_or_else(|| tamper_hash(&snapshot.decision));
        let seq = tables.anchors.last().map(|a| a.seq + 1).unwrap_or(1);
        let prev_hash = tables.anchors.last().map(|a| a.hash.clone());
        let hash = Anchor::compute_hash(
            seq,
            &at,
            decision_id,
            snapshot_up_to_seq,
            &checkpoint_hash,
            &snapshot.root_hash,
            &snapshot.state_hash,
            &prev_hash,
        );
        let anchor = Anchor {
            seq,
            at,
            decision_id: decision_id.to_string(),
            snapshot_up_to_seq,
            checkpoint_hash,
            root_hash: snapshot.root_hash.clone(),
            state_hash: snapshot.state_hash.clone(),
            prev_hash,
            hash,
        };
        tables.anchors.push(anchor.clone());
        tracing::debug!(seq = anchor.seq, "anchor appended");
        Ok(anchor)
    }

    fn latest_anchor(&self) -> Option<Anchor> {
        self.tables.read().anchors.last().cloned()
    }

    fn anchor_for(&self, decision_id: &str, snapshot_up_to_seq: u64) -> Option<Anchor> {
        self.tables
            .read()
            .anchors
            .iter()
            .find(|a| a.decision_id == decision_id && a.snapshot_up_to_seq == snapshot_up_to_seq)
            .cloned()
    }

    fn all_anchors(&self) -> Vec<Anchor> {
        self.tables.read().anchors.clone()
    }

    fn prune_anchors(&self, keep: usize) {
        let mut tables = self.tables.write();
        if tables.anchors.len() > keep {
            let drop_count = tables.anchors.len() - keep;
            tables.anchors.drain(0..drop_count);
        }
        let mut prev_hash: Option<Hash> = None;
        for (i, anchor) in tables.anchors.iter_mut().enumerate() {
            let new_seq = (i + 1) as u64;
            anchor.seq = new_seq;
            anchor.prev_hash = prev_hash.clone();
            anchor.hash = Anchor::compute_hash(
                new_seq,
                &anchor.at,
                &anchor.decision_id,
                anchor.snapshot_up_to_seq,
                &anchor.checkpoint_hash,
                &anchor.root_hash,
                &anchor.state_hash,
                &prev_hash,
            );
            prev_hash = Some(anchor.hash.clone());
        }
    }

    fn insert_receipt(&self, receipt: LiabilityReceipt) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables
            .receipts
            .entry(receipt.decision_id.clone())
            .or_default()
            .push(receipt);
        Ok(())
    }

    fn latest_receipt(&self, decision_id: &str) -> Option<LiabilityReceipt> {
        self.tables.read().receipts.get(decision_id).and_then(|r| r.last().cloned())
    }

    fn receipt_at(&self, decision_id: &str, event_seq: u64) -> Option<LiabilityReceipt> {
        self.tables
            .read()
            .receipts
            .get(decision_id)
            .and_then(|list| list.iter().find(|r| r.event_seq == event_seq).cloned())
    }

    fn receipts_for(&self, decision_id: &str) -> Vec<LiabilityReceipt> {
        self.tables.read().receipts.get(decision_id).cloned().unwrap_or_default()
    }

    fn insert_pls_shield(&self, shield: PlsShield) -> Result<(), StoreError> {
        self.tables.write().pls_shields.push(shield);
        Ok(())
    }

    fn pls_shields_for(&self, decision_id: &str) -> Vec<PlsShield> {
        self.tables
            .read()
            .pls_shields
            .iter()
            .filter(|s| s.decision_id == decision_id)
            .cloned()
            .collect()
    }

    fn insert_edge(&self, edge: EdgeRecord) {
        self.tables.write().edges.push(edge);
    }

    fn edges_for(&self, decision_id: &str) -> Vec<EdgeRecord> {
        self.tables
            .read()
            .edges
            .iter()
            .filter(|e| e.from_decision_id == decision_id || e.to_decision_id == decision_id)
            .cloned()
            .collect()
    }

    fn upsert_role(&self, role: DecisionRole) {
        let mut tables = self.tables.write();
        let list = tables.roles.entry(role.decision_id.clone()).or_default();
        list.retain(|r| !(r.actor_id == role.actor_id && r.role == role.role));
        list.push(role);
    }

    fn roles_for(&self, decision_id: &str, actor_id: &str) -> Vec<String> {
        self.tables
            .read()
            .roles
            .get(decision_id)
            .map(|list| {
                list.iter()
                    .filter(|r| r.actor_id == actor_id)
                    .map(|r| r.role.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn append_ledger_entry(
        &self,
        tenant_id: Option<String>,
        entry_type: LedgerEntryType,
        decision_id: Option<String>,
        event_seq: Option<u64>,
        snapshot_up_to_seq: Option<u64>,
        anchor_seq: Option<u64>,
        payload: Value,
        at: Timestamp,
        signature: Option<(String, String, String)>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut tables = self.tables.write();
        let seq = tables.ledger.last().map(|e| e.seq + 1).unwrap_or(1);
        let prev_hash = tables.ledger.last().map(|e| e.hash.clone());
        let hash = LedgerEntry::compute_hash(
            seq,
            &at,
            &tenant_id,
            entry_type,
            &decision_id,
            &event_seq,
            &snapshot_up_to_seq,
            &anchor_seq,
            &payload,
            &prev_hash,
        );
        let (sig_alg, key_id, sig) = match signature {
            Some((alg, key_id, sig)) => (Some(alg), Some(key_id), Some(sig)),
            None => (None, None, None),
        };
        let entry = LedgerEntry {
            seq,
            at,
            tenant_id,
            entry_type,
            decision_id,
            event_seq,
            snapshot_up_to_seq,
            anchor_seq,
            payload,
            prev_hash,
            hash,
            sig_alg,
            key_id,
            sig,
        };
        tables.ledger.push(entry.clone());
        Ok(entry)
    }

    fn ledger_range(&self, tenant_id: Option<&str>, from_seq: u64, limit: usize) -> Vec<LedgerEntry> {
        self.tables
            .read()
            .ledger
            .iter()
            .filter(|e| e.seq >= from_seq)
            .filter(|e| tenant_id.map(|t| e.tenant_id.as_deref() == Some(t)).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    fn record_counterfactual_run(&self, run: CounterfactualRun) {
        self.tables.write().counterfactual_runs.push(run);
    }

    fn counterfactual_runs_for(&self, source_id: &str) -> Vec<CounterfactualRun> {
        self.tables
            .read()
            .counterfactual_runs
            .iter()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect()
    }

    fn backfill_hash_chains(&self) {
        let mut tables = self.tables.write();
        let decision_ids: Vec<String> = tables.events.keys().cloned().collect();
        for decision_id in decision_ids {
            let events = tables.events.get_mut(&decision_id).unwrap();
            events.sort_by_key(|r| r.seq);
            let mut prev_hash: Option<Hash> = None;
            for record in events.iter_mut() {
                if record.prev_hash.is_none() && prev_hash.is_some() {
                    record.prev_hash = prev_hash.clone();
                }
                let recomputed = record.recompute_hash();
                if record.hash != recomputed {
                    record.hash = recomputed;
                }
                prev_hash = Some(record.hash.clone());
            }
        }
    }

    fn seed_events(&self, decision_id: &str, records: Vec<EventRecord>) {
        let mut tables = self.tables.write();
        for record in &records {
            if let Some(key) = &record.idempotency_key {
                tables
                    .idempotency_index
                    .insert((decision_id.to_string(), key.clone()), record.seq);
            }
        }
        tables.events.insert(decision_id.to_string(), records);
    }
}

/// Compute the Merkle root over event hashes `1..=up_to_seq` for a
/// decision, honoring the "`None` if any leaf hash is missing" contract
/// from spec §4.7's `putSnapshot`.
pub fn merkle_root_up_to(store: &dyn DecisionStore, decision_id: &str, up_to_seq: u64) -> Option<Hash> {
    let mut leaves = Vec::with_capacity(up_to_seq as usize);
    for seq in 1..=up_to_seq {
        leaves.push(store.event_at(decision_id, seq)?.hash);
    }
    merkle_root(&leaves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_ledger_spec::events::{ActorType, DecisionEventKind};

    fn sample_event() -> DecisionEvent {
        DecisionEvent {
            kind: DecisionEventKind::Validate,
            actor_id: Some("alice".to_string()),
            actor_type: Some(ActorType::Human),
            meta: Default::default(),
            trust: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn append_event_chains_prev_hash() {
        let store = InMemoryStore::new();
        let r1 = store
            .append_event("d1", sample_event(), Timestamp::from_millis_epoch(0), None)
            .unwrap();
        let r2 = store
            .append_event("d1", sample_event(), Timestamp::from_millis_epoch(1), None)
            .unwrap();
        assert_eq!(r1.seq, 1);
        assert_eq!(r2.seq, 2);
        assert!(r1.prev_hash.is_none());
        assert_eq!(r2.prev_hash, Some(r1.hash));
    }

    #[test]
    fn idempotency_key_returns_existing_record() {
        let store = InMemoryStore::new();
        let r1 = store
            .append_event(
                "d1",
                sample_event(),
                Timestamp::from_millis_epoch(0),
                Some("k1".to_string()),
            )
            .unwrap();
        let r2 = store
            .append_event(
                "d1",
                sample_event(),
                Timestamp::from_millis_epoch(5),
                Some("k1".to_string()),
            )
            .unwrap();
        assert_eq!(r1.seq, r2.seq);
        assert_eq!(store.latest_seq("d1"), 1);
    }

    #[test]
    fn concurrent_modification_rejected_on_version_mismatch() {
        let store = InMemoryStore::new();
        let d = Decision::genesis("d1", Timestamp::from_millis_epoch(0), Default::default());
        store.save_decision(d.clone(), None).unwrap();
        let mut bumped = d.clone();
        bumped.version = 1;
        let err = store.save_decision(bumped, Some(5)).unwrap_err();
        assert_eq!(err.code(), "CONCURRENT_MODIFICATION");
    }

    #[test]
    fn anchor_chain_links_across_decisions() {
        let store = InMemoryStore::new();
        for id in ["d1", "d2"] {
            let rec = store
                .append_event(id, sample_event(), Timestamp::from_millis_epoch(0), None)
                .unwrap();
            let decision = Decision::genesis(id, Timestamp::from_millis_epoch(0), Default::default());
            let snapshot = Snapshot {
                decision_id: id.to_string(),
                up_to_seq: 1,
                state_hash: tamper_hash(&decision),
                checkpoint_hash: Some(rec.hash.clone()),
                root_hash: merkle_root(&[rec.hash.clone()]),
                provenance_tail_hash: None,
                decision,
                created_at: Timestamp::from_millis_epoch(0),
            };
            store.put_snapshot(snapshot).unwrap();
        }
        let a1 = store.append_anchor("d1", 1, Timestamp::from_millis_epoch(1)).unwrap();
        let a2 = store.append_anchor("d2", 1, Timestamp::from_millis_epoch(2)).unwrap();
        assert_eq!(a1.seq, 1);
        assert_eq!(a2.seq, 2);
        assert_eq!(a2.prev_hash, Some(a1.hash));
    }
}
