//! Disk-backed `DecisionStore`, grounded on the teacher's
//! `PersistentAppendLog`: a checksummed, length-prefixed write-ahead log
//! that every mutation is appended to before the in-memory tables are
//! updated, replayed in full on `open` to rebuild those tables. Segment
//! compaction folds the WAL into a segments file once it grows past a
//! configurable size, exactly as the teacher's log does for envelopes.

use crate::errors::StoreError;
use crate::records::{
    Anchor, CounterfactualRun, DecisionRole, EdgeRecord, EventRecord, LedgerEntry,
    LedgerEntryType, LiabilityReceipt, PlsShield, Snapshot,
};
use crate::store::{DecisionStore, InMemoryStore, StoreTables};
use anyhow::Context;
use decision_ledger_spec::{Decision, DecisionEvent, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const CHECKSUM_DOMAIN: &[u8] = b"decision-ledger:wal:v1";
const DEFAULT_COMPACT_THRESHOLD: usize = 1024;

/// Every mutation the store performs, in replayable form. One variant per
/// `DecisionStore` write operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoreRecord {
    SaveDecision {
        decision: Decision,
    },
    AppendEvent {
        decision_id: String,
        event: DecisionEvent,
        at: Timestamp,
        idempotency_key: Option<String>,
    },
    PutSnapshot {
        snapshot: Snapshot,
    },
    PruneSnapshots {
        decision_id: String,
        keep: usize,
    },
    AppendAnchor {
        decision_id: String,
        snapshot_up_to_seq: u64,
        at: Timestamp,
    },
    PruneAnchors {
        keep: usize,
    },
    InsertReceipt {
        receipt: LiabilityReceipt,
    },
    InsertPlsShield {
        shield: PlsShield,
    },
    InsertEdge {
        edge: EdgeRecord,
    },
    UpsertRole {
        role: DecisionRole,
    },
    AppendLedgerEntry {
        tenant_id: Option<String>,
        entry_type: LedgerEntryType,
        decision_id: Option<String>,
        event_seq: Option<u64>,
        snapshot_up_to_seq: Option<u64>,
        anchor_seq: Option<u64>,
        payload: Value,
        at: Timestamp,
        signature: Option<(String, String, String)>,
    },
    RecordCounterfactualRun {
        run: CounterfactualRun,
    },
}

fn checksum(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(CHECKSUM_DOMAIN);
    hasher.update(bytes);
    hasher.finalize().into()
}

fn read_records(path: &Path) -> anyhow::Result<Vec<StoreRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut cursor = 0usize;
    let mut out = Vec::new();
    while cursor < buf.len() {
        if cursor + 4 > buf.len() {
            anyhow::bail!("truncated record length in {}", path.display());
        }
        let len = u32::from_be_bytes(buf[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + 32 + len > buf.len() {
            anyhow::bail!("truncated record body in {}", path.display());
        }
        let expected: [u8; 32] = buf[cursor..cursor + 32].try_into().unwrap();
        cursor += 32;
        let payload = &buf[cursor..cursor + len];
        cursor += len;
        if checksum(payload) != expected {
            anyhow::bail!("checksum mismatch in {}", path.display());
        }
        let record: StoreRecord =
            serde_json::from_slice(payload).context("failed to decode WAL record")?;
        out.push(record);
    }
    Ok(out)
}

fn write_record(file: &mut File, record: &StoreRecord) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec(record).context("failed to serialize WAL record")?;
    let digest = checksum(&bytes);
    file.write_all(&(bytes.len() as u32).to_be_bytes())?;
    file.write_all(&digest)?;
    file.write_all(&bytes)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

fn apply_record(tables: &InMemoryStore, record: StoreRecord) -> anyhow::Result<()> {
    match record {
        StoreRecord::SaveDecision { decision } => {
            tables.save_decision(decision, None).map_err(to_anyhow)?;
        }
        StoreRecord::AppendEvent {
            decision_id,
            event,
            at,
            idempotency_key,
        } => {
            tables
                .append_event(&decision_id, event, at, idempotency_key)
                .map_err(to_anyhow)?;
        }
        StoreRecord::PutSnapshot { snapshot } => {
            tables.put_snapshot(snapshot).map_err(to_anyhow)?;
        }
        StoreRecord::PruneSnapshots { decision_id, keep } => {
            tables.prune_snapshots(&decision_id, keep);
        }
        StoreRecord::AppendAnchor {
            decision_id,
            snapshot_up_to_seq,
            at,
        } => {
            tables
                .append_anchor(&decision_id, snapshot_up_to_seq, at)
                .map_err(to_anyhow)?;
        }
        StoreRecord::PruneAnchors { keep } => tables.prune_anchors(keep),
        StoreRecord::InsertReceipt { receipt } => {
            tables.insert_receipt(receipt).map_err(to_anyhow)?;
        }
        StoreRecord::InsertPlsShield { shield } => {
            tables.insert_pls_shield(shield).map_err(to_anyhow)?;
        }
        StoreRecord::InsertEdge { edge } => tables.insert_edge(edge),
        StoreRecord::UpsertRole { role } => tables.upsert_role(role),
        StoreRecord::AppendLedgerEntry {
            tenant_id,
            entry_type,
            decision_id,
            event_seq,
            snapshot_up_to_seq,
            anchor_seq,
            payload,
            at,
            signature,
        } => {
            tables
                .append_ledger_entry(
                    tenant_id,
                    entry_type,
                    decision_id,
                    event_seq,
                    snapshot_up_to_seq,
                    anchor_seq,
                    payload,
                    at,
                    signature,
                )
                .map_err(to_anyhow)?;
        }
        StoreRecord::RecordCounterfactualRun { run } => tables.record_counterfactual_run(run),
    }
    Ok(())
}

fn to_anyhow(e: StoreError) -> anyhow::Error {
    anyhow::anyhow!(e.to_string())
}

/// Disk-backed `DecisionStore`. All tables are held in memory (in an
/// `InMemoryStore`) for fast reads; every mutation is additionally
/// appended to a checksummed WAL before returning, and replayed on open.
pub struct PersistentStore {
    memory: InMemoryStore,
    wal: Mutex<File>,
    segments: Mutex<File>,
    wal_path: PathBuf,
    segments_path: PathBuf,
    compact_threshold: usize,
    record_count_since_compaction: Mutex<usize>,
}

impl PersistentStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        Self::open_with_compact_threshold(dir, DEFAULT_COMPACT_THRESHOLD)
    }

    pub fn open_with_compact_threshold<P: AsRef<Path>>(
        dir: P,
        compact_threshold: usize,
    ) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let wal_path = dir.join("store.wal");
        let segments_path = dir.join("store.segments");

        let mut records = read_records(&segments_path)?;
        records.extend(read_records(&wal_path)?);

        let memory = InMemoryStore::from_tables(StoreTables::default());
        for record in records {
            apply_record(&memory, record)?;
        }
        memory.backfill_hash_chains();

        let wal = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&wal_path)
            .with_context(|| format!("failed to open {}", wal_path.display()))?;
        let segments = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&segments_path)
            .with_context(|| format!("failed to open {}", segments_path.display()))?;

        Ok(PersistentStore {
            memory,
            wal: Mutex::new(wal),
            segments: Mutex::new(segments),
            wal_path,
            segments_path,
            compact_threshold: compact_threshold.max(1),
            record_count_since_compaction: Mutex::new(0),
        })
    }

    fn commit(&self, record: StoreRecord) -> Result<(), StoreError> {
        {
            let mut wal = self.wal.lock();
            write_record(&mut wal, &record)?;
        }
        apply_record(&self.memory, record).map_err(StoreError::from)?;
        let mut count = self.record_count_since_compaction.lock();
        *count += 1;
        if *count >= self.compact_threshold {
            drop(count);
            self.compact()?;
        }
        Ok(())
    }

    fn compact(&self) -> Result<(), StoreError> {
        let wal_bytes = fs::read(&self.wal_path).unwrap_or_default();
        if wal_bytes.is_empty() {
            return Ok(());
        }
        {
            let mut segments = self.segments.lock();
            segments.write_all(&wal_bytes)?;
            segments.sync_all()?;
        }
        {
            let mut wal = self.wal.lock();
            wal.set_len(0)?;
            wal.seek(SeekFrom::End(0))?;
            wal.sync_all()?;
        }
        *self.record_count_since_compaction.lock() = 0;
        Ok(())
    }

    pub fn storage_usage_bytes(&self) -> u64 {
        let wal = fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);
        let seg = fs::metadata(&self.segments_path).map(|m| m.len()).unwrap_or(0);
        wal + seg
    }
}

impl DecisionStore for PersistentStore {
    fn get_decision(&self, decision_id: &str) -> Option<Decision> {
        self.memory.get_decision(decision_id)
    }

    fn get_version(&self, decision_id: &str) -> Option<u64> {
        self.memory.get_version(decision_id)
    }

    fn save_decision(&self, decision: Decision, expected_version: Option<u64>) -> Result<(), StoreError> {
        if let Some(expected) = expected_version {
            let found = self.memory.get_version(&decision.id).unwrap_or(0);
            if found != expected {
                return Err(StoreError::ConcurrentModification {
                    decision_id: decision.id,
                    expected,
                    found,
                });
            }
        }
        self.commit(StoreRecord::SaveDecision { decision })
    }

    fn latest_seq(&self, decision_id: &str) -> u64 {
        self.memory.latest_seq(decision_id)
    }

    fn events_from(&self, decision_id: &str, from_seq: u64) -> Vec<EventRecord> {
        self.memory.events_from(decision_id, from_seq)
    }

    fn event_at(&self, decision_id: &str, seq: u64) -> Option<EventRecord> {
        self.memory.event_at(decision_id, seq)
    }

    fn find_by_idempotency_key(&self, decision_id: &str, key: &str) -> Option<EventRecord> {
        self.memory.find_by_idempotency_key(decision_id, key)
    }

    fn append_event(
        &self,
        decision_id: &str,
        event: DecisionEvent,
        at: Timestamp,
        idempotency_key: Option<String>,
    ) -> Result<EventRecord, StoreError> {
        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.memory.find_by_idempotency_key(decision_id, key) {
                return Ok(existing);
            }
        }
        self.commit(StoreRecord::AppendEvent {
            decision_id: decision_id.to_string(),
            event: event.clone(),
            at: at.clone(),
            idempotency_key: idempotency_key.clone(),
        })?;
        self.memory
            .find_by_idempotency_key(decision_id, idempotency_key.as_deref().unwrap_or(""))
            .or_else(|| {
                let seq = self.memory.latest_seq(decision_id);
                self.memory.event_at(decision_id, seq)
            })
            .ok_or_else(|| anyhow::anyhow!("append_event: record vanished after commit").into())
    }

    fn put_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        self.commit(StoreRecord::PutSnapshot { snapshot })
    }

    fn latest_snapshot(&self, decision_id: &str) -> Option<Snapshot> {
        self.memory.latest_snapshot(decision_id)
    }

    fn snapshot_at_or_before(&self, decision_id: &str, seq: u64) -> Option<Snapshot> {
        self.memory.snapshot_at_or_before(decision_id, seq)
    }

    fn prune_snapshots(&self, decision_id: &str, keep: usize) {
        let _ = self.commit(StoreRecord::PruneSnapshots {
            decision_id: decision_id.to_string(),
            keep,
        });
    }

    fn append_anchor(&self, decision_id: &str, snapshot_up_to_seq: u64, at: Timestamp) -> Result<Anchor, StoreError> {
        self.commit(StoreRecord::AppendAnchor {
            decision_id: decision_id.to_string(),
            snapshot_up_to_seq,
            at,
        })?;
        self.memory
            .anchor_for(decision_id, snapshot_up_to_seq)
            .ok_or_else(|| anyhow::anyhow!("append_anchor: anchor vanished after commit").into())
    }

    fn latest_anchor(&self) -> Option<Anchor> {
        self.memory.latest_anchor()
    }

    fn anchor_for(&self, decision_id: &str, snapshot_up_to_seq: u64) -> Option<Anchor> {
        self.memory.anchor_for(decision_id, snapshot_up_to_seq)
    }

    fn all_anchors(&self) -> Vec<Anchor> {
        self.memory.all_anchors()
    }

    fn prune_anchors(&self, keep: usize) {
        let _ = self.commit(StoreRecord::PruneAnchors { keep });
    }

    fn insert_receipt(&self, receipt: LiabilityReceipt) -> Result<(), StoreError> {
        self.commit(StoreRecord::InsertReceipt { receipt })
    }

    fn latest_receipt(&self, decision_id: &str) -> Option<LiabilityReceipt> {
        self.memory.latest_receipt(decision_id)
    }

    fn receipt_at(&self, decision_id: &str, event_seq: u64) -> Option<LiabilityReceipt> {
        self.memory.receipt_at(decision_id, event_seq)
    }

    fn receipts_for(&self, decision_id: &str) -> Vec<LiabilityReceipt> {
        self.memory.receipts_for(decision_id)
    }

    fn insert_pls_shield(&self, shield: PlsShield) -> Result<(), StoreError> {
        self.commit(StoreRecord::InsertPlsShield { shield })
    }

    fn pls_shields_for(&self, decision_id: &str) -> Vec<PlsShield> {
        self.memory.pls_shields_for(decision_id)
    }

    fn insert_edge(&self, edge: EdgeRecord) {
        let _ = self.commit(StoreRecord::InsertEdge { edge });
    }

    fn edges_for(&self, decision_id: &str) -> Vec<EdgeRecord> {
        self.memory.edges_for(decision_id)
    }

    fn upsert_role(&self, role: DecisionRole) {
        let _ = self.commit(StoreRecord::UpsertRole { role });
    }

    fn roles_for(&self, decision_id: &str, actor_id: &str) -> Vec<String> {
        self.memory.roles_for(decision_id, actor_id)
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
        self.commit(StoreRecord::AppendLedgerEntry {
            tenant_id: tenant_id.clone(),
            entry_type,
            decision_id: decision_id.clone(),
            event_seq,
            snapshot_up_to_seq,
            anchor_seq,
            payload: payload.clone(),
            at,
            signature,
        })?;
        self.memory
            .ledger_range(tenant_id.as_deref(), 1, usize::MAX)
            .into_iter()
            .last()
            .ok_or_else(|| anyhow::anyhow!("append_ledger_entry: entry vanished after commit").into())
    }

    fn ledger_range(&self, tenant_id: Option<&str>, from_seq: u64, limit: usize) -> Vec<LedgerEntry> {
        self.memory.ledger_range(tenant_id, from_seq, limit)
    }

    fn record_counterfactual_run(&self, run: CounterfactualRun) {
        let _ = self.commit(StoreRecord::RecordCounterfactualRun { run });
    }

    fn counterfactual_runs_for(&self, source_id: &str) -> Vec<CounterfactualRun> {
        self.memory.counterfactual_runs_for(source_id)
    }

    fn backfill_hash_chains(&self) {
        self.memory.backfill_hash_chains();
    }

    fn seed_events(&self, decision_id: &str, records: Vec<EventRecord>) {
        self.memory.seed_events(decision_id, records);
    }
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
    fn recovers_events_and_decision_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = PersistentStore::open(dir.path()).unwrap();
            let decision = Decision::genesis("d1", Timestamp::from_millis_epoch(0), Default::default());
            store.save_decision(decision, None).unwrap();
            store
                .append_event("d1", sample_event(), Timestamp::from_millis_epoch(0), None)
                .unwrap();
            store
                .append_event("d1", sample_event(), Timestamp::from_millis_epoch(1), None)
                .unwrap();
        }
        let reopened = PersistentStore::open(dir.path()).unwrap();
        assert!(reopened.get_decision("d1").is_some());
        assert_eq!(reopened.latest_seq("d1"), 2);
        assert!(reopened.event_at("d1", 1).unwrap().prev_hash.is_none());
        assert_eq!(
            reopened.event_at("d1", 2).unwrap().prev_hash,
            Some(reopened.event_at("d1", 1).unwrap().hash)
        );
    }

    #[test]
    fn compacts_wal_into_segments_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistentStore::open_with_compact_threshold(dir.path(), 2).unwrap();
        for i in 0..5 {
            store
                .append_event(
                    "d1",
                    sample_event(),
                    Timestamp::from_millis_epoch(i),
                    None,
                )
                .unwrap();
        }
        let wal_len = fs::metadata(dir.path().join("store.wal")).unwrap().len();
        assert!(wal_len < 200, "expected WAL to be small after compaction, got {wal_len} bytes");
        assert_eq!(store.latest_seq("d1"), 5);
    }
}
