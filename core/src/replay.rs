//! Deterministic replay of a decision's event history: from-genesis
//! reconstruction, snapshot+delta rewind, and counterfactual branching
//! (spec §4.5/§4.10).
//!
//! Every replay path runs events back through `engine::apply_event` against
//! a private, throwaway `InMemoryStore` rather than re-deriving state by
//! hand — the same side-effect/obligation/provenance logic that produced
//! the original decision produces the replayed one, so the two can only
//! diverge where the inputs genuinely differ. Callers that already enforced
//! RBAC/workflow gates at original-apply time should pass `options` with
//! `rbac_bypass`/`workflow_bypass` set for replay: these passes recompute
//! state and hashes, not authorization.
//!
//! Replaying from genesis has one known gap: the `meta_if_create` seed
//! passed to the very first `apply_event` call is not itself part of the
//! persisted event log, so a from-genesis replay can only recover meta
//! fields that were later set by an event (`SET_AMOUNT`, `ATTACH_ARTIFACTS`,
//! ...). Callers that need exact fidelity should supply the original seed
//! via `genesis_meta`.

use crate::engine::{apply_event, ApplyError, EngineOptions};
use crate::records::{CounterfactualRun, EventRecord};
use crate::store::{DecisionStore, InMemoryStore};
use decision_ledger_spec::hashing::hash_value;
use decision_ledger_spec::{normalize_event, Clock, Decision, Hash, Violation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Sanity-checks a raw event sequence before it is handed to replay, the
/// way the teacher's `ReplayValidator::validate_sequence` walks an envelope
/// batch against a registry before any envelope is appended. This never
/// touches a store: it only confirms the batch is well-formed enough to be
/// worth replaying, so a malformed input fails fast with a precise index
/// rather than surfacing as a confusing mid-replay `INVALID_EVENT_TYPE`.
#[derive(Debug, Default)]
pub struct ReplayValidator;

impl ReplayValidator {
    pub fn new() -> Self {
        ReplayValidator
    }

    /// Validate that every raw event normalizes cleanly and that no
    /// idempotency key appears twice within the batch (a duplicate within
    /// one replay run can only mean the input was built incorrectly — the
    /// store would silently collapse it into a single applied event,
    /// masking the mistake). Returns the zero-based index and violation of
    /// the first offending event.
    pub fn validate_sequence(&self, raw_events: &[Value]) -> Result<(), (usize, Violation)> {
        let mut seen_keys = HashSet::new();
        for (index, raw) in raw_events.iter().enumerate() {
            let event = normalize_event(raw.clone()).map_err(|e| (index, e.into_violation()))?;
            if let Some(key) = &event.idempotency_key {
                if !seen_keys.insert(key.clone()) {
                    return Err((
                        index,
                        Violation::block(
                            "DUPLICATE_IDEMPOTENCY_KEY",
                            format!("idempotency key '{key}' appears more than once in this replay batch"),
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn event_to_raw(record: &EventRecord) -> Value {
    serde_json::to_value(&record.event).expect("a persisted DecisionEvent must serialize")
}

/// The result of replaying a sequence of events onto a starting decision:
/// the decision reached, the last seq that applied cleanly, and — if
/// replay stopped early — the seq it stopped at and why.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub decision: Decision,
    pub applied_through_seq: u64,
    pub stopped_at: Option<(u64, Violation)>,
}

/// Replay `delta_raw_events` onto `starting`, after seeding the shadow
/// store's event log with `prior_events` (already-verified records that
/// establish seq/hash-chain continuity without being re-applied). Stops at
/// the first event that fails to apply.
fn replay_delta(
    clock: &dyn Clock,
    options: &EngineOptions,
    decision_id: &str,
    starting: Decision,
    prior_events: Vec<EventRecord>,
    delta_raw_events: &[Value],
) -> ReplayOutcome {
    let shadow = InMemoryStore::new();
    shadow.seed_events(decision_id, prior_events);
    shadow
        .save_decision(starting.clone(), None)
        .expect("seeding a fresh shadow store's first decision cannot fail its version check");

    let mut current = starting;
    let mut applied_through_seq = shadow.latest_seq(decision_id);
    let mut stopped_at = None;

    if let Err((index, violation)) = ReplayValidator::new().validate_sequence(delta_raw_events) {
        return ReplayOutcome {
            decision: current,
            applied_through_seq,
            stopped_at: Some((applied_through_seq + 1 + index as u64, violation)),
        };
    }

    for raw in delta_raw_events {
        match apply_event(&shadow, clock, options, decision_id, raw.clone(), Map::new(), None, false) {
            Ok(outcome) => {
                applied_through_seq = outcome.event_record.seq;
                current = outcome.decision;
            }
            Err(err) => {
                stopped_at = Some((applied_through_seq + 1, err.violation));
                break;
            }
        }
    }

    ReplayOutcome {
        decision: current,
        applied_through_seq,
        stopped_at,
    }
}

fn rewind_decision_with_meta(
    store: &dyn DecisionStore,
    clock: &dyn Clock,
    options: &EngineOptions,
    decision_id: &str,
    target_seq: u64,
    genesis_meta: Map<String, Value>,
) -> ReplayOutcome {
    match store.snapshot_at_or_before(decision_id, target_seq) {
        Some(snapshot) => {
            let prior = store
                .events_from(decision_id, 1)
                .into_iter()
                .filter(|r| r.seq <= snapshot.up_to_seq)
                .collect::<Vec<_>>();
            let delta: Vec<Value> = store
                .events_from(decision_id, snapshot.up_to_seq + 1)
                .into_iter()
                .filter(|r| r.seq <= target_seq)
                .map(|r| event_to_raw(&r))
                .collect();
            replay_delta(clock, options, decision_id, snapshot.decision, prior, &delta)
        }
        None => {
            let genesis_at = store
                .event_at(decision_id, 1)
                .map(|r| r.at.clone())
                .unwrap_or_else(|| clock.now());
            let starting = Decision::genesis(decision_id, genesis_at, genesis_meta);
            let delta: Vec<Value> = store
                .events_from(decision_id, 1)
                .into_iter()
                .filter(|r| r.seq <= target_seq)
                .map(|r| event_to_raw(&r))
                .collect();
            replay_delta(clock, options, decision_id, starting, Vec::new(), &delta)
        }
    }
}

/// Replay a decision's complete event history from its latest snapshot (or
/// genesis, if none exists) through its current latest seq.
pub fn replay_decision(
    store: &dyn DecisionStore,
    clock: &dyn Clock,
    options: &EngineOptions,
    decision_id: &str,
    genesis_meta: Map<String, Value>,
) -> ReplayOutcome {
    let latest = store.latest_seq(decision_id);
    rewind_decision_with_meta(store, clock, options, decision_id, latest, genesis_meta)
}

/// Reconstruct a decision as of `target_seq`, using the nearest snapshot at
/// or before it plus the event delta, or from genesis if no snapshot covers
/// that far back.
pub fn rewind_decision(
    store: &dyn DecisionStore,
    clock: &dyn Clock,
    options: &EngineOptions,
    decision_id: &str,
    target_seq: u64,
    genesis_meta: Map<String, Value>,
) -> ReplayOutcome {
    rewind_decision_with_meta(store, clock, options, decision_id, target_seq, genesis_meta)
}

/// A counterfactual edit plan: replace specific seqs' raw events, optionally
/// truncate the history after a seq, and append new events at the tail.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CounterfactualEdit {
    pub replace: Vec<(u64, Value)>,
    pub truncate_after_seq: Option<u64>,
    #[serde(default)]
    pub append: Vec<Value>,
}

pub struct CounterfactualOutcome {
    pub counterfactual_id: Hash,
    pub baseline: Decision,
    pub replay: ReplayOutcome,
}

/// Replay `decision_id`'s history from genesis with `edits` applied, without
/// touching the live store. `counterfactual_id` is a pure function of the
/// source id, the edit plan, and the engine version (spec §9: "since it
/// participates in `counterfactual_id`, [the engine version] must be a
/// declared constant").
pub fn run_counterfactual(
    store: &dyn DecisionStore,
    clock: &dyn Clock,
    options: &EngineOptions,
    decision_id: &str,
    genesis_meta: Map<String, Value>,
    edits: &CounterfactualEdit,
) -> Result<CounterfactualOutcome, ApplyError> {
    let baseline = store.get_decision(decision_id).ok_or_else(|| {
        ApplyError::plain(Violation::block(
            "DECISION_NOT_FOUND",
            format!("no decision found for {decision_id}"),
        ))
    })?;

    let latest_seq = store.latest_seq(decision_id);
    let truncate_at = edits.truncate_after_seq.unwrap_or(latest_seq);
    let replacements: HashMap<u64, Value> = edits.replace.iter().cloned().collect();

    let mut raw_events: Vec<Value> = store
        .events_from(decision_id, 1)
        .into_iter()
        .filter(|r| r.seq <= truncate_at)
        .map(|r| replacements.get(&r.seq).cloned().unwrap_or_else(|| event_to_raw(&r)))
        .collect();
    raw_events.extend(edits.append.iter().cloned());

    let genesis_at = store
        .event_at(decision_id, 1)
        .map(|r| r.at.clone())
        .unwrap_or_else(|| clock.now());
    let starting = Decision::genesis(decision_id, genesis_at, genesis_meta);
    let replay = replay_delta(clock, options, decision_id, starting, Vec::new(), &raw_events);

    let counterfactual_id = hash_value(&serde_json::json!({
        "source_id": decision_id,
        "edits": edits,
        "engine_version": options.engine_version,
    }));

    Ok(CounterfactualOutcome {
        counterfactual_id,
        baseline,
        replay,
    })
}

/// Apply `planned_events` onto a brand new decision id in the live store,
/// tag it with `parent_id`, and record a `CounterfactualRun` audit row.
/// Unlike `run_counterfactual`, this persists: it is how a counterfactual
/// exploration becomes a real, independently auditable branch.
pub fn persist_counterfactual_branch(
    store: &dyn DecisionStore,
    clock: &dyn Clock,
    options: &EngineOptions,
    source_decision_id: &str,
    branch_decision_id: &str,
    planned_events: Vec<Value>,
) -> Result<Decision, ApplyError> {
    let mut branch = None;
    for raw in planned_events {
        let outcome = apply_event(store, clock, options, branch_decision_id, raw, Map::new(), None, false)?;
        branch = Some(outcome.decision);
    }
    let mut branch = branch.ok_or_else(|| {
        ApplyError::plain(Violation::block(
            "COUNTERFACTUAL_BRANCH_EMPTY",
            "no events supplied for the counterfactual branch",
        ))
    })?;

    let expected_version = branch.version;
    branch.parent_id = Some(source_decision_id.to_string());
    store.save_decision(branch.clone(), Some(expected_version))?;

    store.record_counterfactual_run(CounterfactualRun {
        counterfactual_id: hash_value(&serde_json::json!({
            "source_id": source_decision_id,
            "branch_id": branch_decision_id,
        })),
        source_id: source_decision_id.to_string(),
        branch_id: Some(branch_decision_id.to_string()),
        edits: Value::Null,
        created_at: clock.now(),
    });

    Ok(branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use decision_ledger_spec::DeterministicClock;
    use serde_json::json;

    fn options_for_replay() -> EngineOptions {
        let mut options = EngineOptions::default();
        options.rbac_bypass = true;
        options
    }

    fn build_sample(store: &InMemoryStore, clock: &DeterministicClock, options: &EngineOptions) {
        let mut meta = Map::new();
        meta.insert("title".to_string(), json!("T"));
        meta.insert("owner_id".to_string(), json!("o"));
        meta.insert("amount".to_string(), json!(100));

        apply_event(
            store, clock, options, "d1",
            json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"}),
            meta.clone(), None, false,
        )
        .unwrap();
        apply_event(
            store, clock, options, "d1",
            json!({"type": "SIMULATE", "actor_id": "alice", "actor_type": "human"}),
            meta.clone(), None, false,
        )
        .unwrap();
        apply_event(
            store, clock, options, "d1",
            json!({"type": "APPROVE", "actor_id": "alice", "actor_type": "human", "payload": {"reason": null}}),
            meta, None, false,
        )
        .unwrap();
    }

    #[test]
    fn replay_from_genesis_reaches_the_same_state() {
        let store = InMemoryStore::new();
        let clock = DeterministicClock::starting_at(1_735_689_600_000);
        let options = options_for_replay();
        build_sample(&store, &clock, &options);

        let live = store.get_decision("d1").unwrap();
        let outcome = replay_decision(&store, &clock, &options, "d1", Map::new());

        assert!(outcome.stopped_at.is_none());
        assert_eq!(outcome.decision.state, live.state);
        assert_eq!(outcome.decision.history.len(), live.history.len());
    }

    #[test]
    fn rewind_to_an_earlier_seq_stops_at_simulated() {
        let store = InMemoryStore::new();
        let clock = DeterministicClock::starting_at(1_735_689_600_000);
        let options = options_for_replay();
        build_sample(&store, &clock, &options);

        let outcome = rewind_decision(&store, &clock, &options, "d1", 2, Map::new());
        assert!(outcome.stopped_at.is_none());
        assert_eq!(outcome.decision.state, decision_ledger_spec::DecisionState::Simulated);
    }

    #[test]
    fn counterfactual_rejecting_instead_of_approving_diverges_from_baseline() {
        let store = InMemoryStore::new();
        let clock = DeterministicClock::starting_at(1_735_689_600_000);
        let options = options_for_replay();
        build_sample(&store, &clock, &options);

        let edits = CounterfactualEdit {
            replace: vec![(
                3,
                json!({"type": "REJECT", "actor_id": "alice", "actor_type": "human", "payload": {"reason": "changed mind"}}),
            )],
            truncate_after_seq: None,
            append: Vec::new(),
        };

        let outcome = run_counterfactual(&store, &clock, &options, "d1", Map::new(), &edits).unwrap();
        assert_eq!(outcome.baseline.state, decision_ledger_spec::DecisionState::Approved);
        assert_eq!(outcome.replay.decision.state, decision_ledger_spec::DecisionState::Rejected);
    }

    #[test]
    fn persisted_branch_carries_parent_id_and_records_a_run() {
        let store = InMemoryStore::new();
        let clock = DeterministicClock::starting_at(1_735_689_600_000);
        let options = options_for_replay();
        build_sample(&store, &clock, &options);

        let branch = persist_counterfactual_branch(
            &store, &clock, &options, "d1", "d1-branch-a",
            vec![json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"})],
        )
        .unwrap();

        assert_eq!(branch.parent_id.as_deref(), Some("d1"));
        assert_eq!(store.counterfactual_runs_for("d1").len(), 1);
    }

    #[test]
    fn replay_validator_accepts_a_well_formed_batch() {
        let events = vec![
            json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"}),
            json!({"type": "SIMULATE", "actor_id": "alice", "actor_type": "human"}),
        ];
        assert!(ReplayValidator::new().validate_sequence(&events).is_ok());
    }

    #[test]
    fn replay_validator_rejects_an_unrecognized_event_type() {
        let events = vec![
            json!({"type": "VALIDATE", "actor_id": "alice", "actor_type": "human"}),
            json!({"type": "NOT_A_REAL_EVENT", "actor_id": "alice", "actor_type": "human"}),
        ];
        let (index, _violation) = ReplayValidator::new().validate_sequence(&events).unwrap_err();
        assert_eq!(index, 1);
    }

    #[test]
    fn replay_validator_rejects_a_duplicate_idempotency_key_in_one_batch() {
        let events = vec![
            json!({
                "type": "VALIDATE", "actor_id": "alice", "actor_type": "human",
                "idempotency_key": "dup-1",
            }),
            json!({"type": "SIMULATE", "actor_id": "alice", "actor_type": "human"}),
            json!({
                "type": "APPROVE", "actor_id": "alice", "actor_type": "human",
                "payload": {"reason": null}, "idempotency_key": "dup-1",
            }),
        ];
        let (index, violation) = ReplayValidator::new().validate_sequence(&events).unwrap_err();
        assert_eq!(index, 2);
        assert_eq!(violation.code, "DUPLICATE_IDEMPOTENCY_KEY");
    }
}
