//! `apply_event`: the decision engine's single entry point. Orchestrates
//! normalization, gates, the state transition, side-effect mutation,
//! obligation re-evaluation, provenance, the liability receipt, and the
//! optional Personal Liability Shield, in the fixed order laid out across
//! the state machine, policy, obligation, and provenance modules.

use crate::errors::StoreError;
use crate::merkle::merkle_root_up_to;
use crate::policy_engine::{
    default_policies, evaluate_compliance_rules, rbac_gate, trust_boundary_check, workflow_gate,
    SlaBlockMode,
};
use crate::records::{EventRecord, LiabilityReceipt, PlsShield};
use crate::signing::sign_hash;
use crate::store::DecisionStore;
use decision_ledger_spec::decision::RiskRecord;
use decision_ledger_spec::events::ActorType;
use decision_ledger_spec::obligations::{Obligation, ObligationStatus};
use decision_ledger_spec::policy::PolicyOutcome;
use decision_ledger_spec::provenance::ProvenanceNodeInput;
use decision_ledger_spec::state_machine::EventType;
use decision_ledger_spec::{
    hash_value, normalize_event, public_hash, tamper_hash, ApprovalGate, Clock, Decision,
    DecisionEdge, DecisionEvent, DecisionEventKind, DecisionState, EngineError, GateKind,
    GateReport, Policy, Timestamp, Violation, WorkflowTemplate, ENGINE_VERSION,
};
use ed25519_dalek::SigningKey;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Options threaded through every `apply_event` call. Nothing here is read
/// from process-wide state (spec §9: "engine options... should be
/// threaded, never read from process-wide state").
pub struct EngineOptions {
    pub policies: Vec<Box<dyn Policy>>,
    pub approval_gate: Option<Box<dyn ApprovalGate>>,
    pub compliance_rules: Vec<decision_ledger_spec::ComplianceRule>,
    pub workflow_template: Option<WorkflowTemplate>,
    pub workflow_bypass: bool,
    pub rbac_bypass: bool,
    pub locked_allowlist: Vec<EventType>,
    pub dispute_allowlist: Vec<EventType>,
    /// Signing keys available to the engine for SIGN events, keyed by
    /// `key_id`. The engine never generates or stores private key
    /// material itself; these are handed in by the caller.
    pub signing_keys: HashMap<String, SigningKey>,
    pub engine_version: &'static str,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            policies: default_policies(SlaBlockMode::ApproveOnly),
            approval_gate: None,
            compliance_rules: Vec::new(),
            workflow_template: Some(WorkflowTemplate::basic_approval()),
            workflow_bypass: false,
            rbac_bypass: false,
            locked_allowlist: decision_ledger_spec::LOCKED_ALLOWLIST.to_vec(),
            dispute_allowlist: decision_ledger_spec::LOCKED_ALLOWLIST.to_vec(),
            signing_keys: HashMap::new(),
            engine_version: ENGINE_VERSION,
        }
    }
}

#[derive(Debug, Error, Clone)]
#[error("{violation}")]
pub struct ApplyError {
    pub violation: Violation,
    pub gate_reports: Vec<GateReport>,
}

impl ApplyError {
    fn plain(violation: Violation) -> Self {
        ApplyError {
            violation,
            gate_reports: Vec::new(),
        }
    }

    fn gated(violation: Violation, report: GateReport) -> Self {
        ApplyError {
            violation,
            gate_reports: vec![report],
        }
    }

    pub fn code(&self) -> &str {
        &self.violation.code
    }
}

impl From<EngineError> for ApplyError {
    fn from(e: EngineError) -> Self {
        ApplyError::plain(e.into_violation())
    }
}

impl From<StoreError> for ApplyError {
    fn from(e: StoreError) -> Self {
        ApplyError::plain(Violation::block(e.code(), e.to_string()))
    }
}

pub struct ApplyOutcome {
    pub decision: Decision,
    pub warnings: Vec<Violation>,
    pub gate_reports: Vec<GateReport>,
    pub event_record: EventRecord,
    pub receipt: LiabilityReceipt,
    pub pls_shield: Option<PlsShield>,
}

/// The per-event-type target state for the idempotent-same-state set
/// (spec §4.2): re-applying VALIDATE/SIMULATE/EXPLAIN from the state they
/// already produce is a no-op, not an INVALID_TRANSITION.
fn idempotent_target_state(event_type: EventType) -> Option<DecisionState> {
    match event_type {
        EventType::Validate => Some(DecisionState::Validated),
        EventType::Simulate => Some(DecisionState::Simulated),
        EventType::Explain => Some(DecisionState::Explained),
        _ => None,
    }
}

/// A simple, deterministic function of actor type, event type, and whether
/// a trust envelope was attached (spec §4.9: "trust score... a simple
/// function of actor_type, event_type, presence of trust envelope").
fn compute_trust_score(event: &DecisionEvent) -> (f64, String) {
    let mut score = 0.5;
    let mut reasons = Vec::new();
    match event.actor_type {
        Some(ActorType::Human) => {
            score += 0.3;
            reasons.push("human actor".to_string());
        }
        Some(ActorType::Service) => {
            score += 0.15;
            reasons.push("service actor".to_string());
        }
        Some(ActorType::System) => {
            reasons.push("system actor".to_string());
        }
        Some(ActorType::Agent) => {
            score -= 0.2;
            reasons.push("agent actor".to_string());
        }
        None => reasons.push("actor type unknown".to_string()),
    }
    if matches!(event.event_type(), EventType::Approve | EventType::Reject) {
        score += 0.1;
        reasons.push("finalizing event".to_string());
    }
    if event.trust.is_some() {
        score += 0.15;
        reasons.push("trust envelope present".to_string());
    }
    (score.clamp(0.0, 1.0), reasons.join("; "))
}

/// Deep-merge `patch` into `target`: objects merge key by key, recursing
/// into nested objects; any other value type in `patch` overwrites.
fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                deep_merge(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target_slot, patch_value) => {
            *target_slot = patch_value.clone();
        }
    }
}

/// Apply the kind-specific side effects of one event onto `next` (spec
/// §4.6 steps 7-10). Returns any non-fatal warnings (e.g. a reference to
/// an obligation id that does not exist).
fn apply_side_effects(
    next: &mut Decision,
    event: &DecisionEvent,
    now: &Timestamp,
    violation_seq: &mut u64,
) -> Vec<Violation> {
    let mut warnings = Vec::new();
    let mut next_violation_id = || {
        *violation_seq += 1;
        format!("auto-{}-{}", next.id, violation_seq)
    };

    match &event.kind {
        DecisionEventKind::Validate
        | DecisionEventKind::Simulate
        | DecisionEventKind::Explain => {}
        DecisionEventKind::Approve { reason } | DecisionEventKind::Reject { reason } => {
            if let Some(reason) = reason {
                next.artifacts
                    .extra
                    .insert("decision_reason".to_string(), Value::String(reason.clone()));
            }
        }
        DecisionEventKind::AttachArtifacts {
            explain,
            risk,
            margin,
            extra,
        } => {
            if let Some(explain) = explain {
                next.artifacts.explain = Some(explain.clone());
            }
            if let Some(risk) = risk {
                next.artifacts.risk = Some(risk.clone());
            }
            if let Some(margin) = margin {
                next.artifacts.margin = Some(margin.clone());
            }
            let mut current = Value::Object(next.artifacts.extra.clone());
            deep_merge(&mut current, &Value::Object(extra.clone()));
            if let Value::Object(merged) = current {
                next.artifacts.extra = merged;
            }
        }
        DecisionEventKind::Sign { key_id, .. } => {
            next.signatures.retain(|s| &s.key_id != key_id);
            // The actual signature is computed by the caller in `engine::apply_event`
            // once the full `next` state (minus this signature) is known; a
            // placeholder is not installed here.
            let _ = key_id;
        }
        DecisionEventKind::IngestRecords { records } => {
            let entry = next
                .artifacts
                .extra
                .entry("ingested_records".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = entry {
                list.extend(records.iter().cloned());
            }
        }
        DecisionEventKind::LinkDecisions { .. } => {
            // Edge insertion happens in `engine::apply_event` once the event
            // sequence number is known.
        }
        DecisionEventKind::AttestExternal { statement, evidence } => {
            let entry = next
                .artifacts
                .extra
                .entry("external_attestations".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = entry {
                list.push(serde_json::json!({
                    "statement": statement,
                    "evidence": evidence,
                    "actor_id": event.actor_id,
                    "at": now,
                }));
            }
        }
        DecisionEventKind::EnterDispute { reason } => {
            next.artifacts.dispute.active = true;
            next.artifacts.dispute.reason = Some(reason.clone());
            next.artifacts.dispute.entered_at = Some(now.clone());
            next.artifacts.dispute.resolution = None;
            next.artifacts.dispute.resolved_at = None;
        }
        DecisionEventKind::ExitDispute { resolution } => {
            next.artifacts.dispute.active = false;
            next.artifacts.dispute.resolution = Some(resolution.clone());
            next.artifacts.dispute.resolved_at = Some(now.clone());
        }
        DecisionEventKind::AddObligation { obligation } => {
            let record = Obligation {
                id: obligation.id.clone(),
                title: obligation.title.clone(),
                description: obligation.description.clone(),
                owner: obligation.owner.clone(),
                created_at: now.clone(),
                due_at: obligation.due_at.clone(),
                grace_seconds: obligation.grace_seconds,
                severity: obligation.severity,
                status: ObligationStatus::Open,
                fulfilled_at: None,
                waived_at: None,
                waived_reason: None,
                proof: None,
                tags: obligation.tags.clone(),
            };
            if let Some(existing) = next.artifacts.execution.find_obligation_mut(&record.id) {
                *existing = record;
            } else {
                next.artifacts.execution.obligations.push(record);
            }
        }
        DecisionEventKind::FulfillObligation { obligation_id, proof } => {
            match next.artifacts.execution.find_obligation_mut(obligation_id) {
                Some(obligation) => {
                    obligation.status = ObligationStatus::Fulfilled;
                    obligation.fulfilled_at = Some(now.clone());
                    obligation.proof = proof.clone();
                }
                None => warnings.push(Violation::warn(
                    "OBLIGATION_NOT_FOUND",
                    format!("no obligation with id {obligation_id}"),
                )),
            }
        }
        DecisionEventKind::WaiveObligation { obligation_id, reason } => {
            match next.artifacts.execution.find_obligation_mut(obligation_id) {
                Some(obligation) => {
                    obligation.status = ObligationStatus::Waived;
                    obligation.waived_at = Some(now.clone());
                    obligation.waived_reason = Some(reason.clone());
                }
                None => warnings.push(Violation::warn(
                    "OBLIGATION_NOT_FOUND",
                    format!("no obligation with id {obligation_id}"),
                )),
            }
        }
        DecisionEventKind::AttestExecution {
            obligation_id,
            statement,
            proof,
        } => {
            if let Some(obligation_id) = obligation_id {
                if let Some(obligation) = next.artifacts.execution.find_obligation_mut(obligation_id) {
                    obligation.status = ObligationStatus::Fulfilled;
                    obligation.fulfilled_at = Some(now.clone());
                    obligation.proof = proof.clone();
                } else {
                    warnings.push(Violation::warn(
                        "OBLIGATION_NOT_FOUND",
                        format!("no obligation with id {obligation_id}"),
                    ));
                }
            }
            let entry = next
                .artifacts
                .extra
                .entry("execution_attestations".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = entry {
                list.push(serde_json::json!({
                    "statement": statement,
                    "proof": proof,
                    "obligation_id": obligation_id,
                    "at": now,
                }));
            }
        }
        DecisionEventKind::SetRisk {
            owner,
            severity,
            rollback_plan,
        } => {
            let risk = next.risk.get_or_insert_with(RiskRecord::default);
            risk.owner = Some(owner.clone());
            risk.severity = Some(*severity);
            for item in rollback_plan {
                if !risk.rollback_plan.contains(item) {
                    risk.rollback_plan.push(item.clone());
                }
            }
        }
        DecisionEventKind::AddBlastRadius { items } => {
            let risk = next.risk.get_or_insert_with(RiskRecord::default);
            risk.blast_radius.extend(items.iter().cloned());
        }
        DecisionEventKind::AddImpactedSystem { systems } => {
            let risk = next.risk.get_or_insert_with(RiskRecord::default);
            risk.impacted_systems.extend(systems.iter().cloned());
        }
        DecisionEventKind::SetRollbackPlan { plan } => {
            let risk = next.risk.get_or_insert_with(RiskRecord::default);
            for item in plan {
                if !risk.rollback_plan.contains(item) {
                    risk.rollback_plan.push(item.clone());
                }
            }
        }
        DecisionEventKind::AssignResponsibility { owner } => {
            let risk = next.risk.get_or_insert_with(RiskRecord::default);
            risk.owner = Some(owner.clone());
        }
        DecisionEventKind::AcceptRisk { accepted_by, note } => {
            let risk = next.risk.get_or_insert_with(RiskRecord::default);
            risk.accepted_by = Some(accepted_by.clone());
            risk.accepted_note = note.clone();
        }
        DecisionEventKind::SetTrustPolicy { policy } => {
            next.artifacts.trust.policy = Some(policy.clone());
        }
        DecisionEventKind::AssertTrustOrigin { zone } => {
            next.artifacts.trust.last_origin_zone = Some(zone.clone());
        }
        DecisionEventKind::AgentPropose { proposal } => {
            let entry = next
                .artifacts
                .extra
                .entry("agent_proposals".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = entry {
                list.push(proposal.clone());
            }
        }
        DecisionEventKind::AgentTriggerObligation { obligation_id } => {
            let entry = next
                .artifacts
                .extra
                .entry("agent_triggers".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = entry {
                list.push(Value::String(obligation_id.clone()));
            }
        }
        DecisionEventKind::SetAmount { amount, currency } => {
            next.meta.insert("amount".to_string(), serde_json::json!(amount));
            if let Some(currency) = currency {
                next.meta.insert("currency".to_string(), Value::String(currency.clone()));
            }
        }
        DecisionEventKind::SetObligations { obligations } => {
            next.artifacts.execution.obligations = obligations
                .iter()
                .map(|input| Obligation {
                    id: input.id.clone(),
                    title: input.title.clone(),
                    description: input.description.clone(),
                    owner: input.owner.clone(),
                    created_at: now.clone(),
                    due_at: input.due_at.clone(),
                    grace_seconds: input.grace_seconds,
                    severity: input.severity,
                    status: ObligationStatus::Open,
                    fulfilled_at: None,
                    waived_at: None,
                    waived_reason: None,
                    proof: None,
                    tags: input.tags.clone(),
                })
                .collect();
        }
        DecisionEventKind::AutoViolation {
            code,
            message,
            obligation_id,
        } => {
            let violation_id = next_violation_id();
            next.artifacts.execution.violations.push(
                decision_ledger_spec::ExecutionViolation {
                    violation_id,
                    code: code.clone(),
                    severity: decision_ledger_spec::obligations::Severity::Block,
                    message: message.clone(),
                    at: now.clone(),
                    obligation_id: obligation_id.clone(),
                    resolved_at: None,
                    resolved_by: None,
                    resolution_note: None,
                },
            );
        }
        DecisionEventKind::ResolveViolation {
            violation_id,
            resolution_note,
        } => {
            match next
                .artifacts
                .execution
                .violations
                .iter_mut()
                .find(|v| &v.violation_id == violation_id)
            {
                Some(violation) => {
                    violation.resolved_at = Some(now.clone());
                    violation.resolved_by = event.actor_id.clone();
                    violation.resolution_note = Some(resolution_note.clone());
                }
                None => warnings.push(Violation::warn(
                    "VIOLATION_NOT_FOUND",
                    format!("no violation with id {violation_id}"),
                )),
            }
        }
    }
    warnings
}

fn run_gates(
    store: &dyn DecisionStore,
    options: &EngineOptions,
    decision: &Decision,
    decision_id: &str,
    event: &DecisionEvent,
    now: &Timestamp,
) -> Result<(Vec<Violation>, Vec<GateReport>), ApplyError> {
    let mut warnings = Vec::new();
    let mut gate_reports = Vec::new();

    for policy in &options.policies {
        let outcome = policy.evaluate(decision, event);
        if let Some(block) = outcome.violations.iter().find(|v| v.severity.aborts()) {
            return Err(ApplyError::gated(
                block.clone(),
                GateReport::fail(GateKind::Policy, outcome.violations.clone()),
            ));
        }
        warnings.extend(outcome.violations);
    }

    let compliance = evaluate_compliance_rules(&options.compliance_rules, decision, event);
    if let Some(block) = compliance.violations.iter().find(|v| v.severity.aborts()) {
        return Err(ApplyError::gated(
            block.clone(),
            GateReport::fail(GateKind::Policy, compliance.violations.clone()),
        ));
    }
    warnings.extend(compliance.violations);

    let trust: PolicyOutcome = trust_boundary_check(decision, event, now);
    if let Some(block) = trust.violations.iter().find(|v| v.severity.aborts()) {
        return Err(ApplyError::gated(
            block.clone(),
            GateReport::fail(GateKind::Policy, trust.violations.clone()),
        ));
    }
    warnings.extend(trust.violations);

    let is_finalizing = matches!(event.event_type(), EventType::Approve | EventType::Reject);

    if is_finalizing {
        if let Some(gate) = &options.approval_gate {
            let outcome = gate.evaluate(decision, event);
            if let Some(block) = outcome.violations.iter().find(|v| v.severity.aborts()) {
                return Err(ApplyError::gated(
                    block.clone(),
                    GateReport::fail(GateKind::Policy, outcome.violations.clone()),
                ));
            }
            warnings.extend(outcome.violations);
        }

        let roles = store.roles_for(decision_id, event.actor_id.as_deref().unwrap_or(""));
        let rbac_report = rbac_gate(&roles, event, options.rbac_bypass);
        if !rbac_report.passed {
            let violation = rbac_report.violations[0].clone();
            return Err(ApplyError::gated(violation, rbac_report));
        }
        gate_reports.push(rbac_report);

        let workflow_report = workflow_gate(
            options.workflow_template.as_ref(),
            decision,
            event,
            options.workflow_bypass,
        );
        if !workflow_report.passed {
            let violation = workflow_report.violations[0].clone();
            return Err(ApplyError::gated(violation, workflow_report));
        }
        gate_reports.push(workflow_report);
    }

    Ok((warnings, gate_reports))
}

#[allow(clippy::too_many_arguments)]
pub fn apply_event(
    store: &dyn DecisionStore,
    clock: &dyn Clock,
    options: &EngineOptions,
    decision_id: &str,
    raw_event: Value,
    meta_if_create: Map<String, Value>,
    expected_version: Option<u64>,
    request_pls: bool,
) -> Result<ApplyOutcome, ApplyError> {
    let now = clock.now();

    let persisted = store.get_decision(decision_id);
    let decision = persisted
        .clone()
        .unwrap_or_else(|| Decision::genesis(decision_id, now.clone(), meta_if_create));

    if let (Some(persisted), Some(receipt)) = (&persisted, store.latest_receipt(decision_id)) {
        if public_hash(persisted) != receipt.public_state_after_hash {
            return Err(ApplyError::plain(Violation::block(
                "DECISION_PUBLIC_HASH_MISMATCH",
                "stored decision's public hash does not match the latest receipt",
            )));
        }
    }

    let event = normalize_event(raw_event)?;

    if let Some(key) = &event.idempotency_key {
        if let Some(existing) = store.find_by_idempotency_key(decision_id, key) {
            let current = store.get_decision(decision_id).unwrap_or_else(|| decision.clone());
            let receipt = store
                .receipt_at(decision_id, existing.seq)
                .ok_or_else(|| ApplyError::plain(Violation::block("RECEIPT_NOT_FOUND", "idempotent replay has no matching receipt")))?;
            let pls_shield = store
                .pls_shields_for(decision_id)
                .into_iter()
                .find(|s| s.event_seq == existing.seq);
            return Ok(ApplyOutcome {
                decision: current,
                warnings: Vec::new(),
                gate_reports: Vec::new(),
                event_record: existing,
                receipt,
                pls_shield,
            });
        }
    }

    if decision.artifacts.dispute.active && !options.dispute_allowlist.contains(&event.event_type()) {
        return Err(ApplyError::gated(
            Violation::block("DISPUTE_MODE_BLOCK", "decision is in dispute mode"),
            GateReport::fail(GateKind::StateMachine, vec![]),
        ));
    }

    if decision.artifacts.execution.has_open_block_violation() {
        let event_type = event.event_type();
        let referenced = decision.artifacts.execution.violations.iter().any(|v| {
            v.is_open()
                && matches!(v.severity, decision_ledger_spec::obligations::Severity::Block)
                && (v
                    .obligation_id
                    .as_deref()
                    .map(|id| event.kind.references_obligation_or_violation(id))
                    .unwrap_or(false)
                    || event.kind.references_obligation_or_violation(&v.violation_id))
        });
        if !event_type.is_remediation_allowed() && !referenced {
            return Err(ApplyError::gated(
                Violation::block("EXECUTION_BLOCKED", "an open BLOCK obligation violation exists"),
                GateReport::fail(GateKind::StateMachine, vec![]),
            ));
        }
    }

    let event_type = event.event_type();

    if decision.state.is_locked() && !options.locked_allowlist.contains(&event_type) {
        return Err(ApplyError::gated(
            Violation::block("LOCKED_DECISION", "decision is locked; only allowlisted events may apply"),
            GateReport::fail(GateKind::StateMachine, vec![]),
        ));
    }

    let computed_next = decision_ledger_spec::next_state(decision.state, event_type);
    let next_effective = match computed_next {
        Some(state) => state,
        None => {
            if event_type.is_state_changing() {
                if idempotent_target_state(event_type) == Some(decision.state) {
                    decision.state
                } else {
                    return Err(ApplyError::gated(
                        Violation::block("INVALID_TRANSITION", "event type cannot transition from the current state"),
                        GateReport::fail(GateKind::StateMachine, vec![]),
                    ));
                }
            } else {
                decision.state
            }
        }
    };

    let (warnings, gate_reports) = run_gates(store, options, &decision, decision_id, &event, &now)?;

    let mut next = decision.clone();
    let mut violation_seq = decision.artifacts.execution.violations.len() as u64;
    let mut side_effect_warnings = apply_side_effects(&mut next, &event, &now, &mut violation_seq);

    next.state = next_effective;
    next.updated_at = now.clone();

    let mut evaluation_counter = violation_seq;
    let next_id_for_counter = next.id.clone();
    next.artifacts.execution.evaluate(&now, &mut || {
        evaluation_counter += 1;
        format!("auto-{}-{}", next_id_for_counter, evaluation_counter)
    });

    let actor_type_str = event.actor_type.map(|t| t.as_str().to_string());
    next.accountability.record(event.actor_id.as_deref(), actor_type_str.as_deref());

    let record = store.append_event(decision_id, event.clone(), now.clone(), event.idempotency_key.clone())?;

    next.history.push(decision_ledger_spec::decision::HistoryEntry {
        seq: record.seq,
        at: now.clone(),
        event_type: event_type.as_str().to_string(),
        actor_id: event.actor_id.clone(),
        actor_type: actor_type_str.clone(),
        state_before: decision.state,
        state_after: next_effective,
        warnings: warnings.iter().cloned().chain(side_effect_warnings.drain(..)).collect(),
    });

    if let DecisionEventKind::Sign { key_id, .. } = &event.kind {
        let hash_to_sign = tamper_hash(&next);
        let signing_key = options.signing_keys.get(key_id).ok_or_else(|| {
            ApplyError::plain(Violation::block("SIGNER_ID_REQUIRED", format!("no signing key registered for {key_id}")))
        })?;
        let signature_hex = sign_hash(signing_key, &hash_to_sign);
        next.signatures.push(decision_ledger_spec::decision::DecisionSignature {
            key_id: key_id.clone(),
            signed_hash: hash_to_sign,
            signature_hex,
            idempotency_key: event.idempotency_key.clone(),
            created_at: now.clone(),
        });
    }

    if let DecisionEventKind::LinkDecisions { to_decision_id, relation } = &event.kind {
        let edge_hash = hash_value(&serde_json::json!({
            "from_decision_id": decision_id,
            "to_decision_id": to_decision_id,
            "relation": relation,
            "via_event_seq": record.seq,
        }));
        store.insert_edge(DecisionEdge {
            from_decision_id: decision_id.to_string(),
            to_decision_id: to_decision_id.clone(),
            relation: *relation,
            via_event_seq: record.seq,
            edge_hash,
            meta: event.meta.clone(),
            created_at: now.clone(),
        });
    }

    let state_before_hash = tamper_hash(&decision);

    let provenance_input = ProvenanceNodeInput {
        seq: record.seq,
        at: now.clone(),
        decision_id: decision_id.to_string(),
        event_type: event_type.as_str().to_string(),
        actor_id: event.actor_id.clone(),
        event_hash: hash_value(&event.sanitized_for_hash()),
        prev_node_id: None,
        prev_node_hash: None,
        state_before_hash: state_before_hash.clone(),
        state_after_hash: tamper_hash(&next),
        meta: event.meta.clone(),
    };
    next.artifacts.provenance.append(provenance_input);

    if let Err(err) = next.artifacts.provenance.verify() {
        return Err(ApplyError::plain(Violation::block(
            "PROVENANCE_TAMPERED",
            format!("provenance chain failed verification: {:?}", err.code),
        )));
    }

    let state_after_hash = tamper_hash(&next);
    let public_before_hash = public_hash(&decision);
    let public_after_hash = public_hash(&next);
    let obligations_hash = next.artifacts.execution.obligations_hash();
    let (trust_score, trust_reason) = compute_trust_score(&event);
    let receipt_id = format!("rcpt-{decision_id}-{}", record.seq);

    let receipt_hash = LiabilityReceipt::compute_hash(
        decision_id,
        record.seq,
        &receipt_id,
        event_type.as_str(),
        &event.actor_id,
        &actor_type_str,
        trust_score,
        &trust_reason,
        &state_before_hash,
        &state_after_hash,
        &public_before_hash,
        &public_after_hash,
        &obligations_hash,
        &now,
    );
    let receipt = LiabilityReceipt {
        decision_id: decision_id.to_string(),
        event_seq: record.seq,
        receipt_id,
        event_type: event_type.as_str().to_string(),
        actor_id: event.actor_id.clone(),
        actor_type: actor_type_str.clone(),
        trust_score,
        trust_reason,
        state_before_hash,
        state_after_hash,
        public_state_before_hash: public_before_hash,
        public_state_after_hash: public_after_hash,
        obligations_hash,
        created_at: now.clone(),
        receipt_hash,
    };
    store.insert_receipt(receipt.clone())?;

    let mut pls_shield = None;
    if request_pls && matches!(event_type, EventType::Approve | EventType::Reject) {
        let owner = next
            .risk
            .as_ref()
            .and_then(|r| r.owner.clone())
            .or_else(|| decision.accountability.owner.clone())
            .ok_or_else(|| ApplyError::plain(Violation::block("PLS_RESPONSIBILITY_REQUIRED", "no responsibility owner is recorded")))?;

        let approver_id = event
            .actor_id
            .clone()
            .ok_or_else(|| ApplyError::plain(Violation::block("PLS_APPROVER_REQUIRED", "event has no actor id to act as approver")))?;

        if let Some(claimed) = event.meta.get("approver_id").and_then(Value::as_str) {
            if claimed != approver_id {
                return Err(ApplyError::plain(Violation::block(
                    "PLS_APPROVER_ACTOR_MISMATCH",
                    "claimed approver_id does not match the event's actor_id",
                )));
            }
        }

        let signer_state_hash_str = event
            .meta
            .get("signer_state_hash")
            .and_then(Value::as_str)
            .ok_or_else(|| ApplyError::plain(Violation::block("PLS_SIGNER_STATE_HASH_REQUIRED", "meta.signer_state_hash is required to request a PLS shield")))?;
        let expected_state_hash = tamper_hash(&decision);
        if signer_state_hash_str != expected_state_hash.as_str() {
            return Err(ApplyError::plain(Violation::block(
                "PLS_SIGNER_STATE_HASH_MISMATCH",
                "meta.signer_state_hash does not match the tamper hash of the current decision",
            )));
        }

        let payload = serde_json::json!({ "event_meta": event.meta });
        let shield_hash = PlsShield::compute_hash(
            decision_id,
            record.seq,
            event_type.as_str(),
            &owner,
            &approver_id,
            &expected_state_hash,
            &receipt.receipt_hash,
            &payload,
            &now,
        );
        let shield = PlsShield {
            decision_id: decision_id.to_string(),
            event_seq: record.seq,
            event_type: event_type.as_str().to_string(),
            owner_id: owner,
            approver_id,
            signer_state_hash: expected_state_hash,
            payload,
            shield_hash: shield_hash.clone(),
            created_at: now.clone(),
        };
        store.insert_pls_shield(shield.clone())?;
        next.artifacts.liability_shield.last_shield_hash = Some(shield_hash);
        next.artifacts.liability_shield.count += 1;
        pls_shield = Some(shield);
    }

    next.version = decision.version + 1;
    store.save_decision(next.clone(), expected_version.or(Some(decision.version)))?;

    Ok(ApplyOutcome {
        decision: next,
        warnings,
        gate_reports,
        event_record: record,
        receipt,
        pls_shield,
    })
}

/// Snapshot helper used by `replay`/`store` callers: the Merkle root over
/// `1..=up_to_seq` for a decision, or `None` if any leaf is missing.
pub fn snapshot_root(store: &dyn DecisionStore, decision_id: &str, up_to_seq: u64) -> Option<decision_ledger_spec::Hash> {
    merkle_root_up_to(store, decision_id, up_to_seq)
}
