//! Concrete default policies, the compliance-rule evaluator, and the
//! RBAC/workflow/trust-boundary gates the engine composes on top of the
//! declarative shapes in `decision_ledger_spec::policy`.

use decision_ledger_spec::events::ActorType;
use decision_ledger_spec::policy::read_decision_path;
use decision_ledger_spec::{
    ComplianceRule, Decision, DecisionEvent, GateKind, GateReport, Policy, PolicyOutcome,
    Timestamp, Violation, WorkflowStep, WorkflowTemplate,
};
use decision_ledger_spec::state_machine::EventType;
use serde_json::Value;

/// Requires `meta.title`/`meta.owner_id` on VALIDATE (spec §4.3 default
/// policy 1).
pub struct RequiredFieldsPolicy;

impl Policy for RequiredFieldsPolicy {
    fn name(&self) -> &str {
        "required_fields"
    }

    fn evaluate(&self, decision: &Decision, event: &DecisionEvent) -> PolicyOutcome {
        if event.event_type() != EventType::Validate {
            return PolicyOutcome::ok();
        }
        let mut missing = Vec::new();
        if decision.meta_string("title").map(str::is_empty).unwrap_or(true) {
            missing.push("meta.title");
        }
        if decision.meta_string("owner_id").map(str::is_empty).unwrap_or(true) {
            missing.push("meta.owner_id");
        }
        if missing.is_empty() {
            PolicyOutcome::ok()
        } else {
            PolicyOutcome::single(Violation::block(
                "MISSING_REQUIRED_FIELDS",
                format!("missing required fields: {}", missing.join(", ")),
            ))
        }
    }
}

/// When to escalate a re-evaluated SLA breach to BLOCK severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaBlockMode {
    /// Only escalate on APPROVE/REJECT (the spec default).
    ApproveOnly,
    /// Escalate on every event type.
    AnyEvent,
}

/// Re-evaluates the obligation bag against `now` ahead of the engine's own
/// mutation pass, purely for early policy-level signaling (spec §4.3
/// default policy 2). This runs independently of the hard EXECUTION_BLOCKED
/// gate in `engine::apply_event` step 4 — that gate catches the case this
/// scenario actually exercises (§8 S3); this policy exists so a breach is
/// visible as a WARN even when it wouldn't yet abort the apply.
pub struct SlaEnforcementPolicy {
    pub block_mode: SlaBlockMode,
}

impl SlaEnforcementPolicy {
    pub fn new(block_mode: SlaBlockMode) -> Self {
        SlaEnforcementPolicy { block_mode }
    }
}

impl Policy for SlaEnforcementPolicy {
    fn name(&self) -> &str {
        "sla_enforcement"
    }

    fn evaluate(&self, decision: &Decision, event: &DecisionEvent) -> PolicyOutcome {
        let mut bag = decision.artifacts.execution.clone();
        let now = decision.updated_at.clone();
        let mut counter = 0u64;
        bag.evaluate(&now, &mut || {
            counter += 1;
            format!("policy-preview-{counter}")
        });
        if !bag.has_open_block_violation() {
            return PolicyOutcome::ok();
        }
        let escalate = matches!(self.block_mode, SlaBlockMode::AnyEvent)
            || matches!(event.event_type(), EventType::Approve | EventType::Reject);
        let violation = if escalate {
            Violation::block("OBLIGATION_BREACHED", "one or more BLOCK obligations are breached")
        } else {
            Violation::warn("OBLIGATION_BREACHED", "one or more BLOCK obligations are breached")
        };
        PolicyOutcome::single(violation)
    }
}

/// Agents may never finalize a decision (spec §4.3 default policy 3).
pub struct AgentsCannotFinalizePolicy;

impl Policy for AgentsCannotFinalizePolicy {
    fn name(&self) -> &str {
        "agents_cannot_finalize"
    }

    fn evaluate(&self, _decision: &Decision, event: &DecisionEvent) -> PolicyOutcome {
        let is_finalizing = matches!(event.event_type(), EventType::Approve | EventType::Reject);
        let is_agent = matches!(event.actor_type, Some(ActorType::Agent));
        if is_finalizing && is_agent {
            PolicyOutcome::single(Violation::block(
                "AGENT_CANNOT_FINALIZE",
                "agent actors cannot APPROVE or REJECT a decision",
            ))
        } else {
            PolicyOutcome::ok()
        }
    }
}

/// The three always-present default policies, in evaluation order.
pub fn default_policies(sla_block_mode: SlaBlockMode) -> Vec<Box<dyn Policy>> {
    vec![
        Box::new(RequiredFieldsPolicy),
        Box::new(SlaEnforcementPolicy::new(sla_block_mode)),
        Box::new(AgentsCannotFinalizePolicy),
    ]
}

fn value_at(decision: &Decision, path: &str) -> Option<Value> {
    let value = serde_json::to_value(decision).ok()?;
    read_decision_path(&value, path)
}

fn is_present(value: &Option<Value>) -> bool {
    match value {
        None => false,
        Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

/// Evaluate the compliance mini-DSL (spec §4.3) against one pending event.
pub fn evaluate_compliance_rules(
    rules: &[ComplianceRule],
    decision: &Decision,
    event: &DecisionEvent,
) -> PolicyOutcome {
    let mut outcome = PolicyOutcome::ok();
    let event_type_str = event.event_type().as_str();
    for rule in rules {
        match rule {
            ComplianceRule::DisallowEventTypes { event_types } => {
                if event_types.iter().any(|t| t == event_type_str) {
                    outcome.violations.push(Violation::block(
                        rule.code(),
                        format!("event type {event_type_str} is disallowed by compliance policy"),
                    ));
                }
            }
            ComplianceRule::RequireEventMetaKeys { event_types, keys } => {
                if event_types.iter().any(|t| t == event_type_str) {
                    for key in keys {
                        let present = event
                            .meta
                            .get(key)
                            .map(|v| !v.is_null() && v.as_str().map(|s| !s.is_empty()).unwrap_or(true))
                            .unwrap_or(false);
                        if !present {
                            outcome.violations.push(Violation::block(
                                rule.code(),
                                format!("event meta key '{key}' is required for {event_type_str}"),
                            ));
                        }
                    }
                }
            }
            ComplianceRule::RequireDecisionPaths { paths } => {
                for path in paths {
                    if !is_present(&value_at(decision, path)) {
                        outcome.violations.push(Violation::block(
                            rule.code(),
                            format!("decision path '{path}' is required"),
                        ));
                    }
                }
            }
            ComplianceRule::ThresholdBlock { path, gte } => {
                if let Some(n) = value_at(decision, path).and_then(|v| v.as_f64()) {
                    if n >= *gte {
                        outcome.violations.push(Violation::block(
                            rule.code(),
                            format!("value at '{path}' ({n}) meets or exceeds threshold {gte}"),
                        ));
                    }
                }
            }
            ComplianceRule::AllowlistActors { event_types, actor_ids } => {
                if event_types.iter().any(|t| t == event_type_str) {
                    let allowed = event
                        .actor_id
                        .as_deref()
                        .map(|id| actor_ids.iter().any(|a| a == id))
                        .unwrap_or(false);
                    if !allowed {
                        outcome.violations.push(Violation::block(
                            rule.code(),
                            format!("actor is not allowlisted for {event_type_str}"),
                        ));
                    }
                }
            }
        }
    }
    outcome
}

/// RBAC check for APPROVE/REJECT/PUBLISH-equivalent events (spec §4.3):
/// the actor must hold APPROVER or ADMIN, case-insensitively, per
/// `roles_for`. `PUBLISH` has no event-kind analogue in the closed set
/// (spec §6); APPROVE/REJECT are the finalizing events this gate covers.
pub fn rbac_gate(roles: &[String], event: &DecisionEvent, bypass: bool) -> GateReport {
    if bypass {
        return GateReport::pass(GateKind::Rbac);
    }
    let requires_role = matches!(event.event_type(), EventType::Approve | EventType::Reject);
    if !requires_role {
        return GateReport::pass(GateKind::Rbac);
    }
    let holds_role = roles
        .iter()
        .any(|r| r.eq_ignore_ascii_case("APPROVER") || r.eq_ignore_ascii_case("ADMIN"));
    if holds_role {
        GateReport::pass(GateKind::Rbac)
    } else {
        GateReport::fail(
            GateKind::Rbac,
            vec![Violation::block(
                "RBAC_ROLE_REQUIRED",
                "actor must hold APPROVER or ADMIN to finalize this decision",
            )],
        )
    }
}

/// Workflow-completeness gate for the `basic_approval` template (spec
/// §4.3): requires a present `meta.amount`, a VALIDATE event in history
/// (including the pending event), and an APPROVE-or-REJECT event
/// (including the pending one).
pub fn workflow_gate(
    template: Option<&WorkflowTemplate>,
    decision: &Decision,
    event: &DecisionEvent,
    bypass: bool,
) -> GateReport {
    if bypass {
        return GateReport::pass(GateKind::Workflow);
    }
    let is_finalizing = matches!(event.event_type(), EventType::Approve | EventType::Reject);
    if !is_finalizing {
        return GateReport::pass(GateKind::Workflow);
    }
    let Some(template) = template else {
        return GateReport::pass(GateKind::Workflow);
    };
    if template.name != "basic_approval" {
        return GateReport::pass(GateKind::Workflow);
    }

    let amount_present = is_present(&decision.meta.get("amount").cloned());
    let has_validate = decision
        .history
        .iter()
        .any(|h| h.event_type == EventType::Validate.as_str());
    let has_finalize_in_history = decision.history.iter().any(|h| {
        h.event_type == EventType::Approve.as_str() || h.event_type == EventType::Reject.as_str()
    });

    let steps = vec![
        WorkflowStep {
            name: "amount_present".to_string(),
            satisfied: amount_present,
            detail: (!amount_present).then(|| "meta.amount is missing".to_string()),
        },
        WorkflowStep {
            name: "validated".to_string(),
            satisfied: has_validate,
            detail: (!has_validate).then(|| "no VALIDATE event in history".to_string()),
        },
        WorkflowStep {
            name: "finalized".to_string(),
            satisfied: has_finalize_in_history || is_finalizing,
            detail: None,
        },
    ];

    if steps.iter().all(|s| s.satisfied) {
        GateReport {
            gate: GateKind::Workflow,
            passed: true,
            steps,
            violations: Vec::new(),
        }
    } else {
        GateReport {
            gate: GateKind::Workflow,
            passed: false,
            steps,
            violations: vec![Violation::block(
                "WORKFLOW_INCOMPLETE",
                "basic_approval workflow is missing required steps",
            )],
        }
    }
}

/// Trust-boundary check against a per-decision `TrustPolicy` stored at
/// `artifacts.trust.policy` (spec §4.3).
pub fn trust_boundary_check(decision: &Decision, event: &DecisionEvent, now: &Timestamp) -> PolicyOutcome {
    let _ = now;
    let Some(policy) = &decision.artifacts.trust.policy else {
        return PolicyOutcome::ok();
    };
    if !policy.enabled {
        return PolicyOutcome::ok();
    }
    let event_type_str = event.event_type().as_str();
    if policy.exempt_event_types.contains(event_type_str) {
        return PolicyOutcome::ok();
    }

    let zone = event.trust.as_ref().and_then(|t| t.origin_zone.as_deref());
    let Some(zone) = zone else {
        return PolicyOutcome::single(Violation::block(
            "TRUST_ORIGIN_ZONE_REQUIRED",
            "event must carry a trust origin zone under the active trust policy",
        ));
    };

    if policy.denied_zones.contains(zone) {
        return PolicyOutcome::single(Violation::block(
            "TRUST_ORIGIN_ZONE_DENIED",
            format!("origin zone '{zone}' is explicitly denied"),
        ));
    }
    if !policy.allowed_zones.is_empty() && !policy.allowed_zones.contains(zone) {
        return PolicyOutcome::single(Violation::block(
            "TRUST_ORIGIN_ZONE_NOT_ALLOWED",
            format!("origin zone '{zone}' is not in the allowed set"),
        ));
    }

    let mut outcome = PolicyOutcome::ok();
    if let Some(min_count) = policy.min_evidence_count {
        let count = event.trust.as_ref().map(|t| t.evidence_refs.len()).unwrap_or(0);
        if count < min_count {
            outcome.violations.push(Violation::block(
                "TRUST_ORIGIN_ZONE_REQUIRED",
                format!("evidence_refs has {count} entries, fewer than the required {min_count}"),
            ));
        }
    }
    if let Some(min_confidence) = policy.min_attestation_confidence {
        let max_confidence = event
            .trust
            .as_ref()
            .map(|t| t.attestations.iter().map(|a| a.confidence).fold(0.0_f64, f64::max))
            .unwrap_or(0.0);
        if max_confidence < min_confidence {
            outcome.violations.push(Violation::block(
                "TRUST_ORIGIN_ZONE_REQUIRED",
                format!("no attestation meets the required confidence {min_confidence}"),
            ));
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_ledger_spec::{ActorType as AT, DecisionEventKind};
    use serde_json::json;

    fn decision_with_meta(title: Option<&str>, owner: Option<&str>) -> Decision {
        let mut meta = serde_json::Map::new();
        if let Some(t) = title {
            meta.insert("title".to_string(), json!(t));
        }
        if let Some(o) = owner {
            meta.insert("owner_id".to_string(), json!(o));
        }
        Decision::genesis("d1", Timestamp::from_millis_epoch(0), meta)
    }

    fn validate_event() -> DecisionEvent {
        DecisionEvent {
            kind: DecisionEventKind::Validate,
            actor_id: Some("alice".to_string()),
            actor_type: Some(AT::Human),
            meta: Default::default(),
            trust: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn required_fields_policy_blocks_missing_title() {
        let decision = decision_with_meta(None, Some("o"));
        let outcome = RequiredFieldsPolicy.evaluate(&decision, &validate_event());
        assert!(outcome.has_block());
    }

    #[test]
    fn required_fields_policy_passes_with_both_fields() {
        let decision = decision_with_meta(Some("T"), Some("o"));
        let outcome = RequiredFieldsPolicy.evaluate(&decision, &validate_event());
        assert!(!outcome.has_block());
    }

    #[test]
    fn agents_cannot_finalize_blocks_agent_approve() {
        let decision = decision_with_meta(Some("T"), Some("o"));
        let event = DecisionEvent {
            kind: DecisionEventKind::Approve { reason: None },
            actor_id: Some("bot".to_string()),
            actor_type: Some(AT::Agent),
            meta: Default::default(),
            trust: None,
            idempotency_key: None,
        };
        let outcome = AgentsCannotFinalizePolicy.evaluate(&decision, &event);
        assert!(outcome.has_block());
    }

    #[test]
    fn rbac_gate_requires_approver_or_admin_role() {
        let event = DecisionEvent {
            kind: DecisionEventKind::Approve { reason: None },
            actor_id: Some("alice".to_string()),
            actor_type: Some(AT::Human),
            meta: Default::default(),
            trust: None,
            idempotency_key: None,
        };
        let denied = rbac_gate(&[], &event, false);
        assert!(!denied.passed);
        let allowed = rbac_gate(&["approver".to_string()], &event, false);
        assert!(allowed.passed);
    }

    #[test]
    fn workflow_gate_flags_missing_amount() {
        let decision = decision_with_meta(Some("T"), Some("o"));
        let event = DecisionEvent {
            kind: DecisionEventKind::Approve { reason: None },
            actor_id: Some("alice".to_string()),
            actor_type: Some(AT::Human),
            meta: Default::default(),
            trust: None,
            idempotency_key: None,
        };
        let report = workflow_gate(Some(&WorkflowTemplate::basic_approval()), &decision, &event, false);
        assert!(!report.passed);
        assert!(report.steps.iter().any(|s| s.name == "amount_present" && !s.satisfied));
    }
}
