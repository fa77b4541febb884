//! Event-type classification and the decision state transition table
//! (spec §4.2).

use crate::decision::DecisionState;
use serde::{Deserialize, Serialize};

/// The closed set of event kinds (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Validate,
    Simulate,
    Explain,
    Approve,
    Reject,
    AttachArtifacts,
    Sign,
    IngestRecords,
    LinkDecisions,
    AttestExternal,
    EnterDispute,
    ExitDispute,
    AddObligation,
    FulfillObligation,
    WaiveObligation,
    AttestExecution,
    SetRisk,
    AddBlastRadius,
    AddImpactedSystem,
    SetRollbackPlan,
    AssignResponsibility,
    AcceptRisk,
    SetTrustPolicy,
    AssertTrustOrigin,
    AgentPropose,
    AgentTriggerObligation,
    SetAmount,
    SetObligations,
    AutoViolation,
    ResolveViolation,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Validate => "VALIDATE",
            EventType::Simulate => "SIMULATE",
            EventType::Explain => "EXPLAIN",
            EventType::Approve => "APPROVE",
            EventType::Reject => "REJECT",
            EventType::AttachArtifacts => "ATTACH_ARTIFACTS",
            EventType::Sign => "SIGN",
            EventType::IngestRecords => "INGEST_RECORDS",
            EventType::LinkDecisions => "LINK_DECISIONS",
            EventType::AttestExternal => "ATTEST_EXTERNAL",
            EventType::EnterDispute => "ENTER_DISPUTE",
            EventType::ExitDispute => "EXIT_DISPUTE",
            EventType::AddObligation => "ADD_OBLIGATION",
            EventType::FulfillObligation => "FULFILL_OBLIGATION",
            EventType::WaiveObligation => "WAIVE_OBLIGATION",
            EventType::AttestExecution => "ATTEST_EXECUTION",
            EventType::SetRisk => "SET_RISK",
            EventType::AddBlastRadius => "ADD_BLAST_RADIUS",
            EventType::AddImpactedSystem => "ADD_IMPACTED_SYSTEM",
            EventType::SetRollbackPlan => "SET_ROLLBACK_PLAN",
            EventType::AssignResponsibility => "ASSIGN_RESPONSIBILITY",
            EventType::AcceptRisk => "ACCEPT_RISK",
            EventType::SetTrustPolicy => "SET_TRUST_POLICY",
            EventType::AssertTrustOrigin => "ASSERT_TRUST_ORIGIN",
            EventType::AgentPropose => "AGENT_PROPOSE",
            EventType::AgentTriggerObligation => "AGENT_TRIGGER_OBLIGATION",
            EventType::SetAmount => "SET_AMOUNT",
            EventType::SetObligations => "SET_OBLIGATIONS",
            EventType::AutoViolation => "AUTO_VIOLATION",
            EventType::ResolveViolation => "RESOLVE_VIOLATION",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        let upper = s.trim().to_uppercase();
        Some(match upper.as_str() {
            "VALIDATE" => EventType::Validate,
            "SIMULATE" => EventType::Simulate,
            "EXPLAIN" => EventType::Explain,
            "APPROVE" => EventType::Approve,
            "REJECT" => EventType::Reject,
            "ATTACH_ARTIFACTS" => EventType::AttachArtifacts,
            "SIGN" => EventType::Sign,
            "INGEST_RECORDS" => EventType::IngestRecords,
            "LINK_DECISIONS" => EventType::LinkDecisions,
            "ATTEST_EXTERNAL" => EventType::AttestExternal,
            "ENTER_DISPUTE" => EventType::EnterDispute,
            "EXIT_DISPUTE" => EventType::ExitDispute,
            "ADD_OBLIGATION" => EventType::AddObligation,
            "FULFILL_OBLIGATION" => EventType::FulfillObligation,
            "WAIVE_OBLIGATION" => EventType::WaiveObligation,
            "ATTEST_EXECUTION" => EventType::AttestExecution,
            "SET_RISK" => EventType::SetRisk,
            "ADD_BLAST_RADIUS" => EventType::AddBlastRadius,
            "ADD_IMPACTED_SYSTEM" => EventType::AddImpactedSystem,
            "SET_ROLLBACK_PLAN" => EventType::SetRollbackPlan,
            "ASSIGN_RESPONSIBILITY" => EventType::AssignResponsibility,
            "ACCEPT_RISK" => EventType::AcceptRisk,
            "SET_TRUST_POLICY" => EventType::SetTrustPolicy,
            "ASSERT_TRUST_ORIGIN" => EventType::AssertTrustOrigin,
            "AGENT_PROPOSE" => EventType::AgentPropose,
            "AGENT_TRIGGER_OBLIGATION" => EventType::AgentTriggerObligation,
            "SET_AMOUNT" => EventType::SetAmount,
            "SET_OBLIGATIONS" => EventType::SetObligations,
            "AUTO_VIOLATION" => EventType::AutoViolation,
            "RESOLVE_VIOLATION" => EventType::ResolveViolation,
            _ => return None,
        })
    }

    /// Side-effect-only events never change `decision.state`.
    pub fn is_state_changing(self) -> bool {
        matches!(
            self,
            EventType::Validate
                | EventType::Simulate
                | EventType::Explain
                | EventType::Approve
                | EventType::Reject
        )
    }

    /// VALIDATE/SIMULATE/EXPLAIN may be re-applied from the state they
    /// already produce without an INVALID_TRANSITION (enables
    /// snapshot-delta replay).
    pub fn is_idempotent_same_state(self) -> bool {
        matches!(self, EventType::Validate | EventType::Simulate | EventType::Explain)
    }

    pub fn is_remediation_allowed(self) -> bool {
        crate::obligations::REMEDIATION_ALLOWLIST.contains(&self.as_str())
    }
}

/// The allowed state transition table (spec §4.2). Returns `None` if the
/// event type does not advance state from `current` (including
/// side-effect-only events, which never advance state).
pub fn next_state(current: DecisionState, event_type: EventType) -> Option<DecisionState> {
    use DecisionState::*;
    use EventType::*;
    match (current, event_type) {
        (Draft, Validate) => Some(Validated),
        (Validated, Simulate) => Some(Simulated),
        (Validated, Explain) => Some(Explained),
        (Validated, Approve) => Some(Approved),
        (Validated, Reject) => Some(Rejected),
        (Simulated, Explain) => Some(Explained),
        (Simulated, Approve) => Some(Approved),
        (Simulated, Reject) => Some(Rejected),
        (Explained, Approve) => Some(Approved),
        (Explained, Reject) => Some(Rejected),
        _ => None,
    }
}

/// Default locked-allowlist: while APPROVED/REJECTED, only these event
/// types may still be applied.
pub const LOCKED_ALLOWLIST: &[EventType] = &[
    EventType::AttachArtifacts,
    EventType::Sign,
    EventType::AttestExternal,
    EventType::LinkDecisions,
    EventType::IngestRecords,
    EventType::FulfillObligation,
    EventType::WaiveObligation,
    EventType::AttestExecution,
    EventType::EnterDispute,
    EventType::ExitDispute,
    EventType::ResolveViolation,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_validate_then_simulate_then_approve() {
        assert_eq!(
            next_state(DecisionState::Draft, EventType::Validate),
            Some(DecisionState::Validated)
        );
        assert_eq!(
            next_state(DecisionState::Validated, EventType::Simulate),
            Some(DecisionState::Simulated)
        );
        assert_eq!(
            next_state(DecisionState::Simulated, EventType::Approve),
            Some(DecisionState::Approved)
        );
    }

    #[test]
    fn side_effect_events_never_advance_state() {
        assert_eq!(next_state(DecisionState::Draft, EventType::AttachArtifacts), None);
    }

    #[test]
    fn loose_parsing_is_case_insensitive() {
        assert_eq!(EventType::from_str_loose("validate"), Some(EventType::Validate));
        assert_eq!(EventType::from_str_loose("Approve"), Some(EventType::Approve));
        assert_eq!(EventType::from_str_loose("not-a-type"), None);
    }
}
