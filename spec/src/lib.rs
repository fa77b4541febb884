//! Canonicalization, event/state types, and the declarative policy model
//! for the decision ledger. No storage or orchestration lives here — see
//! `decision-ledger-core` for the engine, store, and verification passes
//! built on top of these types.

pub mod clock;
pub mod decision;
pub mod errors;
pub mod events;
pub mod hash_families;
pub mod hashing;
pub mod obligations;
pub mod policy;
pub mod provenance;
pub mod state_machine;

pub use clock::{Clock, DeterministicClock, SystemClock, Timestamp};
pub use decision::{
    Accountability, Artifacts, Decision, DecisionEdge, DecisionSignature, DecisionState,
    DisputeState, EdgeRelation, HistoryEntry, LiabilityShieldState, RiskRecord, RiskSeverity,
    TrustPolicy, TrustState,
};
pub use errors::{EngineError, Severity as ErrorSeverity, Violation};
pub use events::{
    normalize_event, ActorType, AttestationRef, DecisionEvent, DecisionEventKind, ObligationInput,
    TrustEnvelope,
};
pub use hash_families::{public_hash, tamper_hash};
pub use hashing::{canonicalize, canonicalize_to_bytes, hash_value, Hash};
pub use obligations::{ExecutionViolation, Obligation, ObligationBag, ObligationStatus, Severity};
pub use policy::{
    ApprovalGate, ComplianceRule, GateKind, GateReport, Policy, PolicyOutcome, WorkflowStep,
    WorkflowTemplate,
};
pub use provenance::{ProvenanceChain, ProvenanceError, ProvenanceErrorCode, ProvenanceNode, ProvenanceNodeInput};
pub use state_machine::{next_state, EventType, LOCKED_ALLOWLIST};

/// The engine-implementation version. Participates in `counterfactual_id`
/// (spec §9: "since it participates in `counterfactual_id`, it must be a
/// declared constant... changing it invalidates cached counterfactual IDs
/// deliberately").
pub const ENGINE_VERSION: &str = "decision-ledger-core/1";
