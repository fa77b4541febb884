//! Event-application engine, append-only store, snapshot/anchor chain,
//! signing, and deterministic replay for the decision ledger. Built on
//! top of the pure types in `decision-ledger-spec`; this crate owns all
//! orchestration, I/O, and concurrency.

pub mod engine;
pub mod errors;
pub mod merkle;
pub mod persistent_store;
pub mod policy_engine;
pub mod records;
pub mod replay;
pub mod signing;
pub mod store;
pub mod verifier;

pub use engine::{apply_event, snapshot_root, ApplyError, ApplyOutcome, EngineOptions};
pub use errors::StoreError;
pub use merkle::{merkle_root, MerkleProof, ProofNode, ProofPosition};
pub use persistent_store::PersistentStore;
pub use policy_engine::{
    default_policies, evaluate_compliance_rules, rbac_gate, trust_boundary_check, workflow_gate,
    AgentsCannotFinalizePolicy, RequiredFieldsPolicy, SlaBlockMode, SlaEnforcementPolicy,
};
pub use records::{
    Anchor, CounterfactualRun, DecisionRole, EdgeRecord, EventRecord, LedgerEntry, LedgerEntryType,
    LiabilityReceipt, PlsShield, Snapshot,
};
pub use replay::{
    persist_counterfactual_branch, replay_decision, rewind_decision, run_counterfactual,
    CounterfactualEdit, CounterfactualOutcome, ReplayOutcome, ReplayValidator,
};
pub use signing::{sign_hash, verify_hash, SignerRegistry};
pub use store::{merkle_root_up_to, DecisionStore, InMemoryStore, StoreTables};
pub use verifier::{
    build_merkle_proof, verify_decision_from_latest_snapshot, verify_decision_from_snapshot,
    verify_decision_hash_chain, verify_decision_integrity, verify_decision_seal,
    verify_decision_signatures, verify_snapshot_fields, AnchorReceipt, IntegrityCheck,
    IntegrityFailure, IntegrityReport,
};

/// Re-exported so downstream crates need only depend on
/// `decision-ledger-core` for the common surface.
pub use decision_ledger_spec as spec;
