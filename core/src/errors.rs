//! Store-level failures (spec §5/§7), distinct from the structured
//! `Violation`/`EngineError` pair in `decision-ledger-spec` that travels
//! through policy/gate results. Mirrors the teacher's `AppendError` split
//! between validation failures and storage/IO failures.

use decision_ledger_spec::Violation;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("decision not found: {0}")]
    DecisionNotFound(String),

    #[error("concurrent modification: decision {decision_id} expected version {expected}, found {found}")]
    ConcurrentModification {
        decision_id: String,
        expected: u64,
        found: u64,
    },

    #[error("no snapshot available for decision {0}")]
    NoSnapshot(String),

    #[error(transparent)]
    Engine(#[from] Violation),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::DecisionNotFound(_) => "DECISION_NOT_FOUND",
            StoreError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            StoreError::NoSnapshot(_) => "NO_SNAPSHOT",
            StoreError::Engine(_) => "ENGINE_ERROR",
            StoreError::Storage(_) => "STORAGE_ERROR",
            StoreError::Io(_) => "IO_ERROR",
        }
    }
}
