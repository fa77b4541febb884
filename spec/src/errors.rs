//! The structured `{code, severity, message, details}` record that travels
//! through `Result` payloads rather than as a Rust error type itself —
//! mirrors the teacher's `PolicyDecision`/`PolicyAlert`, which are ordinary
//! serde structs carried inside `Ok` results, not `Err`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Block,
}

impl Severity {
    pub fn aborts(self) -> bool {
        matches!(self, Severity::Block)
    }
}

/// A single structured violation or warning, as returned by policies, gates,
/// and verification passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Violation {
    pub fn new(code: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Violation {
            code: code.into(),
            severity,
            message: message.into(),
            details: None,
        }
    }

    pub fn block(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Block, message)
    }

    pub fn warn(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warn, message)
    }

    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Info, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Violation {}

/// Library-internal failure surfaced by the engine. Carries a `Violation`
/// for structured consumers alongside a human `Display` impl for `?`-based
/// glue code, mirroring the teacher's `AppendError`.
#[derive(Debug, thiserror::Error, Clone)]
#[error("{}", .0)]
pub struct EngineError(pub Violation);

impl EngineError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError(Violation::block(code, message))
    }

    pub fn code(&self) -> &str {
        &self.0.code
    }

    pub fn into_violation(self) -> Violation {
        self.0
    }
}

impl From<Violation> for EngineError {
    fn from(v: Violation) -> Self {
        EngineError(v)
    }
}
