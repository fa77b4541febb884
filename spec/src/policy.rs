//! Declarative policy, gate, and compliance types (spec §4.3). Concrete
//! default policies and gate evaluators live in `decision-ledger-core`;
//! this module defines the shapes they compose through.

use crate::decision::Decision;
use crate::errors::Violation;
use crate::events::DecisionEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The result of running one policy: either clean, or a set of
/// violations/warnings. `BLOCK` severities abort the apply; everything
/// else accumulates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOutcome {
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl PolicyOutcome {
    pub fn ok() -> Self {
        PolicyOutcome::default()
    }

    pub fn single(violation: Violation) -> Self {
        PolicyOutcome {
            violations: vec![violation],
        }
    }

    pub fn has_block(&self) -> bool {
        self.violations.iter().any(|v| v.severity.aborts())
    }

    pub fn merge(&mut self, mut other: PolicyOutcome) {
        self.violations.append(&mut other.violations);
    }
}

/// A pure function `(decision, event) -> {ok} | {violations}`.
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, decision: &Decision, event: &DecisionEvent) -> PolicyOutcome;
}

/// Pluggable evaluator for APPROVE/REJECT requiring role, quorum, or
/// signing discipline beyond the default RBAC check.
pub trait ApprovalGate: Send + Sync {
    fn evaluate(&self, decision: &Decision, event: &DecisionEvent) -> PolicyOutcome;
}

/// A declarative compliance rule (spec §4.3 mini-DSL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", content = "params")]
pub enum ComplianceRule {
    #[serde(rename = "DISALLOW_EVENT_TYPES")]
    DisallowEventTypes { event_types: Vec<String> },
    #[serde(rename = "REQUIRE_EVENT_META_KEYS")]
    RequireEventMetaKeys {
        event_types: Vec<String>,
        keys: Vec<String>,
    },
    #[serde(rename = "REQUIRE_DECISION_PATHS")]
    RequireDecisionPaths { paths: Vec<String> },
    #[serde(rename = "THRESHOLD_BLOCK")]
    ThresholdBlock { path: String, gte: f64 },
    #[serde(rename = "ALLOWLIST_ACTORS")]
    AllowlistActors {
        event_types: Vec<String>,
        actor_ids: Vec<String>,
    },
}

impl ComplianceRule {
    pub fn code(&self) -> &'static str {
        match self {
            ComplianceRule::DisallowEventTypes { .. } => "COMPLIANCE_DISALLOWED_EVENT_TYPE",
            ComplianceRule::RequireEventMetaKeys { .. } => "COMPLIANCE_MISSING_META_KEY",
            ComplianceRule::RequireDecisionPaths { .. } => "COMPLIANCE_MISSING_PATH",
            ComplianceRule::ThresholdBlock { .. } => "COMPLIANCE_THRESHOLD_EXCEEDED",
            ComplianceRule::AllowlistActors { .. } => "COMPLIANCE_ACTOR_NOT_ALLOWLISTED",
        }
    }
}

/// One named step in a workflow-completeness template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub satisfied: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
}

impl WorkflowTemplate {
    pub fn basic_approval() -> Self {
        WorkflowTemplate {
            name: "basic_approval".to_string(),
        }
    }
}

/// Which named gate rejected the event, for explainability (spec §4.3,
/// "A unified `GateReport` structure").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateKind {
    StateMachine,
    Policy,
    Rbac,
    Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub gate: GateKind,
    pub passed: bool,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl GateReport {
    pub fn pass(gate: GateKind) -> Self {
        GateReport {
            gate,
            passed: true,
            steps: Vec::new(),
            violations: Vec::new(),
        }
    }

    pub fn fail(gate: GateKind, violations: Vec<Violation>) -> Self {
        GateReport {
            gate,
            passed: false,
            steps: Vec::new(),
            violations,
        }
    }
}

/// Read a dot-path (`a.b.c`) out of a decision serialized as JSON.
pub fn read_decision_path(decision_value: &Value, path: &str) -> Option<Value> {
    let mut current = decision_value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_nested_dot_path() {
        let value = json!({"meta": {"amount": 42}});
        assert_eq!(read_decision_path(&value, "meta.amount"), Some(json!(42)));
        assert_eq!(read_decision_path(&value, "meta.missing"), None);
    }

    #[test]
    fn compliance_rule_round_trips() {
        let rule = ComplianceRule::ThresholdBlock {
            path: "meta.amount".to_string(),
            gte: 1_000_000.0,
        };
        let value = serde_json::to_value(&rule).unwrap();
        let back: ComplianceRule = serde_json::from_value(value).unwrap();
        assert_eq!(back.code(), "COMPLIANCE_THRESHOLD_EXCEEDED");
    }
}
