//! SLA obligations and execution violations (spec §4.4), stored at
//! `artifacts.execution`.

use crate::clock::Timestamp;
use crate::hashing::{hash_value, Hash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObligationStatus {
    Open,
    Fulfilled,
    Waived,
    Breached,
}

impl ObligationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ObligationStatus::Fulfilled | ObligationStatus::Waived)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub created_at: Timestamp,
    pub due_at: Option<Timestamp>,
    pub grace_seconds: i64,
    pub severity: Severity,
    pub status: ObligationStatus,
    pub fulfilled_at: Option<Timestamp>,
    pub waived_at: Option<Timestamp>,
    pub waived_reason: Option<String>,
    pub proof: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Obligation {
    pub fn is_settled(&self) -> bool {
        self.fulfilled_at.is_some() || self.waived_at.is_some() || self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionViolation {
    pub violation_id: String,
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub at: Timestamp,
    pub obligation_id: Option<String>,
    pub resolved_at: Option<Timestamp>,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
}

impl ExecutionViolation {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// The concrete carrier for `artifacts.execution`: obligations, their
/// violations, and the last SLA-evaluation timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObligationBag {
    #[serde(default)]
    pub obligations: Vec<Obligation>,
    #[serde(default)]
    pub violations: Vec<ExecutionViolation>,
    pub last_evaluated_at: Option<Timestamp>,
}

impl ObligationBag {
    pub fn obligations_hash(&self) -> Hash {
        hash_value(&serde_json::json!({
            "obligations": self.obligations,
            "violations": self.violations,
        }))
    }

    pub fn find_obligation_mut(&mut self, id: &str) -> Option<&mut Obligation> {
        self.obligations.iter_mut().find(|o| o.id == id)
    }

    pub fn has_open_block_violation(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.is_open() && matches!(v.severity, Severity::Block))
    }

    /// `evaluateExecution(bag, nowIso)`: re-evaluate SLA breaches against
    /// `now`, auto-resolving violations for terminal obligations and
    /// raising new ones for newly-breached BLOCK obligations.
    pub fn evaluate(&mut self, now: &Timestamp, next_violation_id: &mut dyn FnMut() -> String) {
        let now_millis = now.to_millis_epoch();
        for obligation in self.obligations.iter_mut() {
            if obligation.is_settled() {
                continue;
            }
            let breached = match &obligation.due_at {
                Some(due_at) => {
                    let deadline = due_at.to_millis_epoch() + obligation.grace_seconds * 1000;
                    deadline < now_millis
                }
                None => false,
            };
            if breached {
                obligation.status = ObligationStatus::Breached;
            }
        }

        for obligation in &self.obligations {
            if obligation.is_settled() {
                let note = if obligation.fulfilled_at.is_some() {
                    "Auto-resolved: obligation FULFILLED"
                } else {
                    "Auto-resolved: obligation WAIVED"
                };
                for violation in self.violations.iter_mut() {
                    if violation.obligation_id.as_deref() == Some(obligation.id.as_str())
                        && violation.code == "OBLIGATION_BREACHED"
                        && violation.is_open()
                    {
                        violation.resolved_at = Some(now.clone());
                        violation.resolution_note = Some(note.to_string());
                    }
                }
            }
        }

        let breached_ids: Vec<(String, Severity)> = self
            .obligations
            .iter()
            .filter(|o| matches!(o.status, ObligationStatus::Breached))
            .map(|o| (o.id.clone(), o.severity))
            .collect();

        for (id, severity) in breached_ids {
            if !matches!(severity, Severity::Block) {
                continue;
            }
            let already_open = self.violations.iter().any(|v| {
                v.obligation_id.as_deref() == Some(id.as_str())
                    && v.code == "OBLIGATION_BREACHED"
                    && v.is_open()
            });
            if already_open {
                continue;
            }
            self.violations.push(ExecutionViolation {
                violation_id: next_violation_id(),
                code: "OBLIGATION_BREACHED".to_string(),
                severity,
                message: format!("Obligation {id} breached its SLA"),
                at: now.clone(),
                obligation_id: Some(id),
                resolved_at: None,
                resolved_by: None,
                resolution_note: None,
            });
        }

        self.last_evaluated_at = Some(now.truncate_to_seconds());
    }
}

/// Fixed remediation allowlist (spec §4.4): event types that may still
/// proceed while an open BLOCK violation exists.
pub const REMEDIATION_ALLOWLIST: &[&str] = &[
    "VALIDATE",
    "SIMULATE",
    "EXPLAIN",
    "ATTACH_ARTIFACTS",
    "SIGN",
    "ATTEST_EXTERNAL",
    "ATTEST_EXECUTION",
    "ENTER_DISPUTE",
    "EXIT_DISPUTE",
    "ADD_OBLIGATION",
    "FULFILL_OBLIGATION",
    "WAIVE_OBLIGATION",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn obligation(id: &str, due_millis: i64, grace: i64, severity: Severity) -> Obligation {
        Obligation {
            id: id.to_string(),
            title: "Remediate".to_string(),
            description: None,
            owner: None,
            created_at: Timestamp::from_millis_epoch(0),
            due_at: Some(Timestamp::from_millis_epoch(due_millis)),
            grace_seconds: grace,
            severity,
            status: ObligationStatus::Open,
            fulfilled_at: None,
            waived_at: None,
            waived_reason: None,
            proof: None,
            tags: vec![],
        }
    }

    #[test]
    fn breach_raises_block_violation() {
        let mut bag = ObligationBag::default();
        bag.obligations.push(obligation("o1", 0, 0, Severity::Block));
        let mut counter = 0u64;
        bag.evaluate(&Timestamp::from_millis_epoch(5_000), &mut || {
            counter += 1;
            format!("v{counter}")
        });
        assert!(bag.has_open_block_violation());
        assert_eq!(bag.violations.len(), 1);
    }

    #[test]
    fn fulfilling_obligation_auto_resolves_violation() {
        let mut bag = ObligationBag::default();
        bag.obligations.push(obligation("o1", 0, 0, Severity::Block));
        let mut counter = 0u64;
        bag.evaluate(&Timestamp::from_millis_epoch(5_000), &mut || {
            counter += 1;
            format!("v{counter}")
        });
        assert!(bag.has_open_block_violation());

        bag.find_obligation_mut("o1").unwrap().fulfilled_at = Some(Timestamp::from_millis_epoch(6_000));
        bag.find_obligation_mut("o1").unwrap().status = ObligationStatus::Fulfilled;
        bag.evaluate(&Timestamp::from_millis_epoch(7_000), &mut || {
            counter += 1;
            format!("v{counter}")
        });
        assert!(!bag.has_open_block_violation());
    }
}
