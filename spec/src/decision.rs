//! The `Decision` aggregate root and its nested containers (spec §3).
//!
//! Design Note resolution: the source kept both a canonical location
//! (`artifacts.extra.X`) and a legacy mirror (`artifacts.X`) for each
//! subsystem-owned sub-container. This implementation keeps exactly one
//! canonical location per container — a typed field directly on
//! `Artifacts` — and drops the mirror entirely.

use crate::clock::Timestamp;
use crate::errors::Violation;
use crate::obligations::ObligationBag;
use crate::provenance::ProvenanceChain;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionState {
    Draft,
    Validated,
    Simulated,
    Explained,
    Approved,
    Rejected,
}

impl DecisionState {
    pub fn is_locked(self) -> bool {
        matches!(self, DecisionState::Approved | DecisionState::Rejected)
    }
}

impl std::fmt::Display for DecisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).unwrap();
        write!(f, "{}", s.as_str().unwrap())
    }
}

/// Dispute-mode state, stored at `artifacts.dispute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisputeState {
    pub active: bool,
    pub reason: Option<String>,
    pub entered_at: Option<Timestamp>,
    pub resolution: Option<String>,
    pub resolved_at: Option<Timestamp>,
}

/// Optional per-decision trust-boundary policy, stored at `artifacts.trust`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustState {
    pub policy: Option<TrustPolicy>,
    pub last_origin_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustPolicy {
    pub enabled: bool,
    #[serde(default)]
    pub denied_zones: BTreeSet<String>,
    #[serde(default)]
    pub allowed_zones: BTreeSet<String>,
    #[serde(default)]
    pub exempt_event_types: BTreeSet<String>,
    pub min_evidence_count: Option<usize>,
    pub min_attestation_confidence: Option<f64>,
}

/// Personal Liability Shield state, stored at `artifacts.liability_shield`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiabilityShieldState {
    pub last_shield_hash: Option<crate::hashing::Hash>,
    pub count: u64,
}

/// The artifacts container: explain/risk/margin references, free-form
/// `extra`, and the subsystem-owned sub-containers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifacts {
    pub explain: Option<Value>,
    pub risk: Option<Value>,
    pub margin: Option<Value>,
    #[serde(default)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub execution: ObligationBag,
    #[serde(default)]
    pub provenance: ProvenanceChain,
    #[serde(default)]
    pub dispute: DisputeState,
    #[serde(default)]
    pub trust: TrustState,
    #[serde(default)]
    pub liability_shield: LiabilityShieldState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskRecord {
    pub owner: Option<String>,
    pub severity: Option<RiskSeverity>,
    #[serde(default)]
    pub blast_radius: BTreeSet<String>,
    #[serde(default)]
    pub impacted_systems: BTreeSet<String>,
    #[serde(default)]
    pub rollback_plan: Vec<String>,
    pub accepted_by: Option<String>,
    pub accepted_note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Accountability {
    pub owner: Option<String>,
    pub creator: Option<String>,
    pub last_actor: Option<String>,
    #[serde(default)]
    pub per_actor_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub per_actor_type_counts: BTreeMap<String, u64>,
}

impl Accountability {
    pub fn record(&mut self, actor_id: Option<&str>, actor_type: Option<&str>) {
        if let Some(actor_id) = actor_id {
            self.last_actor = Some(actor_id.to_string());
            *self.per_actor_counts.entry(actor_id.to_string()).or_insert(0) += 1;
            if self.creator.is_none() {
                self.creator = Some(actor_id.to_string());
            }
        }
        if let Some(actor_type) = actor_type {
            *self
                .per_actor_type_counts
                .entry(actor_type.to_string())
                .or_insert(0) += 1;
        }
    }
}

/// A single entry in `decision.history`: a summary of one applied event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub at: Timestamp,
    pub event_type: String,
    pub actor_id: Option<String>,
    pub actor_type: Option<String>,
    pub state_before: DecisionState,
    pub state_after: DecisionState,
    #[serde(default)]
    pub warnings: Vec<Violation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeRelation {
    DependsOn,
    Blocks,
    Duplicates,
    DerivesFrom,
    RelatedTo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEdge {
    pub from_decision_id: String,
    pub to_decision_id: String,
    pub relation: EdgeRelation,
    pub via_event_seq: u64,
    pub edge_hash: crate::hashing::Hash,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub created_at: Timestamp,
}

/// A recorded signature over the decision's public hash at the time of
/// signing (§8 S7, "seal idempotence").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSignature {
    pub key_id: String,
    pub signed_hash: crate::hashing::Hash,
    pub signature_hex: String,
    pub idempotency_key: Option<String>,
    pub created_at: Timestamp,
}

/// The aggregate root: a business decision under audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub parent_id: Option<String>,
    pub version: u64,
    pub state: DecisionState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub artifacts: Artifacts,
    pub risk: Option<RiskRecord>,
    #[serde(default)]
    pub accountability: Accountability,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub signatures: Vec<DecisionSignature>,
}

impl Decision {
    /// Create the lazily-created genesis decision for an id, seeded from
    /// `meta_if_create` on first event receipt.
    pub fn genesis(id: impl Into<String>, at: Timestamp, meta_if_create: Map<String, Value>) -> Self {
        Decision {
            id: id.into(),
            parent_id: None,
            version: 0,
            state: DecisionState::Draft,
            created_at: at.clone(),
            updated_at: at,
            meta: meta_if_create,
            artifacts: Artifacts::default(),
            risk: None,
            accountability: Accountability::default(),
            history: Vec::new(),
            signatures: Vec::new(),
        }
    }

    pub fn meta_string(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }
}
