//! `DecisionEvent`: the single tagged variant over the closed event-kind
//! set, plus the boundary `normalize_event` function (spec §4.6 step 1,
//! §9 Design Notes: "a strongly-typed implementation should expose a
//! single tagged variant with explicit decoders for each kind and emit
//! INVALID_EVENT_TYPE at the boundary").

use crate::decision::{EdgeRelation, RiskSeverity, TrustPolicy};
use crate::errors::{EngineError, Violation};
use crate::state_machine::EventType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Human,
    Service,
    System,
    Agent,
}

impl ActorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorType::Human => "human",
            ActorType::Service => "service",
            ActorType::System => "system",
            ActorType::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationRef {
    pub label: String,
    pub confidence: f64,
}

/// Optional trust envelope carried by any event (spec §3, §4.3 trust
/// boundary).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustEnvelope {
    pub origin_zone: Option<String>,
    pub origin_system: Option<String>,
    pub origin_channel: Option<String>,
    pub tenant: Option<String>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub attestations: Vec<AttestationRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObligationInput {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub due_at: Option<crate::clock::Timestamp>,
    #[serde(default)]
    pub grace_seconds: i64,
    pub severity: crate::obligations::Severity,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The kind-specific payload for every closed-set event type. Tag values
/// match `EventType::as_str` exactly so `normalize_event` can dispatch
/// directly into serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DecisionEventKind {
    #[serde(rename = "VALIDATE")]
    Validate,
    #[serde(rename = "SIMULATE")]
    Simulate,
    #[serde(rename = "EXPLAIN")]
    Explain,
    #[serde(rename = "APPROVE")]
    Approve { reason: Option<String> },
    #[serde(rename = "REJECT")]
    Reject { reason: Option<String> },
    #[serde(rename = "ATTACH_ARTIFACTS")]
    AttachArtifacts {
        #[serde(default)]
        explain: Option<Value>,
        #[serde(default)]
        risk: Option<Value>,
        #[serde(default)]
        margin: Option<Value>,
        #[serde(default)]
        extra: Map<String, Value>,
    },
    #[serde(rename = "SIGN")]
    Sign {
        key_id: String,
        idempotency_key: Option<String>,
    },
    #[serde(rename = "INGEST_RECORDS")]
    IngestRecords { records: Vec<Value> },
    #[serde(rename = "LINK_DECISIONS")]
    LinkDecisions {
        to_decision_id: String,
        relation: EdgeRelation,
    },
    #[serde(rename = "ATTEST_EXTERNAL")]
    AttestExternal {
        statement: String,
        #[serde(default)]
        evidence: Vec<String>,
    },
    #[serde(rename = "ENTER_DISPUTE")]
    EnterDispute { reason: String },
    #[serde(rename = "EXIT_DISPUTE")]
    ExitDispute { resolution: String },
    #[serde(rename = "ADD_OBLIGATION")]
    AddObligation { obligation: ObligationInput },
    #[serde(rename = "FULFILL_OBLIGATION")]
    FulfillObligation {
        obligation_id: String,
        proof: Option<String>,
    },
    #[serde(rename = "WAIVE_OBLIGATION")]
    WaiveObligation {
        obligation_id: String,
        reason: String,
    },
    #[serde(rename = "ATTEST_EXECUTION")]
    AttestExecution {
        obligation_id: Option<String>,
        statement: String,
        proof: Option<String>,
    },
    #[serde(rename = "SET_RISK")]
    SetRisk {
        owner: String,
        severity: RiskSeverity,
        #[serde(default)]
        rollback_plan: Vec<String>,
    },
    #[serde(rename = "ADD_BLAST_RADIUS")]
    AddBlastRadius { items: Vec<String> },
    #[serde(rename = "ADD_IMPACTED_SYSTEM")]
    AddImpactedSystem { systems: Vec<String> },
    #[serde(rename = "SET_ROLLBACK_PLAN")]
    SetRollbackPlan { plan: Vec<String> },
    #[serde(rename = "ASSIGN_RESPONSIBILITY")]
    AssignResponsibility { owner: String },
    #[serde(rename = "ACCEPT_RISK")]
    AcceptRisk {
        accepted_by: String,
        note: Option<String>,
    },
    #[serde(rename = "SET_TRUST_POLICY")]
    SetTrustPolicy { policy: TrustPolicy },
    #[serde(rename = "ASSERT_TRUST_ORIGIN")]
    AssertTrustOrigin { zone: String },
    #[serde(rename = "AGENT_PROPOSE")]
    AgentPropose { proposal: Value },
    #[serde(rename = "AGENT_TRIGGER_OBLIGATION")]
    AgentTriggerObligation { obligation_id: String },
    #[serde(rename = "SET_AMOUNT")]
    SetAmount {
        amount: f64,
        currency: Option<String>,
    },
    #[serde(rename = "SET_OBLIGATIONS")]
    SetObligations { obligations: Vec<ObligationInput> },
    #[serde(rename = "AUTO_VIOLATION")]
    AutoViolation {
        code: String,
        message: String,
        obligation_id: Option<String>,
    },
    #[serde(rename = "RESOLVE_VIOLATION")]
    ResolveViolation {
        violation_id: String,
        resolution_note: String,
    },
}

impl DecisionEventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            DecisionEventKind::Validate => EventType::Validate,
            DecisionEventKind::Simulate => EventType::Simulate,
            DecisionEventKind::Explain => EventType::Explain,
            DecisionEventKind::Approve { .. } => EventType::Approve,
            DecisionEventKind::Reject { .. } => EventType::Reject,
            DecisionEventKind::AttachArtifacts { .. } => EventType::AttachArtifacts,
            DecisionEventKind::Sign { .. } => EventType::Sign,
            DecisionEventKind::IngestRecords { .. } => EventType::IngestRecords,
            DecisionEventKind::LinkDecisions { .. } => EventType::LinkDecisions,
            DecisionEventKind::AttestExternal { .. } => EventType::AttestExternal,
            DecisionEventKind::EnterDispute { .. } => EventType::EnterDispute,
            DecisionEventKind::ExitDispute { .. } => EventType::ExitDispute,
            DecisionEventKind::AddObligation { .. } => EventType::AddObligation,
            DecisionEventKind::FulfillObligation { .. } => EventType::FulfillObligation,
            DecisionEventKind::WaiveObligation { .. } => EventType::WaiveObligation,
            DecisionEventKind::AttestExecution { .. } => EventType::AttestExecution,
            DecisionEventKind::SetRisk { .. } => EventType::SetRisk,
            DecisionEventKind::AddBlastRadius { .. } => EventType::AddBlastRadius,
            DecisionEventKind::AddImpactedSystem { .. } => EventType::AddImpactedSystem,
            DecisionEventKind::SetRollbackPlan { .. } => EventType::SetRollbackPlan,
            DecisionEventKind::AssignResponsibility { .. } => EventType::AssignResponsibility,
            DecisionEventKind::AcceptRisk { .. } => EventType::AcceptRisk,
            DecisionEventKind::SetTrustPolicy { .. } => EventType::SetTrustPolicy,
            DecisionEventKind::AssertTrustOrigin { .. } => EventType::AssertTrustOrigin,
            DecisionEventKind::AgentPropose { .. } => EventType::AgentPropose,
            DecisionEventKind::AgentTriggerObligation { .. } => EventType::AgentTriggerObligation,
            DecisionEventKind::SetAmount { .. } => EventType::SetAmount,
            DecisionEventKind::SetObligations { .. } => EventType::SetObligations,
            DecisionEventKind::AutoViolation { .. } => EventType::AutoViolation,
            DecisionEventKind::ResolveViolation { .. } => EventType::ResolveViolation,
        }
    }

    /// Best-effort scan for an obligation/violation id anywhere in the
    /// payload, used by the EXECUTION_BLOCKED remediation check (spec
    /// §4.4/§4.6 step 4: "payload does not reference an obligation/
    /// violation id").
    pub fn references_obligation_or_violation(&self, id: &str) -> bool {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        value_contains_string(&value, id)
    }
}

fn value_contains_string(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s == needle,
        Value::Array(items) => items.iter().any(|v| value_contains_string(v, needle)),
        Value::Object(map) => map.values().any(|v| value_contains_string(v, needle)),
        _ => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionEvent {
    #[serde(flatten)]
    pub kind: DecisionEventKind,
    pub actor_id: Option<String>,
    pub actor_type: Option<ActorType>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub trust: Option<TrustEnvelope>,
    pub idempotency_key: Option<String>,
}

/// Top-level and `meta` keys stripped before an event is hashed for
/// `event_hash` (spec §4.5: "over the sanitized event, stripping any
/// accidental timestamp fields"). None of these are legitimate
/// `DecisionEvent` fields; they only guard against a caller's raw payload
/// smuggling a server-assigned timestamp into `meta`.
const ACCIDENTAL_TIMESTAMP_KEYS: &[&str] = &["at", "created_at", "timestamp", "ts"];

impl DecisionEvent {
    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    /// The JSON value `event_hash` is computed over: this event, serialized,
    /// with any accidental timestamp key dropped from the top level and
    /// from `meta`. Independent of `seq`/`at`/`prev_hash`, so it identifies
    /// event content alone, never chain position.
    pub fn sanitized_for_hash(&self) -> Value {
        let mut value = serde_json::to_value(self).expect("DecisionEvent must serialize");
        if let Some(obj) = value.as_object_mut() {
            for key in ACCIDENTAL_TIMESTAMP_KEYS {
                obj.remove(*key);
            }
            if let Some(meta) = obj.get_mut("meta").and_then(Value::as_object_mut) {
                for key in ACCIDENTAL_TIMESTAMP_KEYS {
                    meta.remove(*key);
                }
            }
        }
        value
    }
}

// Adjacently-tagged enums nested under `#[serde(flatten)]` are fragile to
// deserialize through the derive macro (the flatten buffer and the
// tag/content visitor fight over unknown keys), so this side is written by
// hand: lift out exactly the `type`/`payload` pair for the enum and read
// the remaining common fields directly off the source object.
impl<'de> Deserialize<'de> for DecisionEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| serde::de::Error::custom("event must be a JSON object"))?;

        let kind_source = serde_json::json!({
            "type": obj.get("type").cloned().unwrap_or(Value::Null),
            "payload": obj.get("payload").cloned().unwrap_or(Value::Null),
        });
        let kind = DecisionEventKind::deserialize(kind_source).map_err(serde::de::Error::custom)?;

        let actor_id = obj.get("actor_id").and_then(Value::as_str).map(str::to_string);
        let actor_type = match obj.get("actor_type") {
            Some(v) if !v.is_null() => {
                Some(ActorType::deserialize(v.clone()).map_err(serde::de::Error::custom)?)
            }
            _ => None,
        };
        let meta = obj
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let trust = match obj.get("trust") {
            Some(v) if !v.is_null() => {
                Some(TrustEnvelope::deserialize(v.clone()).map_err(serde::de::Error::custom)?)
            }
            _ => None,
        };
        let idempotency_key = obj
            .get("idempotency_key")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(DecisionEvent {
            kind,
            actor_id,
            actor_type,
            meta,
            trust,
            idempotency_key,
        })
    }
}

/// Wrapper keys the boundary will unwrap before looking for `type`, per
/// spec §4.6 step 1 and §9 ("events arrive in several wrapper shapes").
const WRAPPER_KEYS: &[&str] = &["event", "data", "payload", "body", "message"];

/// Unwrap nested wrapper shapes, normalize the `type` tag to uppercase, and
/// deserialize into a `DecisionEvent`. Emits `INVALID_EVENT_TYPE` on any
/// failure — the engine never sees a malformed or unrecognized event.
pub fn normalize_event(raw: Value) -> Result<DecisionEvent, EngineError> {
    let mut current = raw;
    for _ in 0..WRAPPER_KEYS.len() + 1 {
        if matches!(&current, Value::Object(map) if map.contains_key("type")) {
            break;
        }
        let mut descended = false;
        if let Value::Object(map) = &current {
            for key in WRAPPER_KEYS {
                if let Some(inner) = map.get(*key) {
                    if inner.is_object() {
                        current = inner.clone();
                        descended = true;
                        break;
                    }
                }
            }
        }
        if !descended {
            break;
        }
    }

    if let Value::Object(map) = &mut current {
        if let Some(Value::String(type_tag)) = map.get("type").cloned() {
            map.insert("type".to_string(), Value::String(type_tag.to_uppercase()));
        }
    }

    serde_json::from_value::<DecisionEvent>(current).map_err(|e| {
        EngineError::new("INVALID_EVENT_TYPE", format!("could not normalize event: {e}"))
    })
}

impl From<EngineError> for Violation {
    fn from(e: EngineError) -> Self {
        e.into_violation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_bare_event() {
        let raw = json!({"type": "validate", "payload": null, "actor_id": "alice"});
        let event = normalize_event(raw).unwrap();
        assert_eq!(event.event_type(), EventType::Validate);
        assert_eq!(event.actor_id.as_deref(), Some("alice"));
    }

    #[test]
    fn unwraps_nested_event_wrapper() {
        let raw = json!({"event": {"data": {"type": "SIMULATE"}}});
        let event = normalize_event(raw).unwrap();
        assert_eq!(event.event_type(), EventType::Simulate);
    }

    #[test]
    fn rejects_unknown_type() {
        let raw = json!({"type": "NOT_A_REAL_TYPE"});
        let err = normalize_event(raw).unwrap_err();
        assert_eq!(err.code(), "INVALID_EVENT_TYPE");
    }

    #[test]
    fn sanitized_for_hash_drops_accidental_timestamp_keys() {
        let raw = json!({
            "type": "VALIDATE",
            "actor_id": "alice",
            "meta": {"title": "T", "created_at": "2025-01-01T00:00:00.000Z"},
        });
        let event = normalize_event(raw).unwrap();
        let sanitized = event.sanitized_for_hash();
        assert_eq!(sanitized["meta"].get("created_at"), None);
        assert_eq!(sanitized["meta"]["title"], json!("T"));
    }

    #[test]
    fn sanitized_for_hash_is_otherwise_stable_for_identical_events() {
        let raw = json!({"type": "SIMULATE", "actor_id": "alice"});
        let a = normalize_event(raw.clone()).unwrap().sanitized_for_hash();
        let b = normalize_event(raw).unwrap().sanitized_for_hash();
        assert_eq!(a, b);
    }

    #[test]
    fn approve_payload_references_obligation_id() {
        let kind = DecisionEventKind::FulfillObligation {
            obligation_id: "ob-1".to_string(),
            proof: None,
        };
        assert!(kind.references_obligation_or_violation("ob-1"));
        assert!(!kind.references_obligation_or_violation("ob-2"));
    }
}
