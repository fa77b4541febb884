//! Per-decision provenance chain (spec §4.5): one node per applied event,
//! linking before/after state hashes and chained by `(node_id, node_hash)`.

use crate::clock::Timestamp;
use crate::hashing::{canonicalize_to_bytes, Hash};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceNode {
    pub node_id: Hash,
    pub node_hash: Hash,
    pub seq: u64,
    pub at: Timestamp,
    pub decision_id: String,
    pub event_type: String,
    pub actor_id: Option<String>,
    pub event_hash: Hash,
    pub prev_node_id: Option<Hash>,
    pub prev_node_hash: Option<Hash>,
    pub state_before_hash: Hash,
    pub state_after_hash: Hash,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

pub struct ProvenanceNodeInput {
    pub seq: u64,
    pub at: Timestamp,
    pub decision_id: String,
    pub event_type: String,
    pub actor_id: Option<String>,
    pub event_hash: Hash,
    pub prev_node_id: Option<Hash>,
    pub prev_node_hash: Option<Hash>,
    pub state_before_hash: Hash,
    pub state_after_hash: Hash,
    pub meta: Map<String, Value>,
}

fn payload_value(input: &ProvenanceNodeInput) -> Value {
    json!({
        "seq": input.seq,
        "at": input.at,
        "decision_id": input.decision_id,
        "event_type": input.event_type,
        "actor_id": input.actor_id,
        "event_hash": input.event_hash,
        "prev_node_id": input.prev_node_id,
        "prev_node_hash": input.prev_node_hash,
        "state_before_hash": input.state_before_hash,
        "state_after_hash": input.state_after_hash,
        "meta": input.meta,
    })
}

impl ProvenanceNode {
    pub fn build(input: ProvenanceNodeInput) -> Self {
        let payload = payload_value(&input);
        let node_id = Hash::digest(&canonicalize_to_bytes(&payload));

        let mut node_value = payload;
        node_value["node_id"] = json!(node_id);
        node_value
            .as_object_mut()
            .expect("payload is always an object")
            .remove("at");
        let node_hash = Hash::digest(&canonicalize_to_bytes(&node_value));

        ProvenanceNode {
            node_id,
            node_hash,
            seq: input.seq,
            at: input.at,
            decision_id: input.decision_id,
            event_type: input.event_type,
            actor_id: input.actor_id,
            event_hash: input.event_hash,
            prev_node_id: input.prev_node_id,
            prev_node_hash: input.prev_node_hash,
            state_before_hash: input.state_before_hash,
            state_after_hash: input.state_after_hash,
            meta: input.meta,
        }
    }

    fn recompute_node_id(&self) -> Hash {
        let input_like = json!({
            "seq": self.seq,
            "at": self.at,
            "decision_id": self.decision_id,
            "event_type": self.event_type,
            "actor_id": self.actor_id,
            "event_hash": self.event_hash,
            "prev_node_id": self.prev_node_id,
            "prev_node_hash": self.prev_node_hash,
            "state_before_hash": self.state_before_hash,
            "state_after_hash": self.state_after_hash,
            "meta": self.meta,
        });
        Hash::digest(&canonicalize_to_bytes(&input_like))
    }

    fn recompute_node_hash(&self) -> Hash {
        let mut node_value = json!({
            "seq": self.seq,
            "decision_id": self.decision_id,
            "event_type": self.event_type,
            "actor_id": self.actor_id,
            "event_hash": self.event_hash,
            "prev_node_id": self.prev_node_id,
            "prev_node_hash": self.prev_node_hash,
            "state_before_hash": self.state_before_hash,
            "state_after_hash": self.state_after_hash,
            "meta": self.meta,
            "node_id": self.node_id,
        });
        node_value["node_id"] = json!(self.node_id);
        Hash::digest(&canonicalize_to_bytes(&node_value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvenanceErrorCode {
    BadGenesisLink,
    BrokenPrevId,
    BrokenPrevHash,
    NodeIdMismatch,
    NodeHashMismatch,
    BagTailMismatch,
}

#[derive(Debug, Clone)]
pub struct ProvenanceError {
    pub code: ProvenanceErrorCode,
    pub node_index: Option<usize>,
}

/// The per-decision provenance chain, stored at `artifacts.provenance`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceChain {
    pub nodes: Vec<ProvenanceNode>,
    pub last_node_id: Option<Hash>,
    pub last_node_hash: Option<Hash>,
}

impl ProvenanceChain {
    pub fn append(&mut self, mut input: ProvenanceNodeInput) -> &ProvenanceNode {
        input.prev_node_id = self.last_node_id.clone();
        input.prev_node_hash = self.last_node_hash.clone();
        let node = ProvenanceNode::build(input);
        self.last_node_id = Some(node.node_id.clone());
        self.last_node_hash = Some(node.node_hash.clone());
        self.nodes.push(node);
        self.nodes.last().unwrap()
    }

    /// Walk the chain; see spec §4.5 for the exact failure codes.
    pub fn verify(&self) -> Result<(), ProvenanceError> {
        for (i, node) in self.nodes.iter().enumerate() {
            if i == 0 {
                if node.prev_node_id.is_some() || node.prev_node_hash.is_some() {
                    return Err(ProvenanceError {
                        code: ProvenanceErrorCode::BadGenesisLink,
                        node_index: Some(i),
                    });
                }
            } else {
                let prior = &self.nodes[i - 1];
                if node.prev_node_id.as_ref() != Some(&prior.node_id) {
                    return Err(ProvenanceError {
                        code: ProvenanceErrorCode::BrokenPrevId,
                        node_index: Some(i),
                    });
                }
                if node.prev_node_hash.as_ref() != Some(&prior.node_hash) {
                    return Err(ProvenanceError {
                        code: ProvenanceErrorCode::BrokenPrevHash,
                        node_index: Some(i),
                    });
                }
            }
            if node.recompute_node_id() != node.node_id {
                return Err(ProvenanceError {
                    code: ProvenanceErrorCode::NodeIdMismatch,
                    node_index: Some(i),
                });
            }
            if node.recompute_node_hash() != node.node_hash {
                return Err(ProvenanceError {
                    code: ProvenanceErrorCode::NodeHashMismatch,
                    node_index: Some(i),
                });
            }
        }
        let tail_id = self.nodes.last().map(|n| n.node_id.clone());
        let tail_hash = self.nodes.last().map(|n| n.node_hash.clone());
        if self.last_node_id != tail_id || self.last_node_hash != tail_hash {
            return Err(ProvenanceError {
                code: ProvenanceErrorCode::BagTailMismatch,
                node_index: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(seq: u64, event_type: &str) -> ProvenanceNodeInput {
        ProvenanceNodeInput {
            seq,
            at: Timestamp::from_millis_epoch(1_735_689_600_000 + seq as i64),
            decision_id: "d1".to_string(),
            event_type: event_type.to_string(),
            actor_id: Some("alice".to_string()),
            event_hash: Hash::from_hex("e".repeat(64)),
            prev_node_id: None,
            prev_node_hash: None,
            state_before_hash: Hash::from_hex("b".repeat(64)),
            state_after_hash: Hash::from_hex("a".repeat(64)),
            meta: Map::new(),
        }
    }

    #[test]
    fn chain_of_three_verifies() {
        let mut chain = ProvenanceChain::default();
        chain.append(input(1, "VALIDATE"));
        chain.append(input(2, "SIMULATE"));
        chain.append(input(3, "APPROVE"));
        assert_eq!(chain.nodes.len(), 3);
        assert!(chain.verify().is_ok());
    }

    #[test]
    fn tampering_event_type_breaks_verification() {
        let mut chain = ProvenanceChain::default();
        chain.append(input(1, "VALIDATE"));
        chain.append(input(2, "SIMULATE"));
        chain.append(input(3, "APPROVE"));
        chain.nodes[1].event_type = "HACKED".to_string();
        let err = chain.verify().unwrap_err();
        assert!(matches!(
            err.code,
            ProvenanceErrorCode::NodeHashMismatch
                | ProvenanceErrorCode::NodeIdMismatch
                | ProvenanceErrorCode::BrokenPrevHash
        ));
    }
}
