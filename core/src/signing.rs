//! Signing helpers over decision/ledger/anchor hashes, and the verifier
//! registry used by ledger-entry and decision-seal verification.
//!
//! Grounded on the teacher's `ledger_core::signing` module
//! (`sign_envelope`/`sign_attestation`: an ed25519-dalek signature over a
//! hash, with the verifying key carried alongside).

use decision_ledger_spec::Hash;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::collections::HashMap;

/// Sign a hash, returning the lowercase-hex signature.
pub fn sign_hash(signer: &SigningKey, hash: &Hash) -> String {
    let sig = signer.sign(hash.as_str().as_bytes());
    hex::encode(sig.to_bytes())
}

/// Verify a hex signature over a hash with an explicit verifying key.
pub fn verify_hash(key: &VerifyingKey, hash: &Hash, signature_hex: &str) -> bool {
    let Ok(bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
        return false;
    };
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify(hash.as_str().as_bytes(), &sig).is_ok()
}

/// A signer-verifier registry keyed by `key_id` (spec §4.7: "signature
/// verification via a verifier registry keyed by `key_id`"). Used by the
/// enterprise ledger and decision-seal verification paths; holds only
/// verifying keys, never private key material.
#[derive(Debug, Default, Clone)]
pub struct SignerRegistry {
    keys: HashMap<String, VerifyingKey>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        SignerRegistry::default()
    }

    pub fn register(&mut self, key_id: impl Into<String>, key: VerifyingKey) {
        self.keys.insert(key_id.into(), key);
    }

    pub fn verify(&self, key_id: &str, hash: &Hash, signature_hex: &str) -> bool {
        match self.keys.get(key_id) {
            Some(key) => verify_hash(key, hash, signature_hex),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn signs_and_verifies_a_hash() {
        let signer = SigningKey::generate(&mut OsRng);
        let hash = Hash::from_hex("a".repeat(64));
        let sig_hex = sign_hash(&signer, &hash);
        assert!(verify_hash(&signer.verifying_key(), &hash, &sig_hex));
    }

    #[test]
    fn registry_rejects_unknown_key_id() {
        let registry = SignerRegistry::new();
        let hash = Hash::from_hex("b".repeat(64));
        assert!(!registry.verify("missing", &hash, "00"));
    }

    #[test]
    fn tampered_hash_fails_verification() {
        let signer = SigningKey::generate(&mut OsRng);
        let hash = Hash::from_hex("c".repeat(64));
        let sig_hex = sign_hash(&signer, &hash);
        let other_hash = Hash::from_hex("d".repeat(64));
        assert!(!verify_hash(&signer.verifying_key(), &other_hash, &sig_hex));
    }
}
