//! Unlock digests and validator signature checks

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Length of a validator signature in bytes
pub const SIGNATURE_LEN: usize = 64;

/// Identity of a bridge validator (its wallet address)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorId(String);

impl ValidatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ValidatorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Message a validator signs to authorize an unlock:
/// `keccak256(hash || amount_be || target_chain_be || recipient)`
pub fn unlock_digest(hash: &str, amount: u128, target_chain_id: u32, recipient: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(hash.as_bytes());
    hasher.update(amount.to_be_bytes());
    hasher.update(target_chain_id.to_be_bytes());
    hasher.update(recipient.as_bytes());
    hasher.finalize().into()
}

/// Signature check enforced by the bridge contract
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, validator: &ValidatorId, digest: &[u8; 32], signature: &[u8]) -> bool;
}

/// Rejects malformed signatures: wrong length or all zeros
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralVerifier;

impl SignatureVerifier for StructuralVerifier {
    fn verify(&self, _validator: &ValidatorId, _digest: &[u8; 32], signature: &[u8]) -> bool {
        signature.len() == SIGNATURE_LEN && signature.iter().any(|&b| b != 0)
    }
}

/// Devnet attestation scheme: the signature binds the validator identity to
/// the digest as `keccak256(id || digest) || keccak256(digest || id)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeccakAttestation;

impl KeccakAttestation {
    pub fn sign(validator: &ValidatorId, digest: &[u8; 32]) -> Vec<u8> {
        let id = validator.as_str().as_bytes();
        let head = Keccak256::new().chain_update(id).chain_update(digest).finalize();
        let tail = Keccak256::new().chain_update(digest).chain_update(id).finalize();

        let mut out = Vec::with_capacity(SIGNATURE_LEN);
        out.extend_from_slice(&head);
        out.extend_from_slice(&tail);
        out
    }
}

impl SignatureVerifier for KeccakAttestation {
    fn verify(&self, validator: &ValidatorId, digest: &[u8; 32], signature: &[u8]) -> bool {
        StructuralVerifier.verify(validator, digest, signature)
            && Self::sign(validator, digest) == signature
    }
}
