//! Validator authorization protocol
//!
//! Models the bridge contract's rules on the target chain:
//! - Whitelisted validators sign an unlock digest per transfer hash
//! - Duplicate signatures do not increase the count
//! - Unlock is permitted once the quorum is reached, and at most once
//! - Lock fees accrue to a pool shared pro rata among active validators

pub mod protocol;
pub mod signature;

pub use protocol::{AuthorizationProtocol, AuthorizationState, LockedTransfer, UnlockReceipt};
pub use signature::{
    unlock_digest, KeccakAttestation, SignatureVerifier, StructuralVerifier, ValidatorId,
};
