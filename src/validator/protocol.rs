//! Quorum authorization for bridge unlocks
//!
//! Per transfer hash the contract moves through
//! `Locked → SignatureCollecting → Authorized → Unlocked`, with `Rejected`
//! reachable from any state before `Unlocked`. Every transition for a hash
//! happens under that hash's map entry lock, so an unlock succeeds at most
//! once even when submissions race.

use super::signature::{unlock_digest, SignatureVerifier, ValidatorId};
use crate::config::ValidatorConfig;
use crate::error::{ClientError, ClientResult, ProtocolError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Authorization state of a locked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    Locked,
    SignatureCollecting,
    Authorized,
    Unlocked,
    Rejected,
}

impl AuthorizationState {
    pub fn is_final(self) -> bool {
        matches!(self, AuthorizationState::Unlocked | AuthorizationState::Rejected)
    }
}

/// Funds locked on the source chain awaiting release on the target chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedTransfer {
    pub amount: u128,
    pub fee: u128,
    pub recipient: String,
    pub target_chain_id: u32,
}

/// Signatures collected for one transfer hash
#[derive(Debug, Clone)]
pub struct SignatureSet {
    transfer: LockedTransfer,
    digest: [u8; 32],
    signers: BTreeSet<ValidatorId>,
    state: AuthorizationState,
    processed: bool,
}

impl SignatureSet {
    pub fn state(&self) -> AuthorizationState {
        self.state
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    pub fn count(&self) -> usize {
        self.signers.len()
    }

    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }

    pub fn transfer(&self) -> &LockedTransfer {
        &self.transfer
    }
}

/// Proof of a successful unlock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockReceipt {
    pub hash: String,
    pub amount: u128,
    pub recipient: String,
    pub target_chain_id: u32,
    pub signers: Vec<ValidatorId>,
}

/// Bridge contract rules for turning a validator quorum into an unlock
pub struct AuthorizationProtocol {
    min_validators: usize,
    whitelist: BTreeSet<ValidatorId>,
    entries: DashMap<String, SignatureSet>,
    /// Percentage fees accrued on lock, awaiting distribution
    fee_pool: Mutex<u128>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl AuthorizationProtocol {
    /// Create the protocol from the validator whitelist and quorum size
    pub fn new(config: &ValidatorConfig, verifier: Arc<dyn SignatureVerifier>) -> ClientResult<Self> {
        let whitelist: BTreeSet<ValidatorId> =
            config.whitelist.iter().cloned().map(ValidatorId::new).collect();

        if config.min_validators == 0 || config.min_validators > whitelist.len() {
            return Err(ClientError::Config(format!(
                "min_validators must be in [1, {}], got {}",
                whitelist.len(),
                config.min_validators
            )));
        }

        Ok(Self {
            min_validators: config.min_validators,
            whitelist,
            entries: DashMap::new(),
            fee_pool: Mutex::new(0),
            verifier,
        })
    }

    pub fn min_validators(&self) -> usize {
        self.min_validators
    }

    pub fn is_validator(&self, validator: &ValidatorId) -> bool {
        self.whitelist.contains(validator)
    }

    pub fn validators(&self) -> impl Iterator<Item = &ValidatorId> {
        self.whitelist.iter()
    }

    /// Record a lock and accrue its fee to the shared pool
    pub fn lock(&self, hash: &str, transfer: LockedTransfer) -> ClientResult<()> {
        match self.entries.entry(hash.to_string()) {
            Entry::Occupied(_) => Err(ProtocolError::AlreadyProcessed {
                hash: hash.to_string(),
            }
            .into()),
            Entry::Vacant(slot) => {
                let digest = unlock_digest(
                    hash,
                    transfer.amount,
                    transfer.target_chain_id,
                    &transfer.recipient,
                );
                let fee = transfer.fee;
                slot.insert(SignatureSet {
                    transfer,
                    digest,
                    signers: BTreeSet::new(),
                    state: AuthorizationState::Locked,
                    processed: false,
                });

                let mut pool = self
                    .fee_pool
                    .lock()
                    .map_err(|_| ClientError::lock_poisoned("fee pool"))?;
                *pool = pool.saturating_add(fee);

                debug!("Locked transfer {} (fee {})", hash, fee);
                Ok(())
            }
        }
    }

    /// Add a validator signature for `hash`; returns the distinct signer count.
    ///
    /// A repeated signature from the same validator leaves the count unchanged.
    pub fn submit_signature(
        &self,
        validator: &ValidatorId,
        hash: &str,
        signature: &[u8],
    ) -> ClientResult<usize> {
        if !self.is_validator(validator) {
            warn!("Rejected signature from non-validator {}", validator);
            return Err(ProtocolError::Unauthorized {
                validator: validator.to_string(),
            }
            .into());
        }

        let mut entry = self.entries.get_mut(hash).ok_or_else(|| ProtocolError::TransferNotFound {
            hash: hash.to_string(),
        })?;

        match entry.state {
            AuthorizationState::Unlocked => {
                return Err(ProtocolError::AlreadyProcessed {
                    hash: hash.to_string(),
                }
                .into())
            }
            AuthorizationState::Rejected => {
                return Err(ProtocolError::TransferRejected {
                    hash: hash.to_string(),
                }
                .into())
            }
            _ => {}
        }

        if !self.verifier.verify(validator, &entry.digest, signature) {
            return Err(ProtocolError::InvalidSignature {
                validator: validator.to_string(),
            }
            .into());
        }

        if entry.signers.insert(validator.clone()) {
            entry.state = if entry.signers.len() >= self.min_validators {
                AuthorizationState::Authorized
            } else {
                AuthorizationState::SignatureCollecting
            };
            debug!(
                "Validator {} signed {} ({}/{})",
                validator,
                hash,
                entry.signers.len(),
                self.min_validators
            );
        }

        Ok(entry.signers.len())
    }

    /// Release the locked funds once a quorum has signed. Succeeds at most once per hash.
    pub fn unlock(&self, hash: &str) -> ClientResult<UnlockReceipt> {
        let mut entry = self.entries.get_mut(hash).ok_or_else(|| ProtocolError::TransferNotFound {
            hash: hash.to_string(),
        })?;

        if entry.processed {
            return Err(ProtocolError::AlreadyProcessed {
                hash: hash.to_string(),
            }
            .into());
        }
        if entry.state == AuthorizationState::Rejected {
            return Err(ProtocolError::TransferRejected {
                hash: hash.to_string(),
            }
            .into());
        }
        if entry.signers.len() < self.min_validators {
            return Err(ProtocolError::InsufficientValidators {
                have: entry.signers.len(),
                need: self.min_validators,
            }
            .into());
        }

        entry.processed = true;
        entry.state = AuthorizationState::Unlocked;
        crate::metrics::record_unlock();

        info!(
            "Unlocked transfer {} with {} signatures",
            hash,
            entry.signers.len()
        );

        Ok(UnlockReceipt {
            hash: hash.to_string(),
            amount: entry.transfer.amount,
            recipient: entry.transfer.recipient.clone(),
            target_chain_id: entry.transfer.target_chain_id,
            signers: entry.signers.iter().cloned().collect(),
        })
    }

    /// Refuse a transfer that has not been unlocked yet
    pub fn reject(&self, hash: &str) -> ClientResult<()> {
        let mut entry = self.entries.get_mut(hash).ok_or_else(|| ProtocolError::TransferNotFound {
            hash: hash.to_string(),
        })?;

        if entry.processed {
            return Err(ProtocolError::AlreadyProcessed {
                hash: hash.to_string(),
            }
            .into());
        }
        entry.state = AuthorizationState::Rejected;
        warn!("Transfer {} rejected", hash);
        Ok(())
    }

    pub fn state(&self, hash: &str) -> Option<AuthorizationState> {
        self.entries.get(hash).map(|e| e.state)
    }

    pub fn digest(&self, hash: &str) -> Option<[u8; 32]> {
        self.entries.get(hash).map(|e| e.digest)
    }

    /// Validators that have signed `hash`
    pub fn signatures(&self, hash: &str) -> Vec<ValidatorId> {
        self.entries
            .get(hash)
            .map(|e| e.signers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn collected_fees(&self) -> ClientResult<u128> {
        self.fee_pool
            .lock()
            .map(|pool| *pool)
            .map_err(|_| ClientError::lock_poisoned("fee pool"))
    }

    /// Split the fee pool evenly across the active whitelisted validators.
    ///
    /// The indivisible remainder stays in the pool. Lock and unlock state is
    /// not touched.
    pub fn distribute_fees(&self, active: &[ValidatorId]) -> ClientResult<BTreeMap<ValidatorId, u128>> {
        let recipients: BTreeSet<&ValidatorId> =
            active.iter().filter(|v| self.is_validator(v)).collect();
        if recipients.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut pool = self
            .fee_pool
            .lock()
            .map_err(|_| ClientError::lock_poisoned("fee pool"))?;
        let share = *pool / recipients.len() as u128;
        *pool -= share * recipients.len() as u128;

        info!(
            "Distributed {} to each of {} validators ({} left in pool)",
            share,
            recipients.len(),
            *pool
        );

        Ok(recipients.into_iter().map(|v| (v.clone(), share)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::signature::{KeccakAttestation, StructuralVerifier};

    fn protocol() -> AuthorizationProtocol {
        let config = ValidatorConfig {
            min_validators: 3,
            whitelist: vec!["A".into(), "B".into(), "C".into(), "D".into()],
        };
        AuthorizationProtocol::new(&config, Arc::new(KeccakAttestation)).unwrap()
    }

    fn locked(p: &AuthorizationProtocol, hash: &str) {
        p.lock(
            hash,
            LockedTransfer {
                amount: 10_000_000_000,
                fee: 30_000_000,
                recipient: "EQR".into(),
                target_chain_id: 2,
            },
        )
        .unwrap();
    }

    fn sign(p: &AuthorizationProtocol, who: &str, hash: &str) -> ClientResult<usize> {
        let v = ValidatorId::from(who);
        let sig = KeccakAttestation::sign(&v, &p.digest(hash).unwrap());
        p.submit_signature(&v, hash, &sig)
    }

    #[test]
    fn test_quorum_scenario() {
        let p = protocol();
        locked(&p, "h1");
        assert_eq!(p.state("h1"), Some(AuthorizationState::Locked));

        sign(&p, "A", "h1").unwrap();
        sign(&p, "B", "h1").unwrap();
        assert_eq!(p.state("h1"), Some(AuthorizationState::SignatureCollecting));
        assert_eq!(
            p.unlock("h1").unwrap_err(),
            ClientError::Protocol(ProtocolError::InsufficientValidators { have: 2, need: 3 })
        );

        sign(&p, "C", "h1").unwrap();
        assert_eq!(p.state("h1"), Some(AuthorizationState::Authorized));

        let receipt = p.unlock("h1").unwrap();
        assert_eq!(receipt.signers.len(), 3);
        assert_eq!(p.state("h1"), Some(AuthorizationState::Unlocked));

        assert_eq!(
            p.unlock("h1").unwrap_err(),
            ClientError::Protocol(ProtocolError::AlreadyProcessed { hash: "h1".into() })
        );
    }

    #[test]
    fn test_duplicate_signature_does_not_count() {
        let p = protocol();
        locked(&p, "h1");
        assert_eq!(sign(&p, "A", "h1").unwrap(), 1);
        assert_eq!(sign(&p, "A", "h1").unwrap(), 1);
        assert_eq!(p.signatures("h1"), vec![ValidatorId::from("A")]);
    }

    #[test]
    fn test_non_validator_is_unauthorized() {
        let p = protocol();
        locked(&p, "h1");
        assert!(matches!(
            sign(&p, "Mallory", "h1"),
            Err(ClientError::Protocol(ProtocolError::Unauthorized { .. }))
        ));
        assert!(p.signatures("h1").is_empty());
    }

    #[test]
    fn test_invalid_signature() {
        let p = protocol();
        locked(&p, "h1");
        let err = p
            .submit_signature(&ValidatorId::from("A"), "h1", b"invalid_signature")
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_signature_after_unlock_is_refused() {
        let p = protocol();
        locked(&p, "h1");
        for v in ["A", "B", "C"] {
            sign(&p, v, "h1").unwrap();
        }
        p.unlock("h1").unwrap();
        assert!(matches!(
            sign(&p, "D", "h1"),
            Err(ClientError::Protocol(ProtocolError::AlreadyProcessed { .. }))
        ));
        assert_eq!(p.signatures("h1").len(), 3);
    }

    #[test]
    fn test_reject_before_unlock_only() {
        let p = protocol();
        locked(&p, "h1");
        sign(&p, "A", "h1").unwrap();
        p.reject("h1").unwrap();
        assert_eq!(p.state("h1"), Some(AuthorizationState::Rejected));
        assert!(matches!(
            p.unlock("h1"),
            Err(ClientError::Protocol(ProtocolError::TransferRejected { .. }))
        ));

        locked(&p, "h2");
        for v in ["A", "B", "C"] {
            sign(&p, v, "h2").unwrap();
        }
        p.unlock("h2").unwrap();
        assert!(p.reject("h2").is_err());
        assert_eq!(p.state("h2"), Some(AuthorizationState::Unlocked));
    }

    #[test]
    fn test_relock_same_hash_refused() {
        let p = protocol();
        locked(&p, "h1");
        let again = p.lock(
            "h1",
            LockedTransfer {
                amount: 1,
                fee: 0,
                recipient: "EQR".into(),
                target_chain_id: 2,
            },
        );
        assert!(again.is_err());
        assert_eq!(p.collected_fees().unwrap(), 30_000_000);
    }

    #[test]
    fn test_concurrent_unlocks_succeed_once() {
        let p = Arc::new(protocol());
        locked(&p, "h1");
        for v in ["A", "B", "C", "D"] {
            sign(&p, v, "h1").unwrap();
        }

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let p = p.clone();
                std::thread::spawn(move || p.unlock("h1").is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_fee_distribution_pro_rata() {
        let p = protocol();
        locked(&p, "h1");
        locked(&p, "h2");
        assert_eq!(p.collected_fees().unwrap(), 60_000_000);

        let active = vec![
            ValidatorId::from("A"),
            ValidatorId::from("B"),
            ValidatorId::from("C"),
            ValidatorId::from("C"),
            ValidatorId::from("Mallory"),
        ];
        let payouts = p.distribute_fees(&active).unwrap();
        assert_eq!(payouts.len(), 3);
        assert!(payouts.values().all(|&share| share == 20_000_000));
        assert_eq!(p.collected_fees().unwrap(), 0);
        assert_eq!(p.state("h1"), Some(AuthorizationState::Locked));
    }

    #[test]
    fn test_quorum_must_fit_whitelist() {
        let config = ValidatorConfig {
            min_validators: 5,
            whitelist: vec!["A".into(), "B".into()],
        };
        assert!(AuthorizationProtocol::new(&config, Arc::new(StructuralVerifier)).is_err());
    }
}
