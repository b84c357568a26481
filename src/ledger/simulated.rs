//! In-memory devnet ledger
//!
//! Hosts constant-product pools, token balances and the bridge contract's
//! validator protocol. Each status query for a locked transfer adds one
//! confirmation; once the destination chain's requirement is met every
//! whitelisted validator signs and the transfer unlocks on quorum.

use super::{
    Ledger, LockMessage, OutgoingMessage, PoolRef, SwapMessage, TransactionReceipt,
    TransferRequest, TransferStatusReport, Wallet,
};
use crate::amm::pool::{Pool, Reserves};
use crate::amm::{mul_div, BasisPoints, BPS_DENOMINATOR};
use crate::bridge::ChainTable;
use crate::config::Settings;
use crate::error::{ClientError, ClientResult, ProtocolError, QuoteError, ValidationError};
use crate::validator::{
    AuthorizationProtocol, AuthorizationState, KeccakAttestation, LockedTransfer,
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Contract status codes returned by `get_transfer_status`
const STATUS_PENDING: u8 = 0;
const STATUS_CONFIRMING: u8 = 1;
const STATUS_COMPLETED: u8 = 2;
const STATUS_FAILED: u8 = 3;

/// Bridge-side view of a lock
#[derive(Debug, Clone, Copy)]
struct TrackedLock {
    target_chain_id: u32,
    confirmations: u32,
}

/// Devnet implementation of [`Ledger`] and [`Wallet`]
pub struct SimulatedLedger {
    wallet: RwLock<Option<String>>,
    native_token: String,
    router_address: String,
    bridge_address: String,
    base_fee: u128,
    percentage_fee: BasisPoints,
    pools: DashMap<String, Pool>,
    /// (token, owner) -> balance
    balances: DashMap<(String, String), u128>,
    locks: DashMap<String, TrackedLock>,
    receipts: DashMap<String, TransactionReceipt>,
    protocol: Arc<AuthorizationProtocol>,
    chains: ChainTable,
    nonce: AtomicU64,
}

impl SimulatedLedger {
    /// Seed the ledger from the `[devnet]` section
    pub fn from_settings(settings: &Settings) -> ClientResult<Self> {
        let devnet = &settings.devnet;
        let protocol = Arc::new(AuthorizationProtocol::new(
            &settings.validators,
            Arc::new(KeccakAttestation),
        )?);
        let percentage_fee = BasisPoints::new(settings.bridge.percentage_fee_bps)
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let pools = DashMap::new();
        for seed in &devnet.pools {
            let fee = BasisPoints::new(seed.fee_bps)
                .map_err(|e| ClientError::Config(format!("pool {}: {}", seed.address, e)))?;
            let pool = Pool::new(
                seed.address.clone(),
                seed.token_a.clone(),
                seed.token_b.clone(),
                seed.reserve_a,
                seed.reserve_b,
                fee,
            )
            .map_err(|e| ClientError::Config(format!("pool {}: {}", seed.address, e)))?;
            pools.insert(seed.address.clone(), pool);
        }

        let balances = DashMap::new();
        for seed in &devnet.balances {
            balances.insert((seed.token.clone(), devnet.wallet_address.clone()), seed.amount);
        }

        info!(
            "Simulated ledger seeded with {} pools and {} balances",
            pools.len(),
            balances.len()
        );

        Ok(Self {
            wallet: RwLock::new(Some(devnet.wallet_address.clone())),
            native_token: devnet.native_token.clone(),
            router_address: settings.swap.router_address.clone(),
            bridge_address: settings.bridge.contract_address.clone(),
            base_fee: devnet.base_fee,
            percentage_fee,
            pools,
            balances,
            locks: DashMap::new(),
            receipts: DashMap::new(),
            protocol,
            chains: ChainTable::from_config(&settings.chains),
            nonce: AtomicU64::new(0),
        })
    }

    /// Bridge contract model backing this ledger
    pub fn protocol(&self) -> &Arc<AuthorizationProtocol> {
        &self.protocol
    }

    pub fn connect(&self, address: impl Into<String>) {
        if let Ok(mut wallet) = self.wallet.write() {
            *wallet = Some(address.into());
        }
    }

    pub fn disconnect(&self) {
        if let Ok(mut wallet) = self.wallet.write() {
            *wallet = None;
        }
    }

    /// Have the bridge contract refuse a lock
    pub fn reject_transfer(&self, hash: &str) -> ClientResult<()> {
        self.protocol.reject(hash)
    }

    pub fn pool(&self, address: &str) -> Option<Pool> {
        self.pools.get(address).map(|p| p.clone())
    }

    fn balance(&self, token: &str, owner: &str) -> u128 {
        self.balances
            .get(&(token.to_string(), owner.to_string()))
            .map(|b| *b)
            .unwrap_or(0)
    }

    fn debit(&self, token: &str, owner: &str, amount: u128) -> ClientResult<()> {
        let mut balance = self
            .balances
            .entry((token.to_string(), owner.to_string()))
            .or_insert(0);
        if *balance < amount {
            return Err(ClientError::Execution(format!(
                "insufficient {} balance: have {}, need {}",
                token, *balance, amount
            )));
        }
        *balance -= amount;
        Ok(())
    }

    fn credit(&self, token: &str, owner: &str, amount: u128) {
        let mut balance = self
            .balances
            .entry((token.to_string(), owner.to_string()))
            .or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    fn next_hash(&self, message: &OutgoingMessage) -> String {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let digest = Keccak256::new()
            .chain_update(message.encode())
            .chain_update(nonce.to_be_bytes())
            .finalize();
        hex::encode(digest)
    }

    fn apply_swap(&self, owner: &str, swap: &SwapMessage, now: i64) -> Result<u128, String> {
        if swap.deadline < now {
            return Err("deadline passed".to_string());
        }

        let mut pool = self
            .pools
            .iter_mut()
            .find(|p| p.trades(&swap.token_in, &swap.token_out))
            .ok_or_else(|| format!("no pool for {}/{}", swap.token_in, swap.token_out))?;

        self.debit(&swap.token_in, owner, swap.amount_in)
            .map_err(|e| e.to_string())?;
        match pool.swap(&swap.token_in, swap.amount_in, swap.min_out) {
            Ok(outcome) => {
                self.credit(&swap.token_out, owner, outcome.amount_out);
                Ok(outcome.amount_out)
            }
            Err(e) => {
                self.credit(&swap.token_in, owner, swap.amount_in);
                Err(e.to_string())
            }
        }
    }

    fn apply_lock(&self, hash: &str, lock: &LockMessage) -> ClientResult<()> {
        let fee = mul_div(lock.amount, self.percentage_fee.get() as u128, BPS_DENOMINATOR)?;
        self.protocol.lock(
            hash,
            LockedTransfer {
                amount: lock.amount,
                fee,
                recipient: lock.recipient.clone(),
                target_chain_id: lock.target_chain_id,
            },
        )?;
        self.locks.insert(
            hash.to_string(),
            TrackedLock {
                target_chain_id: lock.target_chain_id,
                confirmations: 0,
            },
        );
        Ok(())
    }

    /// Every whitelisted validator attests, then the contract unlocks on quorum
    fn authorize(&self, hash: &str) {
        let Some(digest) = self.protocol.digest(hash) else {
            return;
        };
        for validator in self.protocol.validators() {
            let signature = KeccakAttestation::sign(validator, &digest);
            if let Err(e) = self.protocol.submit_signature(validator, hash, &signature) {
                debug!("Validator {} did not sign {}: {}", validator, hash, e);
            }
        }
        if let Err(e) = self.protocol.unlock(hash) {
            warn!("Unlock of {} refused: {}", hash, e);
        }
    }
}

#[async_trait]
impl Ledger for SimulatedLedger {
    async fn get_pool(&self, token_in: &str, token_out: &str) -> ClientResult<PoolRef> {
        self.pools
            .iter()
            .find(|p| p.trades(token_in, token_out))
            .map(|p| PoolRef {
                address: p.address.clone(),
                token_in: token_in.to_string(),
                token_out: token_out.to_string(),
                fee_bps: p.fee_bps,
            })
            .ok_or_else(|| {
                QuoteError::PoolUnreachable(format!("no pool for {}/{}", token_in, token_out))
                    .into()
            })
    }

    async fn get_reserves(&self, pool: &PoolRef) -> ClientResult<Reserves> {
        let found = self
            .pools
            .get(&pool.address)
            .ok_or_else(|| QuoteError::PoolUnreachable(pool.address.clone()))?;
        found
            .reserves_for(&pool.token_in)
            .ok_or_else(|| {
                QuoteError::PoolUnreachable(format!("{} not in {}", pool.token_in, pool.address))
                    .into()
            })
    }

    async fn get_base_fee(&self) -> ClientResult<u128> {
        Ok(self.base_fee)
    }

    async fn get_wallet_balance(&self, token: &str, owner: &str) -> ClientResult<u128> {
        Ok(self.balance(token, owner))
    }

    async fn get_transfer_status(&self, hash: &str) -> ClientResult<TransferStatusReport> {
        let (confirmations, target_chain_id) = {
            let mut lock = self
                .locks
                .get_mut(hash)
                .ok_or_else(|| ProtocolError::TransferNotFound {
                    hash: hash.to_string(),
                })?;
            let final_state = self
                .protocol
                .state(hash)
                .map(|s| s.is_final())
                .unwrap_or(false);
            if !final_state {
                lock.confirmations = lock.confirmations.saturating_add(1);
            }
            (lock.confirmations, lock.target_chain_id)
        };

        if confirmations >= self.chains.required_confirmations(target_chain_id) {
            if let Some(AuthorizationState::Locked | AuthorizationState::SignatureCollecting) =
                self.protocol.state(hash)
            {
                self.authorize(hash);
            }
        }

        let status_code = match self.protocol.state(hash) {
            Some(AuthorizationState::Unlocked) => STATUS_COMPLETED,
            Some(AuthorizationState::Rejected) => STATUS_FAILED,
            _ if confirmations > 0 => STATUS_CONFIRMING,
            _ => STATUS_PENDING,
        };

        Ok(TransferStatusReport {
            confirmations,
            status_code,
        })
    }

    async fn get_transaction(&self, hash: &str) -> ClientResult<Option<TransactionReceipt>> {
        Ok(self.receipts.get(hash).map(|r| r.clone()))
    }
}

#[async_trait]
impl Wallet for SimulatedLedger {
    fn address(&self) -> Option<String> {
        self.wallet.read().ok().and_then(|w| w.clone())
    }

    async fn send(&self, request: TransferRequest) -> ClientResult<String> {
        let owner = self.address().ok_or(ValidationError::WalletNotConnected)?;
        let now = Utc::now().timestamp();
        if request.valid_until < now {
            return Err(ClientError::Execution("message validity expired".to_string()));
        }

        let expected = match request.message {
            OutgoingMessage::Lock(_) => &self.bridge_address,
            OutgoingMessage::Swap(_) => &self.router_address,
        };
        if &request.destination != expected {
            return Err(ClientError::Execution(format!(
                "unknown destination {}",
                request.destination
            )));
        }

        self.debit(&self.native_token, &owner, request.value)?;
        let hash = self.next_hash(&request.message);

        let receipt = match &request.message {
            OutgoingMessage::Lock(lock) => {
                if let Err(e) = self.apply_lock(&hash, lock) {
                    self.credit(&self.native_token, &owner, request.value);
                    return Err(e);
                }
                info!(
                    "Locked {} for chain {} ({})",
                    lock.amount, lock.target_chain_id, hash
                );
                TransactionReceipt {
                    hash: hash.clone(),
                    success: true,
                    error: None,
                }
            }
            OutgoingMessage::Swap(swap) => match self.apply_swap(&owner, swap, now) {
                Ok(amount_out) => {
                    info!(
                        "Swapped {} {} for {} {} ({})",
                        swap.amount_in, swap.token_in, amount_out, swap.token_out, hash
                    );
                    TransactionReceipt {
                        hash: hash.clone(),
                        success: true,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Swap {} failed on chain: {}", hash, e);
                    TransactionReceipt {
                        hash: hash.clone(),
                        success: false,
                        error: Some(e),
                    }
                }
            },
        };

        self.receipts.insert(hash.clone(), receipt);
        Ok(hash)
    }
}
