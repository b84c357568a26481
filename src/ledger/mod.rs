//! External ledger and wallet surface
//!
//! The client never talks to chain nodes directly. Read calls go through
//! [`Ledger`]; signed submissions go through [`Wallet`]. A simulated
//! implementation of both lives in [`simulated`].

pub mod simulated;

pub use simulated::SimulatedLedger;

use crate::amm::pool::Reserves;
use crate::amm::BasisPoints;
use crate::error::ClientResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opcode shared by the lock and swap messages
pub const OP_TRANSFER: u32 = 1;

/// A pool resolved for a swap direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRef {
    pub address: String,
    pub token_in: String,
    pub token_out: String,
    /// Fee the pool retains on every input
    pub fee_bps: BasisPoints,
}

/// Raw transfer status as reported by the bridge contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatusReport {
    pub confirmations: u32,
    pub status_code: u8,
}

/// Inclusion result for a submitted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub hash: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Read-only ledger calls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Resolve the pool trading `token_in` for `token_out`
    async fn get_pool(&self, token_in: &str, token_out: &str) -> ClientResult<PoolRef>;

    /// Reserves oriented for the pool's swap direction
    async fn get_reserves(&self, pool: &PoolRef) -> ClientResult<Reserves>;

    /// Base bridge fee in nano units
    async fn get_base_fee(&self) -> ClientResult<u128>;

    async fn get_wallet_balance(&self, token: &str, owner: &str) -> ClientResult<u128>;

    async fn get_transfer_status(&self, hash: &str) -> ClientResult<TransferStatusReport>;

    /// `None` while the message has not been included yet
    async fn get_transaction(&self, hash: &str) -> ClientResult<Option<TransactionReceipt>>;
}

/// Signing wallet connected to the session
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Connected account address, `None` when disconnected
    fn address(&self) -> Option<String>;

    /// Sign and submit once; returns the message hash
    async fn send(&self, request: TransferRequest) -> ClientResult<String>;
}

/// Lock funds on the source chain for release on `target_chain_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMessage {
    pub amount: u128,
    pub target_chain_id: u32,
    pub recipient: String,
}

/// Swap `amount_in` of `token_in` for at least `min_out` of `token_out`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapMessage {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u128,
    pub min_out: u128,
    /// Unix seconds
    pub deadline: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Lock(LockMessage),
    Swap(SwapMessage),
}

impl OutgoingMessage {
    pub fn op(&self) -> u32 {
        OP_TRANSFER
    }

    /// Big-endian body layout: op, then fields in declaration order.
    /// Strings are length-prefixed with a u16.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.op().to_be_bytes());
        match self {
            OutgoingMessage::Lock(lock) => {
                out.extend_from_slice(&lock.amount.to_be_bytes());
                out.extend_from_slice(&lock.target_chain_id.to_be_bytes());
                put_str(&mut out, &lock.recipient);
            }
            OutgoingMessage::Swap(swap) => {
                put_str(&mut out, &swap.token_in);
                put_str(&mut out, &swap.token_out);
                out.extend_from_slice(&swap.amount_in.to_be_bytes());
                out.extend_from_slice(&swap.min_out.to_be_bytes());
                out.extend_from_slice(&swap.deadline.to_be_bytes());
            }
        }
        out
    }
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&bytes[..len]);
}

/// A message plus the value attached to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Contract receiving the message
    pub destination: String,
    /// Attached value in nano units
    pub value: u128,
    /// Unix seconds after which the wallet must not submit
    pub valid_until: i64,
    pub message: OutgoingMessage,
}

/// Wallet whose sends never complete
#[cfg(test)]
pub(crate) struct StalledWallet(pub(crate) String);

#[cfg(test)]
#[async_trait]
impl Wallet for StalledWallet {
    fn address(&self) -> Option<String> {
        Some(self.0.clone())
    }

    async fn send(&self, _request: TransferRequest) -> ClientResult<String> {
        std::future::pending().await
    }
}
