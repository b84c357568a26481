//! Pending transfer persistence
//!
//! Handles:
//! - Bridge transfer and swap records per wallet
//! - Full-list rewrites on every change
//! - Recovery from unreadable records
//! - Swap settings per wallet

mod backend;
mod pending;
mod records;

pub use backend::{FileBackend, KeyValueBackend, MemoryBackend};
pub use pending::{PendingTransferStore, BRIDGE_TRANSACTIONS, SWAP_SETTINGS, SWAP_TRANSACTIONS};

#[cfg(test)]
pub(crate) use backend::FlakyBackend;
pub use records::{BridgeTransfer, SwapStatus, SwapTransaction, TransferStatus};
