//! Cross-chain bridge transfers
//!
//! Handles:
//! - Chain table lookups and per-chain amount limits
//! - Fee estimation and single-submission locks
//! - Status polling until each transfer is terminal

pub mod chains;
pub mod controller;
pub mod poller;

pub use chains::{Chain, ChainTable, DEFAULT_REQUIRED_CONFIRMATIONS};
pub use controller::{
    BridgeController, BridgeControllerConfig, BridgeFees, BridgeSnapshot, BridgeState,
};
pub use poller::{PollSummary, TransferPoller};
