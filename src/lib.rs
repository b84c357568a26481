//! Swapbridge - constant-product swap quoting and validator-quorum bridge client
//!
//! A session drives two user-facing flows against an external ledger:
//! quoting and executing AMM swaps, and locking funds for release on
//! another chain once enough validators have signed.

pub mod amm;
pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod swap;
pub mod validator;

pub use error::{ClientError, ClientResult, ErrorKind};
pub use session::{Session, SessionServices};
