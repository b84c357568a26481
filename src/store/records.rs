//! Persisted swap and bridge transaction records

use crate::ledger::TransferStatusReport;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a bridge transfer as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Confirming,
    Completed,
    Failed,
}

impl TransferStatus {
    /// Decode the bridge contract's status code; unknown codes read as pending
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TransferStatus::Confirming,
            2 => TransferStatus::Completed,
            3 => TransferStatus::Failed,
            _ => TransferStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Confirming => "confirming",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

/// A lock submitted on the source chain, tracked until terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransfer {
    pub hash: String,
    pub source_chain_id: u32,
    pub target_chain_id: u32,
    /// Nano units
    pub amount: u128,
    pub status: TransferStatus,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub created_at: DateTime<Utc>,
}

impl BridgeTransfer {
    pub fn new(
        hash: String,
        source_chain_id: u32,
        target_chain_id: u32,
        amount: u128,
        required_confirmations: u32,
    ) -> Self {
        Self {
            hash,
            source_chain_id,
            target_chain_id,
            amount,
            status: TransferStatus::Pending,
            confirmations: 0,
            required_confirmations,
            created_at: Utc::now(),
        }
    }

    /// Fold a status report into this record. Returns whether anything changed.
    ///
    /// Terminal records are frozen, confirmations never decrease, and a
    /// confirming transfer does not fall back to pending.
    pub fn apply_report(&mut self, report: TransferStatusReport) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let confirmations = self.confirmations.max(report.confirmations);
        let reported = TransferStatus::from_code(report.status_code);
        let status = match (self.status, reported) {
            (TransferStatus::Confirming, TransferStatus::Pending) => TransferStatus::Confirming,
            (_, reported) => reported,
        };

        let changed = confirmations != self.confirmations || status != self.status;
        self.confirmations = confirmations;
        self.status = status;
        changed
    }
}

/// Outcome of a submitted swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    Pending,
    Completed,
    Failed,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SwapStatus::Pending)
    }
}

/// A submitted swap message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTransaction {
    pub hash: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u128,
    pub min_out: u128,
    pub deadline: i64,
    pub status: SwapStatus,
    pub created_at: DateTime<Utc>,
}
