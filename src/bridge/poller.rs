//! Background status polling for submitted transfers
//!
//! Every tick fetches the status of each non-terminal bridge transfer of
//! the connected wallet and folds the reports into the store. Swaps left
//! pending by a timed-out confirmation wait are resolved the same way.

use crate::error::ClientResult;
use crate::events::SessionEvent;
use crate::ledger::{TransactionReceipt, TransferStatusReport};
use crate::metrics;
use crate::session::SessionServices;
use crate::store::{BridgeTransfer, SwapStatus, SwapTransaction, TransferStatus};

use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of a single polling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Status requests issued
    pub polled: usize,
    /// Records whose status or confirmations moved
    pub updated: usize,
    pub completed: usize,
    pub failed: usize,
    /// Requests that failed or timed out; the record is kept as is
    pub errors: usize,
    pub swaps_resolved: usize,
}

pub struct TransferPoller {
    services: SessionServices,
    interval: Duration,
    request_timeout: Duration,
}

impl TransferPoller {
    pub fn new(services: SessionServices, interval: Duration, request_timeout: Duration) -> Self {
        Self {
            services,
            interval,
            request_timeout,
        }
    }

    /// Poll until `shutdown` turns true or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Transfer poller started (every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.poll_once().await;
                    if summary.updated > 0 || summary.swaps_resolved > 0 {
                        debug!("Poll pass: {:?}", summary);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Transfer poller stopped");
    }

    /// One polling pass over the connected wallet's records
    pub async fn poll_once(&self) -> PollSummary {
        let mut summary = PollSummary::default();
        let Some(owner) = self.services.wallet.address() else {
            return summary;
        };

        if let Err(e) = self.poll_transfers(&owner, &mut summary).await {
            error!("Failed to persist transfer updates: {}", e);
        }
        if let Err(e) = self.poll_swaps(&owner, &mut summary).await {
            error!("Failed to persist swap updates: {}", e);
        }
        summary
    }

    async fn bounded<T, F>(&self, what: &str, hash: &str, call: F) -> Option<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        match timeout(self.request_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("{} for {} failed: {}", what, hash, e);
                metrics::record_poll_error();
                None
            }
            Err(_) => {
                warn!("{} for {} timed out after {:?}", what, hash, self.request_timeout);
                metrics::record_poll_error();
                None
            }
        }
    }

    async fn poll_transfers(&self, owner: &str, summary: &mut PollSummary) -> ClientResult<()> {
        let active: Vec<String> = self
            .services
            .store
            .bridge_transfers(owner)
            .await
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.hash)
            .collect();
        if active.is_empty() {
            return Ok(());
        }
        let requested = active.len();
        summary.polled += requested;

        let ledger = &self.services.ledger;
        let results = join_all(active.iter().map(|hash| {
            self.bounded("Status request", hash, ledger.get_transfer_status(hash))
        }))
        .await;

        let reports: HashMap<String, TransferStatusReport> = active
            .into_iter()
            .zip(results)
            .filter_map(|(hash, report)| report.map(|r| (hash, r)))
            .collect();
        summary.errors += requested - reports.len();
        if reports.is_empty() {
            return Ok(());
        }

        let mut changed: Vec<BridgeTransfer> = Vec::new();
        self.services
            .store
            .update_bridge_transfers(owner, |records| {
                for record in records.iter_mut() {
                    if let Some(report) = reports.get(&record.hash) {
                        if record.apply_report(*report) {
                            changed.push(record.clone());
                        }
                    }
                }
            })
            .await?;

        for transfer in changed {
            summary.updated += 1;
            metrics::record_transfer_transition(transfer.status.as_str());
            if transfer.status.is_terminal() {
                match transfer.status {
                    TransferStatus::Completed => summary.completed += 1,
                    _ => summary.failed += 1,
                }
                info!(
                    "Transfer {} to chain {} {} after {} confirmations",
                    transfer.hash,
                    transfer.target_chain_id,
                    transfer.status.as_str(),
                    transfer.confirmations
                );
            }
            self.services.bus.publish(SessionEvent::TransferUpdated {
                hash: transfer.hash,
                status: transfer.status,
                confirmations: transfer.confirmations,
                required_confirmations: transfer.required_confirmations,
            });
        }
        Ok(())
    }

    async fn poll_swaps(&self, owner: &str, summary: &mut PollSummary) -> ClientResult<()> {
        let pending: Vec<String> = self
            .services
            .store
            .swap_transactions(owner)
            .await
            .into_iter()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.hash)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let ledger = &self.services.ledger;
        let results = join_all(pending.iter().map(|hash| {
            self.bounded("Receipt request", hash, ledger.get_transaction(hash))
        }))
        .await;

        let receipts: HashMap<String, TransactionReceipt> = pending
            .into_iter()
            .zip(results)
            .filter_map(|(hash, receipt)| receipt.flatten().map(|r| (hash, r)))
            .collect();
        if receipts.is_empty() {
            return Ok(());
        }

        let mut resolved: Vec<SwapTransaction> = Vec::new();
        self.services
            .store
            .update_swap_transactions(owner, |records| {
                for record in records.iter_mut().filter(|r| !r.status.is_terminal()) {
                    if let Some(receipt) = receipts.get(&record.hash) {
                        record.status = if receipt.success {
                            SwapStatus::Completed
                        } else {
                            SwapStatus::Failed
                        };
                        resolved.push(record.clone());
                    }
                }
            })
            .await?;

        for swap in resolved {
            summary.swaps_resolved += 1;
            info!("Swap {} resolved as {:?}", swap.hash, swap.status);
            self.services.bus.publish(SessionEvent::SwapResolved {
                hash: swap.hash,
                status: swap.status,
            });
        }
        Ok(())
    }
}
