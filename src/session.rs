//! Client session wiring
//!
//! A session owns one swap controller, one bridge controller and the
//! background transfer poller, all sharing the same ledger, wallet, store
//! and event bus.

use crate::bridge::{BridgeController, BridgeControllerConfig, ChainTable, TransferPoller};
use crate::config::Settings;
use crate::error::{ClientError, ClientResult};
use crate::events::EventBus;
use crate::ledger::{Ledger, Wallet};
use crate::store::{BridgeTransfer, PendingTransferStore, SwapTransaction};
use crate::swap::{SwapController, SwapControllerConfig, SwapSettings};

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Collaborators shared by every component of a session
#[derive(Clone)]
pub struct SessionServices {
    pub ledger: Arc<dyn Ledger>,
    pub wallet: Arc<dyn Wallet>,
    pub store: Arc<PendingTransferStore>,
    pub bus: Arc<EventBus>,
}

pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    services: SessionServices,
    chains: ChainTable,
    swap: Arc<SwapController>,
    bridge: Arc<BridgeController>,
    poller: Arc<TransferPoller>,
    shutdown: watch::Sender<bool>,
    poller_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Build the controllers, reload tracked transfers and start polling
    pub async fn start(settings: &Settings, services: SessionServices) -> ClientResult<Arc<Self>> {
        let chains = ChainTable::from_config(&settings.chains);
        let defaults =
            SwapSettings::from_config(&settings.swap).map_err(|e| ClientError::Config(e.to_string()))?;
        let swap_settings = match services.wallet.address() {
            Some(owner) => Self::saved_swap_settings(&services, &owner)
                .await
                .unwrap_or(defaults),
            None => defaults,
        };

        let swap = Arc::new(SwapController::new(
            SwapControllerConfig::from_settings(settings),
            swap_settings,
            services.clone(),
        ));
        let bridge = Arc::new(BridgeController::new(
            BridgeControllerConfig::from_settings(settings)?,
            chains.clone(),
            services.clone(),
        ));
        let poller = Arc::new(TransferPoller::new(
            services.clone(),
            Duration::from_secs(settings.session.poll_interval_secs),
            Duration::from_secs(settings.session.request_timeout_secs),
        ));

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            services,
            chains,
            swap,
            bridge,
            poller,
            shutdown: watch::channel(false).0,
            poller_handle: Mutex::new(None),
        });

        if let Some(owner) = session.wallet_address() {
            let transfers = session.services.store.bridge_transfers(&owner).await;
            let active = transfers.iter().filter(|t| !t.status.is_terminal()).count();
            info!(
                "Session {} resumed {} tracked transfers ({} in flight) for {}",
                session.id,
                transfers.len(),
                active,
                owner
            );
        }

        let handle = tokio::spawn(session.poller.clone().run(session.shutdown.subscribe()));
        *session.poller_slot() = Some(handle);

        info!("Session {} started", session.id);
        Ok(session)
    }

    async fn saved_swap_settings(services: &SessionServices, owner: &str) -> Option<SwapSettings> {
        let saved = services.store.swap_settings(owner).await?;
        match SwapSettings::new(saved.slippage.get(), saved.deadline_minutes) {
            Ok(settings) => {
                info!(
                    "Restored swap settings for {}: {} slippage, {} min deadline",
                    owner, settings.slippage, settings.deadline_minutes
                );
                Some(settings)
            }
            Err(e) => {
                warn!("Ignoring saved swap settings for {}: {}", owner, e);
                None
            }
        }
    }

    fn poller_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.poller_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn swap(&self) -> &Arc<SwapController> {
        &self.swap
    }

    pub fn bridge(&self) -> &Arc<BridgeController> {
        &self.bridge
    }

    pub fn poller(&self) -> &Arc<TransferPoller> {
        &self.poller
    }

    pub fn chains(&self) -> &ChainTable {
        &self.chains
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.services.bus
    }

    pub fn wallet_address(&self) -> Option<String> {
        self.services.wallet.address()
    }

    /// Bridge transfers of the connected wallet, oldest first
    pub async fn transfers(&self) -> ClientResult<Vec<BridgeTransfer>> {
        self.bridge.transfers().await
    }

    /// Submitted swaps of the connected wallet, oldest first
    pub async fn swaps(&self) -> ClientResult<Vec<SwapTransaction>> {
        let owner = self
            .wallet_address()
            .ok_or(crate::error::ValidationError::WalletNotConnected)?;
        Ok(self.services.store.swap_transactions(&owner).await)
    }

    pub fn is_running(&self) -> bool {
        self.poller_slot()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Cancel scheduled recomputation and stop the poller
    pub async fn shutdown(&self) {
        self.swap.cancel_pending();
        self.bridge.cancel_pending();
        self.shutdown.send_replace(true);

        let handle = self.poller_slot().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Transfer poller ended abnormally: {}", e);
            }
        }
        info!("Session {} stopped", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.poller_slot().take() {
            handle.abort();
        }
    }
}
