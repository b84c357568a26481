//! Bridge transfer controller
//!
//! Validates a transfer request against the chain table, estimates fees,
//! and submits a single lock per execution. Successful locks are appended
//! to the pending transfer store for the poller to track.

use super::chains::ChainTable;
use crate::amm::{from_nano, mul_div, parse_amount, BasisPoints, BPS_DENOMINATOR};
use crate::config::Settings;
use crate::error::{ClientError, ClientResult, ErrorBody, QuoteError, ValidationError};
use crate::events::SessionEvent;
use crate::ledger::{LockMessage, OutgoingMessage, TransferRequest};
use crate::metrics;
use crate::scheduler::{DebounceScheduler, RequestSequencer};
use crate::session::SessionServices;
use crate::store::BridgeTransfer;

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    #[default]
    Idle,
    Estimating,
    FeesReady,
    Submitting,
}

impl BridgeState {
    pub fn is_busy(self) -> bool {
        self == BridgeState::Submitting
    }
}

/// Fee breakdown for a lock, in nano units of the source chain's token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeFees {
    pub base_fee: u128,
    pub percentage_fee: u128,
    pub total_fee: u128,
    pub gas_estimate: u128,
}

impl BridgeFees {
    /// Value attached to the lock message: amount, fees and gas
    pub fn attached_value(&self, amount: u128) -> Option<u128> {
        amount
            .checked_add(self.total_fee)?
            .checked_add(self.gas_estimate)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeControllerConfig {
    pub contract_address: String,
    pub percentage_fee: BasisPoints,
    pub gas_estimate: u128,
    pub lock_valid_secs: i64,
    pub request_timeout: Duration,
    pub fee_debounce: Duration,
}

impl BridgeControllerConfig {
    pub fn from_settings(settings: &Settings) -> ClientResult<Self> {
        Ok(Self {
            contract_address: settings.bridge.contract_address.clone(),
            percentage_fee: BasisPoints::new(settings.bridge.percentage_fee_bps)
                .map_err(|e| ClientError::Config(e.to_string()))?,
            gas_estimate: settings.bridge.gas_estimate,
            lock_valid_secs: settings.bridge.lock_valid_secs,
            request_timeout: Duration::from_secs(settings.session.request_timeout_secs),
            fee_debounce: Duration::from_millis(settings.session.quote_debounce_ms),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct BridgeForm {
    source_chain_id: Option<u32>,
    target_chain_id: Option<u32>,
    amount: String,
    recipient: Option<String>,
    fees: Option<BridgeFees>,
    state: BridgeState,
    error: Option<ClientError>,
}

impl BridgeForm {
    fn ready_for_fees(&self) -> bool {
        self.target_chain_id.is_some() && parse_amount(&self.amount).is_ok()
    }

    fn invalidate(&mut self) {
        self.fees = None;
        self.error = None;
        self.state = BridgeState::Idle;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeSnapshot {
    pub source_chain_id: Option<u32>,
    pub target_chain_id: Option<u32>,
    pub amount: String,
    pub recipient: Option<String>,
    pub fees: Option<BridgeFees>,
    pub state: BridgeState,
    pub error: Option<ErrorBody>,
}

pub struct BridgeController {
    config: BridgeControllerConfig,
    chains: ChainTable,
    services: SessionServices,
    form: Mutex<BridgeForm>,
    sequencer: RequestSequencer,
    debounce: DebounceScheduler,
}

impl BridgeController {
    pub fn new(config: BridgeControllerConfig, chains: ChainTable, services: SessionServices) -> Self {
        let debounce = DebounceScheduler::new(config.fee_debounce);
        Self {
            config,
            chains,
            services,
            form: Mutex::new(BridgeForm::default()),
            sequencer: RequestSequencer::new(),
            debounce,
        }
    }

    fn form(&self) -> MutexGuard<'_, BridgeForm> {
        self.form.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn chains(&self) -> &ChainTable {
        &self.chains
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        let form = self.form();
        BridgeSnapshot {
            source_chain_id: form.source_chain_id,
            target_chain_id: form.target_chain_id,
            amount: form.amount.clone(),
            recipient: form.recipient.clone(),
            fees: form.fees,
            state: form.state,
            error: form.error.as_ref().map(ErrorBody::from),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.form().state
    }

    /// First violated input rule, or `None` when the transfer may be submitted
    pub fn validate(&self) -> Option<ValidationError> {
        let form = self.form();
        self.check(&form)
    }

    fn check(&self, form: &BridgeForm) -> Option<ValidationError> {
        if self.services.wallet.address().is_none() {
            return Some(ValidationError::WalletNotConnected);
        }
        let Some(source_id) = form.source_chain_id else {
            return Some(ValidationError::SelectSourceChain);
        };
        let Some(target_id) = form.target_chain_id else {
            return Some(ValidationError::SelectTargetChain);
        };
        if source_id == target_id {
            return Some(ValidationError::IdenticalChains);
        }
        let amount = match parse_amount(&form.amount) {
            Ok(amount) => from_nano(amount),
            Err(e) => return Some(e),
        };
        let Some(source) = self.chains.get(source_id) else {
            return Some(ValidationError::UnknownChain {
                chain_id: source_id,
            });
        };
        if self.chains.get(target_id).is_none() {
            return Some(ValidationError::UnknownChain {
                chain_id: target_id,
            });
        }
        if amount < source.min_amount {
            return Some(ValidationError::BelowMinimum {
                min: source.min_amount.normalize().to_string(),
                token: source.native_token.clone(),
            });
        }
        if amount > source.max_amount {
            return Some(ValidationError::AboveMaximum {
                max: source.max_amount.normalize().to_string(),
                token: source.native_token.clone(),
            });
        }
        None
    }

    fn known_chain(&self, chain_id: Option<u32>) -> ClientResult<()> {
        match chain_id {
            Some(id) if self.chains.get(id).is_none() => {
                Err(ValidationError::UnknownChain { chain_id: id }.into())
            }
            _ => Ok(()),
        }
    }

    pub fn set_source_chain(self: &Arc<Self>, chain_id: Option<u32>) -> ClientResult<()> {
        self.known_chain(chain_id)?;
        self.edit(|form| form.source_chain_id = chain_id)
    }

    pub fn set_target_chain(self: &Arc<Self>, chain_id: Option<u32>) -> ClientResult<()> {
        self.known_chain(chain_id)?;
        self.edit(|form| form.target_chain_id = chain_id)
    }

    pub fn set_amount(self: &Arc<Self>, amount: impl Into<String>) -> ClientResult<()> {
        let amount = amount.into();
        self.edit(|form| form.amount = amount)
    }

    /// Recipient on the target chain; defaults to the connected wallet
    pub fn set_recipient(self: &Arc<Self>, recipient: Option<String>) -> ClientResult<()> {
        self.edit(|form| form.recipient = recipient)
    }

    /// Swap source and target selections. Callers re-validate afterwards.
    pub fn switch_chains(self: &Arc<Self>) -> ClientResult<()> {
        self.edit(|form| std::mem::swap(&mut form.source_chain_id, &mut form.target_chain_id))
    }

    /// Set every input at once without scheduling a fee estimate
    pub fn prepare(
        &self,
        source_chain_id: u32,
        target_chain_id: u32,
        amount: &str,
        recipient: Option<String>,
    ) -> ClientResult<()> {
        self.known_chain(Some(source_chain_id))?;
        self.known_chain(Some(target_chain_id))?;

        let mut form = self.form();
        if form.state.is_busy() {
            return Err(ClientError::AlreadyInProgress);
        }
        form.source_chain_id = Some(source_chain_id);
        form.target_chain_id = Some(target_chain_id);
        form.amount = amount.to_string();
        form.recipient = recipient;
        form.invalidate();
        self.sequencer.next();
        self.debounce.cancel();
        Ok(())
    }

    pub fn reset(&self) -> ClientResult<()> {
        let mut form = self.form();
        if form.state.is_busy() {
            return Err(ClientError::AlreadyInProgress);
        }
        self.sequencer.next();
        self.debounce.cancel();
        form.amount.clear();
        form.invalidate();
        Ok(())
    }

    pub fn cancel_pending(&self) {
        self.debounce.cancel();
    }

    fn edit<F>(self: &Arc<Self>, f: F) -> ClientResult<()>
    where
        F: FnOnce(&mut BridgeForm),
    {
        let ready = {
            let mut form = self.form();
            if form.state.is_busy() {
                return Err(ClientError::AlreadyInProgress);
            }
            f(&mut form);
            form.invalidate();
            self.sequencer.next();
            form.ready_for_fees()
        };

        if ready {
            let controller = Arc::downgrade(self);
            self.debounce.schedule(async move {
                if let Some(controller) = controller.upgrade() {
                    if let Err(e) = controller.estimate_fees().await {
                        debug!("Debounced fee estimate failed: {}", e);
                    }
                }
            });
        } else {
            self.debounce.cancel();
        }
        Ok(())
    }

    /// Estimate fees for the current input.
    ///
    /// Returns `Ok(None)` when newer input superseded the request.
    pub async fn estimate_fees(&self) -> ClientResult<Option<BridgeFees>> {
        let sequence = self.sequencer.next();
        let amount = {
            let mut form = self.form();
            if form.state.is_busy() {
                return Err(ClientError::AlreadyInProgress);
            }
            if form.target_chain_id.is_none() {
                return Err(QuoteError::EstimationFailed("target chain not selected".into()).into());
            }
            let amount = parse_amount(&form.amount).map_err(|e| {
                QuoteError::EstimationFailed(format!("amount unusable: {}", e))
            })?;
            form.state = BridgeState::Estimating;
            amount
        };

        let result = self.fees_for(amount).await;

        let mut form = self.form();
        if !self.sequencer.is_latest(sequence) || form.state.is_busy() {
            debug!("Discarding stale fee estimate #{}", sequence);
            return Ok(None);
        }
        match result {
            Ok(fees) => {
                form.fees = Some(fees);
                form.state = BridgeState::FeesReady;
                form.error = None;
                Ok(Some(fees))
            }
            Err(e) => {
                warn!("Fee estimate #{} failed: {}", sequence, e);
                form.fees = None;
                form.state = BridgeState::Idle;
                form.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Fee breakdown for locking `amount`
    pub async fn fees_for(&self, amount: u128) -> ClientResult<BridgeFees> {
        let base_fee = timeout(self.config.request_timeout, self.services.ledger.get_base_fee())
            .await
            .map_err(|_| QuoteError::EstimationFailed("base fee request timed out".into()))?
            .map_err(|e| QuoteError::EstimationFailed(e.to_string()))?;

        let percentage_fee = mul_div(amount, self.config.percentage_fee.get() as u128, BPS_DENOMINATOR)?;
        let total_fee = base_fee
            .checked_add(percentage_fee)
            .ok_or(QuoteError::Overflow)?;

        Ok(BridgeFees {
            base_fee,
            percentage_fee,
            total_fee,
            gas_estimate: self.config.gas_estimate,
        })
    }

    /// Submit one lock for the current input and start tracking it.
    ///
    /// The submission runs on its own task so a caller that stops waiting
    /// does not leave the controller in `Submitting`.
    pub async fn execute_bridge(self: &Arc<Self>) -> ClientResult<BridgeTransfer> {
        let (owner, source, target, amount, recipient) = {
            let mut form = self.form();
            if form.state.is_busy() {
                warn!("Bridge transfer already in progress, rejecting execute");
                return Err(ClientError::AlreadyInProgress);
            }
            if let Some(invalid) = self.check(&form) {
                return Err(invalid.into());
            }
            let owner = self
                .services
                .wallet
                .address()
                .ok_or(ValidationError::WalletNotConnected)?;
            let source = form.source_chain_id.ok_or(ValidationError::SelectSourceChain)?;
            let target = form.target_chain_id.ok_or(ValidationError::SelectTargetChain)?;
            let amount = parse_amount(&form.amount)?;
            let recipient = form.recipient.clone().unwrap_or_else(|| owner.clone());

            form.state = BridgeState::Submitting;
            form.error = None;
            (owner, source, target, amount, recipient)
        };

        let controller = self.clone();
        let task = tokio::spawn(async move {
            controller
                .submit_lock(owner, source, target, amount, recipient)
                .await
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(self.fail(ClientError::Internal(format!("bridge task: {}", e)))),
        }
    }

    async fn submit_lock(
        &self,
        owner: String,
        source: u32,
        target: u32,
        amount: u128,
        recipient: String,
    ) -> ClientResult<BridgeTransfer> {
        let fees = match self.fees_for(amount).await {
            Ok(fees) => fees,
            Err(e) => return Err(self.fail(e)),
        };
        let Some(value) = fees.attached_value(amount) else {
            return Err(self.fail(QuoteError::Overflow.into()));
        };

        let request = TransferRequest {
            destination: self.config.contract_address.clone(),
            value,
            valid_until: Utc::now().timestamp() + self.config.lock_valid_secs,
            message: OutgoingMessage::Lock(LockMessage {
                amount,
                target_chain_id: target,
                recipient,
            }),
        };

        let hash = match timeout(self.config.request_timeout, self.services.wallet.send(request)).await
        {
            Ok(Ok(hash)) => hash,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => {
                return Err(self.fail(ClientError::Timeout {
                    operation: "wallet send".to_string(),
                }))
            }
        };

        let transfer = BridgeTransfer::new(
            hash.clone(),
            source,
            target,
            amount,
            self.chains.required_confirmations(target),
        );
        if let Err(e) = self
            .services
            .store
            .append_bridge_transfer(&owner, transfer.clone())
            .await
        {
            error!("Transfer {} submitted but only tracked in memory: {}", hash, e);
        }

        {
            let mut form = self.form();
            form.amount.clear();
            form.invalidate();
            self.sequencer.next();
        }

        info!(
            "Bridge lock submitted: {} from chain {} to chain {} ({}, {} confirmations required)",
            amount, source, target, hash, transfer.required_confirmations
        );
        metrics::record_bridge_submitted(target);
        self.services.bus.publish(SessionEvent::BridgeSubmitted {
            transfer: transfer.clone(),
        });
        Ok(transfer)
    }

    /// Tracked transfers for the connected wallet, oldest first
    pub async fn transfers(&self) -> ClientResult<Vec<BridgeTransfer>> {
        let owner = self
            .services
            .wallet
            .address()
            .ok_or(ValidationError::WalletNotConnected)?;
        Ok(self.services.store.bridge_transfers(&owner).await)
    }

    fn fail(&self, err: ClientError) -> ClientError {
        {
            let mut form = self.form();
            form.state = if form.fees.is_some() {
                BridgeState::FeesReady
            } else {
                BridgeState::Idle
            };
            form.error = Some(err.clone());
        }
        warn!("Bridge transfer failed: {}", err);
        self.services.bus.publish(SessionEvent::BridgeFailed {
            error: ErrorBody::from(&err),
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use crate::events::EventBus;
    use crate::bridge::TransferPoller;
    use crate::ledger::{Ledger, MockLedger, MockWallet, SimulatedLedger, StalledWallet, Wallet};
    use crate::store::{FlakyBackend, KeyValueBackend, MemoryBackend, PendingTransferStore, TransferStatus};

    const WALLET: &str = "EQWallet";

    fn build(ledger: Arc<dyn Ledger>, wallet: Arc<dyn Wallet>) -> Arc<BridgeController> {
        build_with(ledger, wallet, Arc::new(MemoryBackend::new()))
    }

    fn build_with(
        ledger: Arc<dyn Ledger>,
        wallet: Arc<dyn Wallet>,
        backend: Arc<dyn KeyValueBackend>,
    ) -> Arc<BridgeController> {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        let services = SessionServices {
            ledger,
            wallet,
            store: Arc::new(PendingTransferStore::new(backend)),
            bus: Arc::new(EventBus::silent()),
        };
        Arc::new(BridgeController::new(
            BridgeControllerConfig::from_settings(&settings).unwrap(),
            ChainTable::from_config(&settings.chains),
            services,
        ))
    }

    fn simulated() -> (Arc<SimulatedLedger>, Arc<BridgeController>) {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        let ledger = Arc::new(SimulatedLedger::from_settings(&settings).unwrap());
        (ledger.clone(), build(ledger.clone(), ledger))
    }

    #[tokio::test]
    async fn test_validation_rules() {
        let (ledger, controller) = simulated();

        ledger.disconnect();
        assert_eq!(controller.validate(), Some(ValidationError::WalletNotConnected));
        ledger.connect(WALLET);
        assert_eq!(controller.validate(), Some(ValidationError::SelectSourceChain));

        controller.set_source_chain(Some(1)).unwrap();
        assert_eq!(controller.validate(), Some(ValidationError::SelectTargetChain));
        controller.set_target_chain(Some(1)).unwrap();
        assert_eq!(controller.validate(), Some(ValidationError::IdenticalChains));

        let cases = [
            ("", Some(ValidationError::EnterAmount)),
            ("ten", Some(ValidationError::EnterAmount)),
            ("-1", Some(ValidationError::InvalidAmount)),
            ("0", Some(ValidationError::InvalidAmount)),
            (
                "5",
                Some(ValidationError::BelowMinimum {
                    min: "10".into(),
                    token: "TON".into(),
                }),
            ),
            (
                "20000",
                Some(ValidationError::AboveMaximum {
                    max: "10000".into(),
                    token: "TON".into(),
                }),
            ),
            ("10", None),
            ("10000", None),
        ];
        for (amount, expected) in cases {
            controller.prepare(1, 2, amount, None).unwrap();
            assert_eq!(controller.validate(), expected, "amount {:?}", amount);
        }

        assert_eq!(
            ValidationError::BelowMinimum {
                min: "10".into(),
                token: "TON".into()
            }
            .to_string(),
            "Minimum amount is 10 TON"
        );
    }

    #[tokio::test]
    async fn test_unknown_chain_selection_refused() {
        let (_ledger, controller) = simulated();
        assert_eq!(
            controller.set_target_chain(Some(99)),
            Err(ClientError::Validation(ValidationError::UnknownChain { chain_id: 99 }))
        );
    }

    #[tokio::test]
    async fn test_fee_breakdown() {
        let (_ledger, controller) = simulated();
        controller.prepare(1, 2, "100", None).unwrap();

        let fees = controller.estimate_fees().await.unwrap().unwrap();
        assert_eq!(fees.base_fee, 50_000_000);
        assert_eq!(fees.percentage_fee, 300_000_000);
        assert_eq!(fees.total_fee, 350_000_000);
        assert_eq!(fees.gas_estimate, 100_000_000);
        assert_eq!(fees.attached_value(100_000_000_000), Some(100_450_000_000));
        assert_eq!(controller.state(), BridgeState::FeesReady);
    }

    #[tokio::test]
    async fn test_fee_estimate_needs_input() {
        let (_ledger, controller) = simulated();
        assert!(matches!(
            controller.estimate_fees().await,
            Err(ClientError::Quote(QuoteError::EstimationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_base_fee_failure_is_estimation_failure() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_get_base_fee()
            .returning(|| Err(ClientError::Ledger("node unavailable".into())));
        let mut wallet = MockWallet::new();
        wallet.expect_address().return_const(Some(WALLET.to_string()));
        let controller = build(Arc::new(ledger), Arc::new(wallet));

        controller.prepare(1, 2, "100", None).unwrap();
        let err = controller.estimate_fees().await.unwrap_err();
        assert!(matches!(err, ClientError::Quote(QuoteError::EstimationFailed(_))));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_execute_tracks_transfer() {
        let (ledger, controller) = simulated();
        controller.prepare(1, 2, "100", None).unwrap();

        let transfer = controller.execute_bridge().await.unwrap();
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert_eq!(transfer.confirmations, 0);
        assert_eq!(transfer.required_confirmations, 12);
        assert_eq!(transfer.amount, 100_000_000_000);

        assert_eq!(controller.snapshot().amount, "");
        assert_eq!(controller.state(), BridgeState::Idle);
        assert_eq!(controller.transfers().await.unwrap(), vec![transfer]);
        assert_eq!(
            ledger.get_wallet_balance("TON", WALLET).await.unwrap(),
            1_000_000_000_000 - 100_450_000_000
        );
    }

    #[tokio::test]
    async fn test_rejected_submission_keeps_input() {
        let mut ledger = MockLedger::new();
        ledger.expect_get_base_fee().returning(|| Ok(50_000_000));
        let mut wallet = MockWallet::new();
        wallet.expect_address().return_const(Some(WALLET.to_string()));
        wallet
            .expect_send()
            .times(1)
            .returning(|_| Err(ClientError::Execution("signing declined".into())));
        let controller = build(Arc::new(ledger), Arc::new(wallet));

        controller.prepare(1, 3, "50", None).unwrap();
        assert!(matches!(
            controller.execute_bridge().await,
            Err(ClientError::Execution(_))
        ));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.amount, "50");
        assert_eq!(snapshot.state, BridgeState::Idle);
        assert!(snapshot.error.is_some());
        assert!(controller.transfers().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_send_times_out() {
        let mut ledger = MockLedger::new();
        ledger.expect_get_base_fee().returning(|| Ok(50_000_000));
        let controller = build(
            Arc::new(ledger),
            Arc::new(StalledWallet(WALLET.to_string())),
        );
        controller.prepare(1, 2, "100", None).unwrap();

        let err = tokio_test::assert_err!(controller.execute_bridge().await);
        assert_eq!(
            err,
            ClientError::Timeout {
                operation: "wallet send".into()
            }
        );
        let snapshot = controller.snapshot();
        assert!(!snapshot.state.is_busy());
        assert_eq!(snapshot.amount, "100");
        assert!(controller.transfers().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_execute_releases_controller() {
        let mut ledger = MockLedger::new();
        ledger.expect_get_base_fee().returning(|| Ok(50_000_000));
        let controller = build(
            Arc::new(ledger),
            Arc::new(StalledWallet(WALLET.to_string())),
        );
        controller.prepare(1, 2, "100", None).unwrap();

        let abandoned = timeout(Duration::from_secs(1), controller.execute_bridge()).await;
        assert!(abandoned.is_err());
        assert_eq!(controller.state(), BridgeState::Submitting);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(controller.state(), BridgeState::Idle);
        tokio_test::assert_ok!(controller.reset());
    }

    #[tokio::test]
    async fn test_unpersisted_lock_is_still_polled() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        let ledger = Arc::new(SimulatedLedger::from_settings(&settings).unwrap());
        let backend = Arc::new(FlakyBackend::failing());
        let controller = build_with(ledger.clone(), ledger, backend.clone());
        controller.prepare(1, 3, "20", None).unwrap();

        let transfer = tokio_test::assert_ok!(controller.execute_bridge().await);
        assert_eq!(controller.transfers().await.unwrap(), vec![transfer.clone()]);

        let poller = TransferPoller::new(
            controller.services.clone(),
            Duration::from_secs(15),
            Duration::from_secs(10),
        );
        assert_eq!(poller.poll_once().await.polled, 1);

        // Once writes recover the tracked transfer reaches the backend
        backend.set_failing(false);
        poller.poll_once().await;
        let raw = backend
            .read(&format!("bridge_transactions_{}", WALLET))
            .await
            .unwrap()
            .unwrap();
        assert!(raw.contains(&transfer.hash));
    }

    #[tokio::test]
    async fn test_busy_controller_refuses_changes() {
        let (_ledger, controller) = simulated();
        controller.prepare(1, 2, "100", None).unwrap();
        controller.form().state = BridgeState::Submitting;

        assert_eq!(
            controller.execute_bridge().await,
            Err(ClientError::AlreadyInProgress)
        );
        assert_eq!(controller.switch_chains(), Err(ClientError::AlreadyInProgress));
    }

    #[tokio::test]
    async fn test_switch_chains() {
        let (_ledger, controller) = simulated();
        controller.prepare(1, 3, "", None).unwrap();
        controller.switch_chains().unwrap();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.source_chain_id, Some(3));
        assert_eq!(snapshot.target_chain_id, Some(1));
    }
}
