//! Swap execution controller
//!
//! State machine per session:
//!
//! ```text
//! Idle → QuoteRequested → QuoteReady → Submitting → AwaitingConfirmation → Completed → Idle
//!                              ↑                          │
//!                              └──────── failure ─────────┘
//! ```
//!
//! A failed submission or confirmation returns to `QuoteReady` with the
//! error attached so the user's input survives. While `Submitting` or
//! `AwaitingConfirmation`, every mutating call is refused with
//! `AlreadyInProgress`.

use super::settings::{SettingsUpdate, SwapSettings};
use crate::amm::{from_nano, parse_amount, BasisPoints, SwapQuote};
use crate::config::Settings;
use crate::error::{ClientError, ClientResult, ErrorBody, ProtocolError, QuoteError, ValidationError};
use crate::events::SessionEvent;
use crate::ledger::{OutgoingMessage, SwapMessage, TransferRequest};
use crate::metrics;
use crate::scheduler::{DebounceScheduler, RequestSequencer};
use crate::session::SessionServices;
use crate::store::{SwapStatus, SwapTransaction};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Idle,
    QuoteRequested,
    QuoteReady,
    Submitting,
    AwaitingConfirmation,
    Completed,
}

impl SwapState {
    /// An execution is in flight
    pub fn is_busy(self) -> bool {
        matches!(self, SwapState::Submitting | SwapState::AwaitingConfirmation)
    }
}

/// Static controller parameters
#[derive(Debug, Clone)]
pub struct SwapControllerConfig {
    pub router_address: String,
    pub gas_estimate: u128,
    pub max_price_impact_percent: Decimal,
    pub confirmation_attempts: u32,
    pub confirmation_backoff: Duration,
    pub confirmation_max_wait: Duration,
    pub request_timeout: Duration,
    pub quote_debounce: Duration,
}

impl SwapControllerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            router_address: settings.swap.router_address.clone(),
            gas_estimate: settings.swap.gas_estimate,
            max_price_impact_percent: settings.swap.max_price_impact_percent,
            confirmation_attempts: settings.session.confirmation_attempts.max(1),
            confirmation_backoff: Duration::from_millis(settings.session.confirmation_backoff_ms),
            confirmation_max_wait: Duration::from_secs(settings.session.confirmation_max_wait_secs),
            request_timeout: Duration::from_secs(settings.session.request_timeout_secs),
            quote_debounce: Duration::from_millis(settings.session.quote_debounce_ms),
        }
    }
}

#[derive(Debug, Clone)]
struct SwapForm {
    token_in: Option<String>,
    token_out: Option<String>,
    amount: String,
    quote: Option<SwapQuote>,
    balance_in: Option<u128>,
    state: SwapState,
    error: Option<ClientError>,
    settings: SwapSettings,
    last_hash: Option<String>,
}

impl SwapForm {
    fn ready_for_quote(&self) -> bool {
        match (&self.token_in, &self.token_out) {
            (Some(a), Some(b)) => a != b && parse_amount(&self.amount).is_ok(),
            _ => false,
        }
    }

    /// Drop the quote after an input change
    fn invalidate(&mut self) {
        self.quote = None;
        self.error = None;
        self.state = SwapState::Idle;
    }
}

/// Read-only view of the swap form
#[derive(Debug, Clone, Serialize)]
pub struct SwapSnapshot {
    pub token_in: Option<String>,
    pub token_out: Option<String>,
    pub amount: String,
    pub quote: Option<SwapQuote>,
    pub balance_in: Option<u128>,
    pub state: SwapState,
    pub error: Option<ErrorBody>,
    pub settings: SwapSettings,
    pub last_hash: Option<String>,
}

/// Orchestrates quoting, submission and confirmation of swaps
pub struct SwapController {
    config: SwapControllerConfig,
    services: SessionServices,
    form: Mutex<SwapForm>,
    sequencer: RequestSequencer,
    debounce: DebounceScheduler,
}

impl SwapController {
    pub fn new(config: SwapControllerConfig, settings: SwapSettings, services: SessionServices) -> Self {
        let debounce = DebounceScheduler::new(config.quote_debounce);
        Self {
            config,
            services,
            form: Mutex::new(SwapForm {
                token_in: None,
                token_out: None,
                amount: String::new(),
                quote: None,
                balance_in: None,
                state: SwapState::Idle,
                error: None,
                settings,
                last_hash: None,
            }),
            sequencer: RequestSequencer::new(),
            debounce,
        }
    }

    fn form(&self) -> MutexGuard<'_, SwapForm> {
        self.form.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SwapSnapshot {
        let form = self.form();
        SwapSnapshot {
            token_in: form.token_in.clone(),
            token_out: form.token_out.clone(),
            amount: form.amount.clone(),
            quote: form.quote.clone(),
            balance_in: form.balance_in,
            state: form.state,
            error: form.error.as_ref().map(ErrorBody::from),
            settings: form.settings,
            last_hash: form.last_hash.clone(),
        }
    }

    pub fn state(&self) -> SwapState {
        self.form().state
    }

    pub fn settings(&self) -> SwapSettings {
        self.form().settings
    }

    /// First violated input rule, or `None` when the swap may be executed
    pub fn validate(&self) -> Option<ValidationError> {
        let form = self.form();
        self.check(&form)
    }

    fn check(&self, form: &SwapForm) -> Option<ValidationError> {
        if self.services.wallet.address().is_none() {
            return Some(ValidationError::WalletNotConnected);
        }
        let (Some(token_in), Some(token_out)) = (&form.token_in, &form.token_out) else {
            return Some(ValidationError::SelectTokens);
        };
        if token_in == token_out {
            return Some(ValidationError::IdenticalTokens);
        }
        let amount = match parse_amount(&form.amount) {
            Ok(amount) => amount,
            Err(e) => return Some(e),
        };
        match &form.quote {
            Some(quote) if quote.amount_in == amount => {}
            _ => return Some(ValidationError::QuoteMissing),
        }
        if form.balance_in.unwrap_or(0) < amount {
            return Some(ValidationError::InsufficientBalance);
        }
        None
    }

    pub fn set_token_in(self: &Arc<Self>, token: Option<String>) -> ClientResult<()> {
        self.edit(|form| {
            form.token_in = token;
            form.balance_in = None;
        })
    }

    pub fn set_token_out(self: &Arc<Self>, token: Option<String>) -> ClientResult<()> {
        self.edit(|form| form.token_out = token)
    }

    pub fn set_amount(self: &Arc<Self>, amount: impl Into<String>) -> ClientResult<()> {
        let amount = amount.into();
        self.edit(|form| form.amount = amount)
    }

    /// Swap input and output tokens, carrying the quoted output over as the new input
    pub fn switch_tokens(self: &Arc<Self>) -> ClientResult<()> {
        self.edit(|form| {
            std::mem::swap(&mut form.token_in, &mut form.token_out);
            if let Some(quote) = &form.quote {
                form.amount = from_nano(quote.estimated_output).to_string();
            }
            form.balance_in = None;
        })
    }

    /// Partially update slippage and deadline; a slippage change re-quotes.
    /// The result is saved for the connected wallet.
    pub async fn update_settings(
        self: &Arc<Self>,
        update: SettingsUpdate,
    ) -> ClientResult<SwapSettings> {
        let (settings, requote) = {
            let mut form = self.form();
            if form.state.is_busy() {
                return Err(ClientError::AlreadyInProgress);
            }
            let slippage_changed = form.settings.apply(update)?;
            if slippage_changed {
                self.sequencer.next();
                form.invalidate();
            }
            (form.settings, slippage_changed && form.ready_for_quote())
        };

        debug!(
            "Swap settings now {} slippage, {} min deadline",
            settings.slippage, settings.deadline_minutes
        );
        if requote {
            self.schedule_quote();
        }
        if let Some(owner) = self.services.wallet.address() {
            if let Err(e) = self.services.store.save_swap_settings(&owner, settings).await {
                warn!("Swap settings kept for this session only: {}", e);
            }
        }
        Ok(settings)
    }

    /// Clear amount, quote and error
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

    /// Drop any debounced quote that has not fired yet
    pub fn cancel_pending(&self) {
        self.debounce.cancel();
    }

    fn edit<F>(self: &Arc<Self>, f: F) -> ClientResult<()>
    where
        F: FnOnce(&mut SwapForm),
    {
        let ready = {
            let mut form = self.form();
            if form.state.is_busy() {
                return Err(ClientError::AlreadyInProgress);
            }
            f(&mut form);
            form.invalidate();
            self.sequencer.next();
            form.ready_for_quote()
        };

        if ready {
            self.schedule_quote();
        } else {
            self.debounce.cancel();
        }
        Ok(())
    }

    fn schedule_quote(self: &Arc<Self>) {
        let controller = Arc::downgrade(self);
        self.debounce.schedule(async move {
            if let Some(controller) = controller.upgrade() {
                if let Err(e) = controller.request_quote().await {
                    debug!("Debounced quote failed: {}", e);
                }
            }
        });
    }

    /// Set all inputs and quote immediately, bypassing the debounce
    pub async fn quote_now(
        &self,
        token_in: &str,
        token_out: &str,
        amount: &str,
    ) -> ClientResult<SwapQuote> {
        {
            let mut form = self.form();
            if form.state.is_busy() {
                return Err(ClientError::AlreadyInProgress);
            }
            if form.token_in.as_deref() != Some(token_in) {
                form.balance_in = None;
            }
            form.token_in = Some(token_in.to_string());
            form.token_out = Some(token_out.to_string());
            form.amount = amount.to_string();
            form.invalidate();
        }
        self.debounce.cancel();

        self.request_quote()
            .await?
            .ok_or_else(|| QuoteError::Superseded.into())
    }

    /// Quote the current input against live reserves.
    ///
    /// Returns `Ok(None)` when a newer request superseded this one while it
    /// was in flight; the late result is discarded.
    pub async fn request_quote(&self) -> ClientResult<Option<SwapQuote>> {
        let sequence = self.sequencer.next();
        let (token_in, token_out, amount_in, slippage) = {
            let mut form = self.form();
            if form.state.is_busy() {
                return Err(ClientError::AlreadyInProgress);
            }
            let (Some(token_in), Some(token_out)) = (form.token_in.clone(), form.token_out.clone())
            else {
                return Err(ValidationError::SelectTokens.into());
            };
            if token_in == token_out {
                return Err(ValidationError::IdenticalTokens.into());
            }
            let amount_in = parse_amount(&form.amount)?;
            form.state = SwapState::QuoteRequested;
            (token_in, token_out, amount_in, form.settings.slippage)
        };

        let result = self
            .fetch_quote(&token_in, &token_out, amount_in, slippage)
            .await;

        let (event, outcome) = {
            let mut form = self.form();
            if !self.sequencer.is_latest(sequence) || form.state.is_busy() {
                drop(form);
                debug!("Discarding stale quote #{}", sequence);
                metrics::record_quote_discarded();
                self.services
                    .bus
                    .publish(SessionEvent::QuoteDiscarded { sequence });
                return Ok(None);
            }

            match result {
                Ok((quote, balance)) => {
                    form.quote = Some(quote.clone());
                    if balance.is_some() {
                        form.balance_in = balance;
                    }
                    form.state = SwapState::QuoteReady;
                    form.error = None;
                    (
                        SessionEvent::QuoteUpdated {
                            sequence,
                            quote: quote.clone(),
                        },
                        Ok(Some(quote)),
                    )
                }
                Err(e) => {
                    form.quote = None;
                    form.state = SwapState::Idle;
                    form.error = Some(e.clone());
                    (
                        SessionEvent::QuoteFailed {
                            sequence,
                            error: ErrorBody::from(&e),
                        },
                        Err(e),
                    )
                }
            }
        };

        match &outcome {
            Ok(Some(quote)) => {
                metrics::record_quote_computed();
                debug!(
                    "Quote #{}: {} {} -> {} {} (min {}, impact {}%)",
                    sequence,
                    quote.amount_in,
                    token_in,
                    quote.estimated_output,
                    token_out,
                    quote.minimum_output,
                    quote.price_impact_percent
                );
            }
            Err(e) => warn!("Quote #{} failed: {}", sequence, e),
            Ok(None) => {}
        }
        self.services.bus.publish(event);
        outcome
    }

    async fn fetch_quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: u128,
        slippage: BasisPoints,
    ) -> ClientResult<(SwapQuote, Option<u128>)> {
        let ledger = &self.services.ledger;
        let pool = self
            .bounded("pool lookup", ledger.get_pool(token_in, token_out))
            .await?;
        let reserves = self.bounded("pool reserves", ledger.get_reserves(&pool)).await?;

        let quote = SwapQuote::compute(
            amount_in,
            reserves.reserve_in,
            reserves.reserve_out,
            pool.fee_bps,
            slippage,
            vec![token_in.to_string(), token_out.to_string()],
        )?;

        let balance = match self.services.wallet.address() {
            Some(owner) => Some(
                self.bounded("wallet balance", ledger.get_wallet_balance(token_in, &owner))
                    .await?,
            ),
            None => None,
        };

        Ok((quote, balance))
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        timeout(self.config.request_timeout, call)
            .await
            .map_err(|_| ClientError::Timeout {
                operation: operation.to_string(),
            })?
    }

    /// Submit the quoted swap once and wait for it to confirm.
    ///
    /// Submission and confirmation run on their own task, so a caller that
    /// stops waiting does not leave the controller busy.
    pub async fn execute(self: &Arc<Self>) -> ClientResult<String> {
        let (owner, quote, settings) = {
            let mut form = self.form();
            if form.state.is_busy() {
                warn!("Swap already in progress, rejecting execute");
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
            let quote = form.quote.clone().ok_or(ValidationError::QuoteMissing)?;

            if quote.price_impact_percent > self.config.max_price_impact_percent {
                return Err(ProtocolError::PriceImpactTooHigh {
                    impact: quote.price_impact_percent.to_string(),
                    max: self.config.max_price_impact_percent.to_string(),
                }
                .into());
            }

            form.state = SwapState::Submitting;
            form.error = None;
            (owner, quote, form.settings)
        };
        self.publish_state(SwapState::Submitting);

        let controller = self.clone();
        let task = tokio::spawn(async move {
            controller.submit_and_confirm(owner, quote, settings).await
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(self.fail(None, ClientError::Internal(format!("swap task: {}", e)))),
        }
    }

    async fn submit_and_confirm(
        &self,
        owner: String,
        quote: SwapQuote,
        settings: SwapSettings,
    ) -> ClientResult<String> {
        let (token_in, token_out) = match quote.route.as_slice() {
            [first, .., last] => (first.clone(), last.clone()),
            _ => {
                return Err(self.fail(None, ClientError::Internal("quote has no route".into())))
            }
        };

        let deadline = Utc::now().timestamp() + settings.deadline_secs();
        let message = SwapMessage {
            token_in,
            token_out,
            amount_in: quote.amount_in,
            min_out: quote.minimum_output,
            deadline,
        };
        let request = TransferRequest {
            destination: self.config.router_address.clone(),
            value: self.config.gas_estimate,
            valid_until: deadline,
            message: OutgoingMessage::Swap(message.clone()),
        };

        let hash = match self
            .bounded("wallet send", self.services.wallet.send(request))
            .await
        {
            Ok(hash) => hash,
            Err(e) => return Err(self.fail(None, e)),
        };

        info!(
            "Swap submitted: {} {} for at least {} {} ({})",
            message.amount_in, message.token_in, message.min_out, message.token_out, hash
        );
        metrics::record_swap_submitted();
        self.services
            .bus
            .publish(SessionEvent::SwapSubmitted { hash: hash.clone() });

        let record = SwapTransaction {
            hash: hash.clone(),
            token_in: message.token_in.clone(),
            token_out: message.token_out.clone(),
            amount_in: message.amount_in,
            min_out: message.min_out,
            deadline,
            status: SwapStatus::Pending,
            created_at: Utc::now(),
        };
        if let Err(e) = self.services.store.append_swap_transaction(&owner, record).await {
            warn!("Swap {} tracked in memory only: {}", hash, e);
        }

        {
            let mut form = self.form();
            form.state = SwapState::AwaitingConfirmation;
            form.last_hash = Some(hash.clone());
        }
        self.publish_state(SwapState::AwaitingConfirmation);

        match self.await_confirmation(&hash).await {
            Ok(()) => {
                self.resolve_record(&owner, &hash, SwapStatus::Completed).await;
                metrics::record_swap_completed();
                self.form().state = SwapState::Completed;
                self.publish_state(SwapState::Completed);
                info!("Swap {} confirmed", hash);

                if let Err(e) = self.refresh_token_balance(&message.token_in).await {
                    warn!("Balance refresh after swap {} failed: {}", hash, e);
                }

                {
                    let mut form = self.form();
                    form.amount.clear();
                    form.invalidate();
                }
                self.publish_state(SwapState::Idle);
                Ok(hash)
            }
            Err(e) => {
                // A timed out swap stays pending for the poller to resolve
                if matches!(e, ClientError::Execution(_)) {
                    self.resolve_record(&owner, &hash, SwapStatus::Failed).await;
                }
                Err(self.fail(Some(hash), e))
            }
        }
    }

    /// Poll for the receipt a bounded number of times within the maximum wait
    async fn await_confirmation(&self, hash: &str) -> ClientResult<()> {
        let attempts = self.config.confirmation_attempts;
        let wait = async {
            for attempt in 1..=attempts {
                match self.services.ledger.get_transaction(hash).await {
                    Ok(Some(receipt)) if receipt.success => return Ok(()),
                    Ok(Some(receipt)) => {
                        return Err(ClientError::Execution(
                            receipt
                                .error
                                .unwrap_or_else(|| "swap reverted".to_string()),
                        ))
                    }
                    Ok(None) => debug!("Swap {} not included yet ({}/{})", hash, attempt, attempts),
                    Err(e) => warn!(
                        "Confirmation check {}/{} for {} failed: {}",
                        attempt, attempts, hash, e
                    ),
                }
                if attempt < attempts {
                    sleep(self.config.confirmation_backoff).await;
                }
            }
            Err(ClientError::Timeout {
                operation: format!("swap {} confirmation", hash),
            })
        };

        timeout(self.config.confirmation_max_wait, wait)
            .await
            .unwrap_or_else(|_| {
                Err(ClientError::Timeout {
                    operation: format!("swap {} confirmation", hash),
                })
            })
    }

    /// Re-read the balance of the current input token
    pub async fn refresh_balance(&self) -> ClientResult<Option<u128>> {
        let token = self.form().token_in.clone();
        match token {
            Some(token) => self.refresh_token_balance(&token).await.map(Some),
            None => Ok(None),
        }
    }

    async fn refresh_token_balance(&self, token: &str) -> ClientResult<u128> {
        let owner = self
            .services
            .wallet
            .address()
            .ok_or(ValidationError::WalletNotConnected)?;
        let amount = self
            .bounded(
                "wallet balance",
                self.services.ledger.get_wallet_balance(token, &owner),
            )
            .await?;

        {
            let mut form = self.form();
            if form.token_in.as_deref() == Some(token) {
                form.balance_in = Some(amount);
            }
        }
        self.services.bus.publish(SessionEvent::BalanceUpdated {
            token: token.to_string(),
            amount,
        });
        Ok(amount)
    }

    async fn resolve_record(&self, owner: &str, hash: &str, status: SwapStatus) {
        let result = self
            .services
            .store
            .update_swap_transactions(owner, |list| {
                for record in list
                    .iter_mut()
                    .filter(|r| r.hash == hash && !r.status.is_terminal())
                {
                    record.status = status;
                }
            })
            .await;
        match result {
            Ok(_) => self.services.bus.publish(SessionEvent::SwapResolved {
                hash: hash.to_string(),
                status,
            }),
            Err(e) => warn!("Failed to record swap {} as {:?}: {}", hash, status, e),
        }
    }

    /// Roll back to the pre-submit state with the error attached
    fn fail(&self, hash: Option<String>, err: ClientError) -> ClientError {
        let state = {
            let mut form = self.form();
            form.state = if form.quote.is_some() {
                SwapState::QuoteReady
            } else {
                SwapState::Idle
            };
            form.error = Some(err.clone());
            form.state
        };

        warn!("Swap failed: {}", err);
        metrics::record_swap_failed(err.kind().as_str());
        self.services.bus.publish(SessionEvent::SwapFailed {
            hash,
            error: ErrorBody::from(&err),
        });
        self.publish_state(state);
        err
    }

    fn publish_state(&self, state: SwapState) {
        self.services
            .bus
            .publish(SessionEvent::SwapStateChanged { state });
    }
}
