//! Input-driven request scheduling
//!
//! Every input change bumps a [`RequestSequencer`]; a response is applied
//! only if its sequence number is still the latest. Recomputation fires
//! through a [`DebounceScheduler`] once input has been quiet for a fixed
//! period.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Monotonic request counter
#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new sequence number, superseding every earlier one
    pub fn next(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    pub fn is_latest(&self, sequence: u64) -> bool {
        self.current() == sequence
    }
}

/// Runs a task after a quiet period, restarting the timer on every call
pub struct DebounceScheduler {
    quiet: Duration,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceScheduler {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    /// Schedule `task`, cancelling any task whose quiet period has not elapsed.
    ///
    /// A task that already fired keeps running; callers discard its result
    /// through their sequencer.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.generation.clone();
        let quiet = self.quiet;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            task.await;
        });

        if let Ok(mut pending) = self.pending.lock() {
            if let Some(previous) = pending.replace(handle) {
                if !previous.is_finished() {
                    debug!("Debounce restarted (generation {})", generation);
                }
            }
        }
    }

    /// Drop the pending task, if any
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
