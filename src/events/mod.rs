//! Session event publishing
//!
//! Events are delivered synchronously, in subscription order, to a fixed
//! list of subscribers chosen when the bus is built. Subscribers must not
//! block and must not call back into the publishing controller.

use crate::amm::SwapQuote;
use crate::error::ErrorBody;
use crate::store::{BridgeTransfer, SwapStatus, TransferStatus};
use crate::swap::SwapState;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Notifications emitted by a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    QuoteUpdated {
        sequence: u64,
        quote: SwapQuote,
    },
    QuoteFailed {
        sequence: u64,
        error: ErrorBody,
    },
    QuoteDiscarded {
        sequence: u64,
    },
    SwapStateChanged {
        state: SwapState,
    },
    SwapSubmitted {
        hash: String,
    },
    SwapFailed {
        hash: Option<String>,
        error: ErrorBody,
    },
    SwapResolved {
        hash: String,
        status: SwapStatus,
    },
    BalanceUpdated {
        token: String,
        amount: u128,
    },
    BridgeSubmitted {
        transfer: BridgeTransfer,
    },
    BridgeFailed {
        error: ErrorBody,
    },
    TransferUpdated {
        hash: String,
        status: TransferStatus,
        confirmations: u32,
        required_confirmations: u32,
    },
}

impl SessionEvent {
    /// Event name for metrics and logs
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::QuoteUpdated { .. } => "quote_updated",
            SessionEvent::QuoteFailed { .. } => "quote_failed",
            SessionEvent::QuoteDiscarded { .. } => "quote_discarded",
            SessionEvent::SwapStateChanged { .. } => "swap_state_changed",
            SessionEvent::SwapSubmitted { .. } => "swap_submitted",
            SessionEvent::SwapFailed { .. } => "swap_failed",
            SessionEvent::SwapResolved { .. } => "swap_resolved",
            SessionEvent::BalanceUpdated { .. } => "balance_updated",
            SessionEvent::BridgeSubmitted { .. } => "bridge_submitted",
            SessionEvent::BridgeFailed { .. } => "bridge_failed",
            SessionEvent::TransferUpdated { .. } => "transfer_updated",
        }
    }
}

/// Receives every event published on the bus it was registered with
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> EventSubscriber for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Fixed fan-out publisher
pub struct EventBus {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventBus {
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// A bus with no subscribers
    pub fn silent() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        crate::metrics::record_event(event.name());
        for subscriber in &self.subscribers {
            subscriber.on_event(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[derive(Default)]
pub struct EventBusBuilder {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventBusBuilder {
    pub fn subscribe(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn build(self) -> EventBus {
        EventBus {
            subscribers: self.subscribers,
        }
    }
}

/// Logs every event at debug level
pub struct LogSubscriber;

impl EventSubscriber for LogSubscriber {
    fn on_event(&self, event: &SessionEvent) {
        debug!("Session event {}: {:?}", event.name(), event);
    }
}

/// An event with the time it was observed
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Keeps the most recent events for inspection
pub struct RecentEvents {
    capacity: usize,
    events: Mutex<VecDeque<RecordedEvent>>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl EventSubscriber for RecentEvents {
    fn on_event(&self, event: &SessionEvent) {
        if let Ok(mut events) = self.events.lock() {
            while events.len() >= self.capacity.max(1) {
                events.pop_front();
            }
            events.push_back(RecordedEvent {
                at: Utc::now(),
                event: event.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_in_subscription_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let order = order.clone();
            move |_: &SessionEvent| order.lock().unwrap().push(1)
        };
        let second = {
            let order = order.clone();
            move |_: &SessionEvent| order.lock().unwrap().push(2)
        };
        let bus = EventBus::builder()
            .subscribe(Arc::new(first))
            .subscribe(Arc::new(second))
            .build();

        bus.publish(SessionEvent::QuoteDiscarded { sequence: 1 });
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_recent_events_bounded() {
        let recent = Arc::new(RecentEvents::new(2));
        let bus = EventBus::builder().subscribe(recent.clone()).build();
        for sequence in 1..=3 {
            bus.publish(SessionEvent::QuoteDiscarded { sequence });
        }
        let seen: Vec<_> = recent.snapshot().into_iter().map(|r| r.event).collect();
        assert_eq!(
            seen,
            vec![
                SessionEvent::QuoteDiscarded { sequence: 2 },
                SessionEvent::QuoteDiscarded { sequence: 3 },
            ]
        );
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = SessionEvent::TransferUpdated {
            hash: "h".into(),
            status: TransferStatus::Confirming,
            confirmations: 3,
            required_confirmations: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transfer_updated");
        assert_eq!(json["status"], "confirming");
    }
}
