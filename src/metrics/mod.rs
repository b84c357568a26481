//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Quote computation and stale discards
//! - Swap and bridge submissions
//! - Transfer status transitions and poll failures
//! - Validator unlocks and published session events

use crate::error::{ClientError, ClientResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Quote metrics
    pub static ref QUOTES_COMPUTED: CounterVec = register_counter_vec!(
        "swapbridge_quotes_computed_total",
        "Total quotes applied to a session",
        &[]
    ).unwrap();

    pub static ref QUOTES_DISCARDED: CounterVec = register_counter_vec!(
        "swapbridge_quotes_discarded_total",
        "Total quote responses dropped because newer input arrived",
        &[]
    ).unwrap();

    // Swap metrics
    pub static ref SWAPS_SUBMITTED: CounterVec = register_counter_vec!(
        "swapbridge_swaps_submitted_total",
        "Total swap messages submitted",
        &[]
    ).unwrap();

    pub static ref SWAPS_COMPLETED: CounterVec = register_counter_vec!(
        "swapbridge_swaps_completed_total",
        "Total swaps confirmed on chain",
        &[]
    ).unwrap();

    pub static ref SWAPS_FAILED: CounterVec = register_counter_vec!(
        "swapbridge_swaps_failed_total",
        "Total failed swap executions by error kind",
        &["kind"]
    ).unwrap();

    // Bridge metrics
    pub static ref BRIDGE_SUBMITTED: CounterVec = register_counter_vec!(
        "swapbridge_bridge_submitted_total",
        "Total lock messages submitted by target chain",
        &["target_chain_id"]
    ).unwrap();

    pub static ref TRANSFER_TRANSITIONS: CounterVec = register_counter_vec!(
        "swapbridge_transfer_transitions_total",
        "Total transfer record updates by resulting status",
        &["status"]
    ).unwrap();

    pub static ref POLL_ERRORS: CounterVec = register_counter_vec!(
        "swapbridge_poll_errors_total",
        "Total failed or timed out status requests",
        &[]
    ).unwrap();

    pub static ref UNLOCKS: CounterVec = register_counter_vec!(
        "swapbridge_unlocks_total",
        "Total transfers released after validator quorum",
        &[]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_PUBLISHED: CounterVec = register_counter_vec!(
        "swapbridge_events_published_total",
        "Total session events published by type",
        &["event_type"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> ClientResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ClientError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ClientError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

// Helper functions to record metrics

pub fn record_quote_computed() {
    QUOTES_COMPUTED.with_label_values(&[]).inc();
}

pub fn record_quote_discarded() {
    QUOTES_DISCARDED.with_label_values(&[]).inc();
}

pub fn record_swap_submitted() {
    SWAPS_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_swap_completed() {
    SWAPS_COMPLETED.with_label_values(&[]).inc();
}

pub fn record_swap_failed(kind: &str) {
    SWAPS_FAILED.with_label_values(&[kind]).inc();
}

pub fn record_bridge_submitted(target_chain_id: u32) {
    BRIDGE_SUBMITTED
        .with_label_values(&[&target_chain_id.to_string()])
        .inc();
}

pub fn record_transfer_transition(status: &str) {
    TRANSFER_TRANSITIONS.with_label_values(&[status]).inc();
}

pub fn record_poll_error() {
    POLL_ERRORS.with_label_values(&[]).inc();
}

pub fn record_unlock() {
    UNLOCKS.with_label_values(&[]).inc();
}

pub fn record_event(event_type: &str) {
    EVENTS_PUBLISHED.with_label_values(&[event_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        record_bridge_submitted(2);
        record_event("quote_updated");

        let text = render().unwrap();
        assert!(text.contains("swapbridge_bridge_submitted_total{target_chain_id=\"2\"}"));
        assert!(text.contains("swapbridge_events_published_total{event_type=\"quote_updated\"}"));
    }
}
