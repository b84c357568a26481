//! Swapbridge daemon - swap and bridge client session over a devnet ledger
//!
//! Runs one session for the configured wallet, exposes it over a local
//! HTTP API, and polls submitted transfers until they are terminal.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use swapbridge::api::{self, AppState};
use swapbridge::config::Settings;
use swapbridge::events::{EventBus, LogSubscriber, RecentEvents};
use swapbridge::ledger::SimulatedLedger;
use swapbridge::metrics::MetricsServer;
use swapbridge::store::{FileBackend, PendingTransferStore};
use swapbridge::{Session, SessionServices};

/// Events kept for `GET /events`
const RECENT_EVENTS: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log format can follow it
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(&settings.session.log_format);

    info!("Starting Swapbridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize the devnet ledger (pools, balances, bridge contract)
    let ledger = Arc::new(
        SimulatedLedger::from_settings(&settings).context("Failed to seed simulated ledger")?,
    );

    // Initialize pending transfer store
    let backend = FileBackend::new(settings.store.directory.clone())
        .await
        .with_context(|| format!("Failed to open store at {:?}", settings.store.directory))?;
    let store = Arc::new(PendingTransferStore::new(Arc::new(backend)));
    info!("Pending transfer store at {:?}", settings.store.directory);

    // Initialize event bus
    let recent_events = Arc::new(RecentEvents::new(RECENT_EVENTS));
    let bus = Arc::new(
        EventBus::builder()
            .subscribe(Arc::new(LogSubscriber))
            .subscribe(recent_events.clone())
            .build(),
    );

    // Start session (reloads tracked transfers and starts polling)
    let session = Session::start(
        &settings,
        SessionServices {
            ledger: ledger.clone(),
            wallet: ledger,
            store,
            bus,
        },
    )
    .await?;

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            session: session.clone(),
            recent_events,
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Swapbridge is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    session.shutdown().await;

    // Abort background tasks
    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swapbridge stopped");
    Ok(())
}

fn init_logging(format: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swapbridge=debug,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
