//! HTTP API for the wallet-driven client
//!
//! Thin JSON surface over one [`Session`]. Errors are rendered as
//! `{kind, message}` with a status code chosen by error kind.

use crate::amm::SwapQuote;
use crate::bridge::{BridgeFees, BridgeSnapshot, Chain};
use crate::config::ApiConfig;
use crate::error::{ClientError, ClientResult, ErrorBody, ErrorKind, QuoteError};
use crate::events::{RecentEvents, RecordedEvent};
use crate::session::Session;
use crate::store::{BridgeTransfer, SwapTransaction};
use crate::swap::{SettingsUpdate, SwapSettings, SwapSnapshot};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub recent_events: Arc<RecentEvents>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/chains", get(get_chains))
        .route("/transfers", get(get_transfers))
        .route("/events", get(get_events))
        .route("/swap", get(get_swap))
        .route("/swap/quote", post(quote_swap))
        .route("/swap/execute", post(execute_swap))
        .route("/swap/settings", post(update_swap_settings))
        .route("/bridge", get(get_bridge))
        .route("/bridge/fees", post(estimate_bridge_fees))
        .route("/bridge/execute", post(execute_bridge))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> ClientResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ClientError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| ClientError::Internal(format!("api server: {}", e)))?;

    Ok(())
}

/// Client error rendered as an HTTP response
pub struct ApiError(ClientError);

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match (&self.0, self.0.kind()) {
            (ClientError::AlreadyInProgress, _) => StatusCode::CONFLICT,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Protocol) => StatusCode::CONFLICT,
            (_, ErrorKind::Quote) | (_, ErrorKind::Execution) => StatusCode::BAD_GATEWAY,
            (_, ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let session = &state.session;
    Json(HealthResponse {
        status: if session.is_running() { "ok" } else { "stopped" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_id: session.id().to_string(),
        wallet: session.wallet_address(),
        uptime_seconds: (Utc::now() - session.started_at()).num_seconds().max(0) as u64,
    })
}

async fn get_chains(State(state): State<AppState>) -> Json<Vec<Chain>> {
    Json(state.session.chains().all().cloned().collect())
}

async fn get_transfers(State(state): State<AppState>) -> ApiResult<TransfersResponse> {
    Ok(Json(TransfersResponse {
        bridge: state.session.transfers().await?,
        swaps: state.session.swaps().await?,
    }))
}

async fn get_events(State(state): State<AppState>) -> Json<Vec<RecordedEvent>> {
    Json(state.recent_events.snapshot())
}

async fn get_swap(State(state): State<AppState>) -> Json<SwapSnapshot> {
    Json(state.session.swap().snapshot())
}

async fn quote_swap(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<SwapQuote> {
    let quote = state
        .session
        .swap()
        .quote_now(&request.token_in, &request.token_out, &request.amount)
        .await?;
    Ok(Json(quote))
}

async fn execute_swap(State(state): State<AppState>) -> ApiResult<SubmittedResponse> {
    let hash = state.session.swap().execute().await?;
    Ok(Json(SubmittedResponse { hash }))
}

async fn update_swap_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<SwapSettings> {
    Ok(Json(state.session.swap().update_settings(update).await?))
}

async fn get_bridge(State(state): State<AppState>) -> Json<BridgeSnapshot> {
    Json(state.session.bridge().snapshot())
}

async fn estimate_bridge_fees(
    State(state): State<AppState>,
    Json(request): Json<BridgeRequest>,
) -> ApiResult<BridgeFees> {
    let bridge = state.session.bridge();
    request.apply(&state.session)?;
    let fees = bridge
        .estimate_fees()
        .await?
        .ok_or(ClientError::Quote(QuoteError::Superseded))?;
    Ok(Json(fees))
}

async fn execute_bridge(
    State(state): State<AppState>,
    Json(request): Json<BridgeRequest>,
) -> ApiResult<BridgeTransfer> {
    request.apply(&state.session)?;
    Ok(Json(state.session.bridge().execute_bridge().await?))
}

// Request and response types

#[derive(Debug, Deserialize)]
struct QuoteRequest {
    token_in: String,
    token_out: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct BridgeRequest {
    source_chain_id: u32,
    target_chain_id: u32,
    amount: String,
    #[serde(default)]
    recipient: Option<String>,
}

impl BridgeRequest {
    fn apply(self, session: &Session) -> ClientResult<()> {
        session.bridge().prepare(
            self.source_chain_id,
            self.target_chain_id,
            &self.amount,
            self.recipient,
        )
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    session_id: String,
    wallet: Option<String>,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct TransfersResponse {
    bridge: Vec<BridgeTransfer>,
    swaps: Vec<SwapTransaction>,
}

#[derive(Serialize)]
struct SubmittedResponse {
    hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{tests::SAMPLE, Settings};
    use crate::events::EventBus;
    use crate::ledger::SimulatedLedger;
    use crate::session::SessionServices;
    use crate::store::{MemoryBackend, PendingTransferStore};

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<Session>) {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        let ledger = Arc::new(SimulatedLedger::from_settings(&settings).unwrap());
        let recent_events = Arc::new(RecentEvents::new(32));
        let services = SessionServices {
            ledger: ledger.clone(),
            wallet: ledger,
            store: Arc::new(PendingTransferStore::new(Arc::new(MemoryBackend::new()))),
            bus: Arc::new(EventBus::builder().subscribe(recent_events.clone()).build()),
        };
        let session = Session::start(&settings, services).await.unwrap();
        let app = router(AppState {
            session: session.clone(),
            recent_events,
        });
        (app, session)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_chains_listed() {
        let (app, session) = app().await;
        let (status, body) = call(&app, Method::GET, "/chains", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);
        assert_eq!(body[1]["required_confirmations"], 12);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_quote_then_execute_swap() {
        let (app, session) = app().await;
        let (status, quote) = call(
            &app,
            Method::POST,
            "/swap/quote",
            Some(json!({"token_in": "EQTokenA", "token_out": "EQTokenB", "amount": "10"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(quote["estimated_output"], 9_066_108_938u64);
        assert_eq!(quote["minimum_output"], 9_020_778_393u64);

        let (status, body) = call(&app, Method::POST, "/swap/execute", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["hash"].is_string());

        let (_, transfers) = call(&app, Method::GET, "/transfers", None).await;
        assert_eq!(transfers["swaps"][0]["status"], "completed");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_without_quote_is_bad_request() {
        let (app, session) = app().await;
        let (status, body) = call(&app, Method::POST, "/swap/execute", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
        assert_eq!(body["message"], "Select tokens");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_bridge_fees_and_limits() {
        let (app, session) = app().await;
        let (status, fees) = call(
            &app,
            Method::POST,
            "/bridge/fees",
            Some(json!({"source_chain_id": 1, "target_chain_id": 2, "amount": "100"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fees["total_fee"], 350_000_000u64);

        let (status, body) = call(
            &app,
            Method::POST,
            "/bridge/execute",
            Some(json!({"source_chain_id": 1, "target_chain_id": 2, "amount": "5"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Minimum amount is 10 TON");

        let (status, body) = call(
            &app,
            Method::POST,
            "/bridge/execute",
            Some(json!({"source_chain_id": 1, "target_chain_id": 2, "amount": "100"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["required_confirmations"], 12);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_settings_out_of_range() {
        let (app, session) = app().await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/swap/settings",
            Some(json!({"deadline_minutes": 90})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
        session.shutdown().await;
    }

    #[test]
    fn test_status_by_kind() {
        let status = |err: ClientError| ApiError(err).status();
        assert_eq!(status(ClientError::AlreadyInProgress), StatusCode::CONFLICT);
        assert_eq!(
            status(ClientError::Timeout {
                operation: "swap".into()
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status(QuoteError::PoolEmpty.into()), StatusCode::BAD_GATEWAY);
        assert_eq!(status(ClientError::Store("io".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
