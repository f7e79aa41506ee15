//! fundstx-rails-bridge
//!
//! Axum-based HTTP service exposing the USDC / USDCx bridge: recipient
//! encoding for both domains and step-by-step transfer sessions driven by
//! the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use fundstx_bridge::{
    amount, codec, AccountReference, BridgeConfig, BridgeError, ChainClient, DomainId,
    EncodedRecipient, FailureReason, Orchestrator, SessionState, SimulatedChain,
    TransferDirection, TransferIntent, TransferSession, RAIL_ID_BRIDGE,
};

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// How long a terminal session stays readable before it is evicted.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(15 * 60);

/// How long a non-terminal session may sit without progress before it is
/// treated as abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Last published state of a session.
#[derive(Clone)]
struct Snapshot {
    session: TransferSession,
    published_at: Instant,
}

/// One session. Readers only touch `snapshot`; `driver` is held by whichever
/// request is advancing or cancelling the session.
pub struct SessionSlot {
    snapshot: RwLock<Snapshot>,
    driver: Mutex<()>,
}

impl SessionSlot {
    fn new(session: TransferSession) -> Self {
        Self {
            snapshot: RwLock::new(Snapshot {
                session,
                published_at: Instant::now(),
            }),
            driver: Mutex::new(()),
        }
    }

    async fn current(&self) -> TransferSession {
        self.snapshot.read().await.session.clone()
    }

    async fn publish(&self, session: TransferSession) {
        *self.snapshot.write().await = Snapshot {
            session,
            published_at: Instant::now(),
        };
    }
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Transfer orchestrator shared by all sessions
    pub orchestrator: Arc<Orchestrator>,
    /// Sessions by id
    pub sessions: Arc<RwLock<HashMap<String, Arc<SessionSlot>>>>,
    retention: Duration,
    stale_after: Duration,
}

impl AppState {
    /// State backed by the given chain clients.
    pub fn new(
        config: BridgeConfig,
        source: Arc<dyn ChainClient>,
        destination: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(config, source, destination)),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            retention: DEFAULT_RETENTION,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// State backed by in-memory simulated chains.
    pub fn simulated(config: BridgeConfig) -> Self {
        Self::new(
            config,
            Arc::new(SimulatedChain::new(
                "ethereum-sepolia",
                "0x00000000000000000000000000000000000000e1",
            )),
            Arc::new(SimulatedChain::new(
                "stacks-testnet",
                "ST000000000000000000002AMW42H",
            )),
        )
    }

    /// Override how long terminal and stalled sessions are kept.
    pub fn with_retention(mut self, retention: Duration, stale_after: Duration) -> Self {
        self.retention = retention;
        self.stale_after = stale_after;
        self
    }

    fn config(&self) -> &BridgeConfig {
        self.orchestrator.config()
    }

    async fn slot(&self, id: &str) -> Result<Arc<SessionSlot>, RailError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RailError::SessionNotFound(id.to_string()))
    }

    /// Number of sessions that have not reached a terminal state.
    pub async fn active_sessions(&self) -> usize {
        let slots: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut active = 0;
        for slot in slots {
            if !slot.snapshot.read().await.session.is_terminal() {
                active += 1;
            }
        }
        active
    }

    /// Evict terminal sessions older than the retention window and sessions
    /// that stalled mid-flow, releasing any signer they hold. Sessions with an
    /// active driver are kept.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, slot) in sessions.iter() {
                let snapshot = slot.snapshot.read().await;
                let limit = if snapshot.session.is_terminal() {
                    self.retention
                } else {
                    self.stale_after
                };
                let idle = now.saturating_duration_since(snapshot.published_at);
                if idle >= limit && slot.driver.try_lock().is_ok() {
                    expired.push((id.clone(), snapshot.session.clone()));
                }
            }
        }

        if expired.is_empty() {
            return 0;
        }
        let mut sessions = self.sessions.write().await;
        for (id, session) in &expired {
            sessions.remove(id);
            self.orchestrator.release(session).await;
            if session.is_terminal() {
                tracing::debug!(session_id = %id, state = %session.state, "Session evicted");
            } else {
                tracing::warn!(session_id = %id, state = %session.state, "Stalled session evicted");
            }
        }
        expired.len()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::simulated(BridgeConfig::testnet())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the router
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health))
        .route("/rails/bridge/info", get(info))
        // Recipient codec
        .route("/rails/bridge/encode-recipient", post(encode_recipient))
        .route("/rails/bridge/decode-recipient", post(decode_recipient))
        // Transfer sessions
        .route("/rails/bridge/sessions", post(create_session))
        .route("/rails/bridge/sessions/:id", get(get_session))
        .route("/rails/bridge/sessions/:id/advance", post(advance_session))
        .route("/rails/bridge/sessions/:id/cancel", post(cancel_session))
        .layer(cors)
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - HEALTH & INFO
// ═══════════════════════════════════════════════════════════════════════════════

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "rail_id": RAIL_ID_BRIDGE,
        "version": fundstx_bridge::VERSION,
    }))
}

async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config();
    let sessions = state.active_sessions().await;

    let routes: Vec<_> = [TransferDirection::Deposit, TransferDirection::Withdraw]
        .into_iter()
        .map(|direction| {
            let domain = config.domain_for(direction);
            serde_json::json!({
                "direction": direction,
                "domain": domain,
                "domain_name": domain.display_name(),
                "signer": Orchestrator::signing_side(direction),
                "steps": direction.step_count(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "rail_id": RAIL_ID_BRIDGE,
        "token_decimals": config.token_decimals,
        "usdc_token": config.usdc_token,
        "xreserve": config.xreserve,
        "usdcx_contract": config.usdcx_contract,
        "confirmation_timeout_secs": config.confirmation_timeout_secs,
        "routes": routes,
        "active_sessions": sessions,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - RECIPIENT CODEC
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct EncodeRecipientRequest {
    pub address: String,
    pub domain: DomainId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncodeRecipientResponse {
    pub recipient: EncodedRecipient,
    pub domain: DomainId,
    pub family: String,
}

async fn encode_recipient(
    Json(req): Json<EncodeRecipientRequest>,
) -> Result<Json<EncodeRecipientResponse>, RailError> {
    let family = req.domain.address_family()?;
    let recipient = codec::encode_address(&req.address, req.domain)?;

    Ok(Json(EncodeRecipientResponse {
        recipient,
        domain: req.domain,
        family: family.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DecodeRecipientRequest {
    /// `0x`-prefixed hex of the 32-byte field
    pub recipient: String,
    pub domain: DomainId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecodeRecipientResponse {
    pub address: AccountReference,
    pub family: String,
    pub version: Option<u8>,
    pub testnet: bool,
}

async fn decode_recipient(
    Json(req): Json<DecodeRecipientRequest>,
) -> Result<Json<DecodeRecipientResponse>, RailError> {
    let hex_digits = req.recipient.strip_prefix("0x").unwrap_or(&req.recipient);
    let bytes = hex::decode(hex_digits)?;
    let address = codec::decode(&bytes, req.domain)?;

    Ok(Json(DecodeRecipientResponse {
        family: address.family().to_string(),
        version: address.version(),
        testnet: address.is_testnet(),
        address,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - SESSIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub direction: TransferDirection,
    /// Decimal amount, e.g. "1.5"
    pub amount: String,
    /// Chain-native recipient address
    pub destination: String,
    /// Already-connected signing account
    pub source_account: Option<String>,
    /// Decimal balance the caller holds
    pub declared_balance: Option<String>,
    /// Destination domain override
    pub domain: Option<DomainId>,
}

/// JSON view of a session. Amounts are strings so they survive any `u128`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub direction: TransferDirection,
    pub amount: String,
    pub amount_units: String,
    pub destination: AccountReference,
    pub domain: DomainId,
    pub state: SessionState,
    pub failure: Option<FailureReason>,
    pub terminal: bool,
    pub identity: Option<String>,
    pub recipient: Option<EncodedRecipient>,
    pub steps: Vec<StepView>,
    pub last_error: Option<ErrorBody>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StepView {
    pub index: usize,
    pub function: String,
    pub target: String,
    pub tx_hash: Option<String>,
    pub explorer_url: Option<String>,
}

impl SessionView {
    fn new(session: &TransferSession, config: &BridgeConfig) -> Self {
        let intent = &session.intent;
        let steps = session
            .plan
            .iter()
            .enumerate()
            .map(|(index, op)| {
                let tx_hash = session.step_handles.get(index).map(|h| h.tx_hash.clone());
                StepView {
                    index,
                    function: op.descriptor().name.to_string(),
                    target: op.target(),
                    explorer_url: tx_hash
                        .as_deref()
                        .map(|tx| config.explorer_tx_url(intent.direction, tx)),
                    tx_hash,
                }
            })
            .collect();

        Self {
            id: session.id.clone(),
            direction: intent.direction,
            amount: amount::format_units(intent.amount, config.token_decimals),
            amount_units: intent.amount.to_string(),
            destination: intent.destination,
            domain: intent.domain,
            state: session.state,
            failure: session.failure(),
            terminal: session.is_terminal(),
            identity: session.identity.as_ref().map(|i| i.address.clone()),
            recipient: session.recipient,
            steps,
            last_error: session.last_error.as_ref().map(ErrorBody::from_bridge),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), RailError> {
    let config = state.config();
    let domain = req.domain.unwrap_or_else(|| config.domain_for(req.direction));
    let destination = domain.address_family()?.parse(&req.destination)?;
    let amount = amount::parse_units(&req.amount, config.token_decimals)?;

    let mut intent = TransferIntent::new(req.direction, amount, destination, domain);
    if let Some(source) = req.source_account.filter(|s| !s.trim().is_empty()) {
        intent = intent.with_source(source.trim());
    }
    if let Some(balance) = req.declared_balance {
        intent = intent.with_declared_balance(parse_balance(&balance, config.token_decimals)?);
    }

    state.sweep().await;
    let session = state.orchestrator.submit(intent);
    let view = SessionView::new(&session, config);
    state
        .sessions
        .write()
        .await
        .insert(session.id.clone(), Arc::new(SessionSlot::new(session)));

    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, RailError> {
    let slot = state.slot(&id).await?;
    let session = slot.current().await;
    Ok(Json(SessionView::new(&session, state.config())))
}

async fn advance_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, RailError> {
    let slot = state.slot(&id).await?;
    let _driver = slot.driver.lock().await;
    let session = state.orchestrator.advance(slot.current().await).await;
    let view = SessionView::new(&session, state.config());
    slot.publish(session).await;
    Ok(Json(view))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, RailError> {
    let slot = state.slot(&id).await?;
    let _driver = slot.driver.lock().await;
    let mut session = slot.current().await;
    state.orchestrator.cancel(&mut session)?;
    let view = SessionView::new(&session, state.config());
    slot.publish(session).await;
    Ok(Json(view))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors returned by rail handlers.
#[derive(Debug, Error)]
pub enum RailError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl RailError {
    fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidHex(_) => StatusCode::BAD_REQUEST,
            Self::Bridge(err) => match err {
                BridgeError::InvalidAddress(_)
                | BridgeError::InvalidAmount(_)
                | BridgeError::UnsupportedDomain(_)
                | BridgeError::Serialization(_)
                | BridgeError::UserRejected(_) => StatusCode::BAD_REQUEST,
                BridgeError::NotCancellable(_) => StatusCode::CONFLICT,
                BridgeError::BroadcastError(_) | BridgeError::ChainError(_) => {
                    StatusCode::BAD_GATEWAY
                }
                BridgeError::ConfirmationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                BridgeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
    pub retryable: bool,
}

impl ErrorBody {
    fn from_bridge(err: &BridgeError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind().to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl IntoResponse for RailError {
    fn into_response(self) -> axum::response::Response {
        let body = match &self {
            Self::Bridge(err) => ErrorBody::from_bridge(err),
            Self::SessionNotFound(_) => ErrorBody {
                error: self.to_string(),
                kind: "session_not_found".into(),
                retryable: false,
            },
            Self::InvalidHex(_) => ErrorBody {
                error: self.to_string(),
                kind: "invalid_hex".into(),
                retryable: false,
            },
        };
        if self.status().is_server_error() {
            tracing::warn!(error = %self, "Rail request failed");
        }
        (self.status(), Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Declared balances may legitimately be zero, unlike transfer amounts.
fn parse_balance(balance: &str, decimals: u8) -> Result<u128, BridgeError> {
    let trimmed = balance.trim();
    let all_zero = trimmed.contains('0')
        && trimmed.matches('.').count() <= 1
        && trimmed.chars().all(|c| c == '0' || c == '.');
    if all_zero {
        return Ok(0);
    }
    amount::parse_units(trimmed, decimals)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

pub mod main_entry {
    use super::*;
    use std::env;
    use std::net::SocketAddr;

    use anyhow::Context;

    const DEFAULT_PORT: u16 = 3010;
    const SWEEP_INTERVAL_SECS: u64 = 60;

    pub async fn run_server() -> anyhow::Result<()> {
        dotenvy::dotenv().ok();

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fundstx_rails_bridge=info,fundstx_bridge=info".into()),
            )
            .init();

        let config = BridgeConfig::from_env().context("invalid FUNDSTX_* configuration")?;

        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        tracing::warn!("No live chain clients configured; using simulated chains");
        let state = AppState::simulated(config);
        tokio::spawn(sweep_sessions(state.clone()));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Bridge rail listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        axum::serve(listener, app_router(state)).await?;

        Ok(())
    }

    async fn sweep_sessions(state: AppState) {
        let mut ticker = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let evicted = state.sweep().await;
            if evicted > 0 {
                tracing::info!(evicted, "Swept expired sessions");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
