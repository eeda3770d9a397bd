// =============================================================================
// REST API Endpoints — Axum 0.7 (§6.8)
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::types::{AccountMode, TradingMode};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/signals", get(signals))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/config", post(patch_config))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/api/v1/control/account-mode", post(control_account_mode))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Positions (authenticated)
// =============================================================================

async fn positions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.position_store.list_all())
}

// =============================================================================
// Signals (authenticated)
// =============================================================================

async fn signals(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(24);
    Json(state.signal_store.list_active_signals(cutoff))
}

// =============================================================================
// Decisions (authenticated)
// =============================================================================

async fn decisions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.decision_log.recent())
}

// =============================================================================
// Config (authenticated) — §6.7 recognized-key table
// =============================================================================

async fn get_config(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.runtime_config.read().clone())
}

#[derive(Deserialize, Default)]
struct ConfigPatch {
    #[serde(default)]
    max_concurrent_positions: Option<usize>,
    #[serde(default)]
    max_daily_signals: Option<usize>,
    #[serde(default)]
    max_volatility: Option<f64>,
    #[serde(default)]
    min_volume_24h: Option<f64>,
    #[serde(default)]
    min_signal_store_score: Option<f64>,
    #[serde(default)]
    min_selector_score: Option<f64>,
    #[serde(default)]
    symbols: Option<Vec<String>>,
}

async fn patch_config(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<ConfigPatch>,
) -> impl IntoResponse {
    let mut changed = false;
    {
        let mut config = state.runtime_config.write();
        macro_rules! apply {
            ($field:ident) => {
                if let Some(val) = patch.$field {
                    config.$field = val;
                    changed = true;
                }
            };
        }
        apply!(max_concurrent_positions);
        apply!(max_daily_signals);
        apply!(max_volatility);
        apply!(min_volume_24h);
        apply!(min_signal_store_score);
        apply!(min_selector_score);
        apply!(symbols);
    }

    if changed {
        let snapshot = state.runtime_config.read().clone();
        if let Err(err) = snapshot.save("runtime_config.json") {
            warn!(error = %err, "failed to persist config patch");
        }
        state.increment_version();
        info!("runtime config patched via API");
    }

    Json(state.runtime_config.read().clone())
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: String,
    message: String,
}

async fn control_pause(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Paused;
    }
    state.increment_version();
    info!("trading paused via API");

    Json(ControlResponse { trading_mode: "Paused".to_string(), message: "trading paused".to_string() })
}

async fn control_resume(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Live;
    }
    state.increment_version();
    info!("trading resumed via API");

    Json(ControlResponse { trading_mode: "Live".to_string(), message: "trading resumed".to_string() })
}

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Killed;
    }
    state.increment_version();
    warn!("trading killed via API");

    Json(ControlResponse {
        trading_mode: "Killed".to_string(),
        message: "trading killed — manual restart required".to_string(),
    })
}

#[derive(Deserialize)]
struct AccountModeRequest {
    account_mode: String,
    #[serde(default)]
    confirm_live: bool,
}

#[derive(Serialize)]
struct AccountModeResponse {
    account_mode: String,
}

async fn control_account_mode(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccountModeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let mode = match req.account_mode.to_lowercase().as_str() {
        "demo" => AccountMode::Demo,
        "live" => {
            if !req.confirm_live {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": "switching to Live mode requires confirm_live: true",
                    })),
                ));
            }
            warn!("switching to LIVE account mode via API");
            AccountMode::Live
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": format!("invalid account mode: '{}', use 'demo' or 'live'", req.account_mode),
                })),
            ));
        }
    };

    {
        let mut config = state.runtime_config.write();
        config.account_mode = mode;
    }
    state.increment_version();
    info!(account_mode = %mode, "account mode changed via API");

    Ok(Json(AccountModeResponse { account_mode: mode.to_string() }))
}
