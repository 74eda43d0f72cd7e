//! Axum router and HTTP handlers for gsync-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers so tests can use the bare router.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use tracing::{error, info};

use crate::{
    api_types::{HealthResponse, StatusResponse, TriggerAccepted, TriggerRefused},
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/status", get(status_handler))
        .route("/v1/sync", post(trigger_sync))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /healthz
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "UP",
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

pub(crate) async fn metrics(State(st): State<Arc<AppState>>) -> Response {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&st.registry.gather(), &mut buf) {
        error!(error = %e, "metrics encode failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(prometheus::TEXT_FORMAT),
        )],
        buf,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = st.engine.settings();
    let last_pass = st.last_report.read().await.clone();
    (
        StatusCode::OK,
        Json(StatusResponse {
            running: st.guard.is_running(),
            phase: st.guard.phase(),
            mode: settings.mode,
            interval_ms: st.interval_ms,
            rules: settings.rules.len(),
            static_rules: settings.static_rules.len(),
            successes: st.guard.successes(),
            failures: st.guard.failures(),
            last_pass,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/sync
// ---------------------------------------------------------------------------

/// Start a pass now. `409` while another pass is in flight.
pub(crate) async fn trigger_sync(State(st): State<Arc<AppState>>) -> Response {
    match st.try_trigger() {
        Some(_) => {
            info!("manual sync triggered");
            (StatusCode::ACCEPTED, Json(TriggerAccepted { accepted: true })).into_response()
        }
        None => (
            StatusCode::CONFLICT,
            Json(TriggerRefused {
                error: "SYNC_IN_PROGRESS: a pass is already running".to_string(),
                phase: st.guard.phase(),
            }),
        )
            .into_response(),
    }
}
