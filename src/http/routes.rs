//! Operational endpoints every tier serves: `/health` and `/metrics`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::observability::Telemetry;

/// Hook run before each scrape to refresh sampled gauges.
pub type ScrapeHook = Arc<dyn Fn(&Telemetry) + Send + Sync>;

#[derive(Clone)]
struct OpsState {
    telemetry: Telemetry,
    before_scrape: Option<ScrapeHook>,
}

/// Router serving `/health` and `/metrics` for `telemetry`'s service.
pub fn ops_router(telemetry: Telemetry, before_scrape: Option<ScrapeHook>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(OpsState {
            telemetry,
            before_scrape,
        })
}

async fn health(State(state): State<OpsState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": state.telemetry.service(),
    }))
}

async fn metrics(State(state): State<OpsState>) -> impl IntoResponse {
    if let Some(hook) = &state.before_scrape {
        hook(&state.telemetry);
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.telemetry.metrics().render(),
    )
}
