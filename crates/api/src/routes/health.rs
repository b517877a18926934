//! Liveness probe, rate limited like every other route.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "siren-api",
        "version": env!("CARGO_PKG_VERSION"),
        "queue": state.config.broadcast_queue_key,
    }))
}
