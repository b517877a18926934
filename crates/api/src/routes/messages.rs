//! Broadcast dispatch route.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use siren_common::error::AppError;
use siren_common::types::BroadcastRequest;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/messages", post(send_message))
}

/// POST /messages: Render a template for a city and queue it for fan-out.
///
/// A 200 means the broadcast is queued; delivery happens asynchronously.
async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    state.dispatch.send(&request).await?;
    Ok(Json(json!({ "status": "queued" })))
}
