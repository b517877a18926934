//! Receiver lookup and CSV onboarding routes.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use siren_common::error::AppError;
use siren_common::types::Receiver;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/receivers", get(find_receivers))
        .route("/receivers/upload", post(upload_receivers))
}

#[derive(Debug, Deserialize)]
struct CityQuery {
    #[serde(default)]
    city: String,
}

/// GET /receivers?city=
///
/// Responds 404 when the city has no receivers.
async fn find_receivers(
    State(state): State<AppState>,
    Query(query): Query<CityQuery>,
) -> Result<Json<Vec<Receiver>>, AppError> {
    Ok(Json(state.receivers.find_by_city(&query.city).await?))
}

/// POST /receivers/upload (body is a semicolon-delimited CSV file)
async fn upload_receivers(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Vec<Receiver>>), AppError> {
    let receivers = state.receivers.upload(&body).await?;
    Ok((StatusCode::CREATED, Json(receivers)))
}
