//! Template CRUD routes.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use uuid::Uuid;

use siren_common::error::AppError;
use siren_common::types::Template;
use siren_engine::templates::{CreateTemplateParams, UpdateTemplateParams};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", post(create_template).patch(update_template))
        .route("/templates/{id}", get(get_template).delete(delete_template))
}

/// POST /templates
async fn create_template(
    State(state): State<AppState>,
    payload: Result<Json<CreateTemplateParams>, JsonRejection>,
) -> Result<(StatusCode, Json<Template>), AppError> {
    let Json(params) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let template = state.templates.create(&params).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// PATCH /templates: Replace subject and text of an existing template.
async fn update_template(
    State(state): State<AppState>,
    payload: Result<Json<UpdateTemplateParams>, JsonRejection>,
) -> Result<Json<Template>, AppError> {
    let Json(params) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let template = state.templates.update(&params).await?;
    Ok(Json(template))
}

/// GET /templates/:id
async fn get_template(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Template>, AppError> {
    let id = template_id(id)?;
    Ok(Json(state.templates.get(id).await?))
}

/// DELETE /templates/:id (soft delete)
async fn delete_template(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let id = template_id(id)?;
    state.templates.delete(id).await?;
    Ok(Json(json!({ "deleted": true })))
}

fn template_id(id: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    id.map(|Path(id)| id)
        .map_err(|_| AppError::Validation("id must be a UUID".to_string()))
}
