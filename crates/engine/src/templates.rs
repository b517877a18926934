//! Template store and CRUD service.
//!
//! Templates are soft-deleted: a deleted template keeps its row but is no
//! longer visible to lookups.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use siren_common::error::AppError;
use siren_common::types::Template;

/// Persistence contract for templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fetch a live template; `NotFound` when absent or deleted.
    async fn get_by_id(&self, id: Uuid) -> Result<Template, AppError>;

    async fn create(&self, subject: &str, text: &str) -> Result<Template, AppError>;

    /// `NotFound` when absent or deleted.
    async fn update(&self, id: Uuid, subject: &str, text: &str) -> Result<Template, AppError>;

    /// `NotFound` when absent or already deleted.
    async fn delete(&self, id: Uuid) -> Result<(), AppError>;
}

/// PostgreSQL-backed template store.
#[derive(Clone)]
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Template, AppError> {
        let template: Template = sqlx::query_as(
            r#"
            SELECT id, subject, text, created_at, updated_at
            FROM templates
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Template {} not found", id)))?;

        Ok(template)
    }

    async fn create(&self, subject: &str, text: &str) -> Result<Template, AppError> {
        let template: Template = sqlx::query_as(
            r#"
            INSERT INTO templates (id, subject, text)
            VALUES ($1, $2, $3)
            RETURNING id, subject, text, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subject)
        .bind(text)
        .fetch_one(&self.pool)
        .await?;

        Ok(template)
    }

    async fn update(&self, id: Uuid, subject: &str, text: &str) -> Result<Template, AppError> {
        let template: Template = sqlx::query_as(
            r#"
            UPDATE templates
            SET subject = $1, text = $2, updated_at = NOW()
            WHERE id = $3 AND deleted_at IS NULL
            RETURNING id, subject, text, created_at, updated_at
            "#,
        )
        .bind(subject)
        .bind(text)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Template {} not found", id)))?;

        Ok(template)
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE templates SET deleted_at = $1 WHERE id = $2 AND deleted_at IS NULL")
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Template {} not found", id)));
        }
        Ok(())
    }
}

/// Parameters for creating a template.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateParams {
    pub subject: String,
    pub text: String,
}

impl CreateTemplateParams {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_content(&self.subject, &self.text)
    }
}

/// Parameters for replacing a template's content.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTemplateParams {
    pub id: Uuid,
    pub subject: String,
    pub text: String,
}

impl UpdateTemplateParams {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.is_nil() {
            return Err(AppError::Validation("id is empty".to_string()));
        }
        validate_content(&self.subject, &self.text)
    }
}

fn validate_content(subject: &str, text: &str) -> Result<(), AppError> {
    if subject.trim().is_empty() {
        return Err(AppError::Validation("subject is empty".to_string()));
    }
    if text.trim().is_empty() {
        return Err(AppError::Validation("text is empty".to_string()));
    }
    Ok(())
}

/// Service layer for template CRUD.
#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn TemplateStore>,
}

impl TemplateService {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, params: &CreateTemplateParams) -> Result<Template, AppError> {
        params.validate()?;
        let template = self.store.create(&params.subject, &params.text).await?;
        tracing::info!(template_id = %template.id, "Template created");
        Ok(template)
    }

    pub async fn update(&self, params: &UpdateTemplateParams) -> Result<Template, AppError> {
        params.validate()?;
        let template = self
            .store
            .update(params.id, &params.subject, &params.text)
            .await?;
        tracing::info!(template_id = %template.id, "Template updated");
        Ok(template)
    }

    pub async fn get(&self, id: Uuid) -> Result<Template, AppError> {
        self.store.get_by_id(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.store.delete(id).await?;
        tracing::info!(template_id = %id, "Template deleted");
        Ok(())
    }
}
