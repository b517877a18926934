//! Message ledger: one row per (receiver, active contact) delivery attempt.
//!
//! Rows are created as `created` by the fan-out engine, moved to a terminal
//! status exactly once, and never deleted.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use siren_common::error::AppError;
use siren_common::types::{MessageRecord, MessageStatus};

/// Persistence contract for delivery records. Implementations must tolerate
/// many concurrent callers; the fan-out workers share one instance.
#[async_trait]
pub trait MessageLedger: Send + Sync {
    /// Persist `record` with status `created`, assigning an id when the
    /// record's id is nil. Returns the stored id.
    async fn create(&self, record: &MessageRecord) -> Result<Uuid, AppError>;

    /// Move one record to `status`. Unknown ids yield `NotFound`; backward or
    /// sideways moves between terminal states yield `Validation`.
    async fn update_status(&self, id: Uuid, status: MessageStatus) -> Result<(), AppError>;

    /// All records currently in `status`.
    async fn find_by_status(&self, status: MessageStatus) -> Result<Vec<MessageRecord>, AppError>;
}

/// Reject transitions that would move a record backwards.
pub fn check_transition(id: Uuid, current: MessageStatus, next: MessageStatus) -> Result<(), AppError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Message {} cannot move from {} to {}",
            id, current, next
        )))
    }
}

/// Id to store for a new record.
pub(crate) fn assign_id(record: &MessageRecord) -> Uuid {
    if record.id.is_nil() {
        Uuid::new_v4()
    } else {
        record.id
    }
}

/// PostgreSQL-backed ledger over the `messages` table.
#[derive(Clone)]
pub struct PgMessageLedger {
    pool: PgPool,
}

impl PgMessageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageLedger for PgMessageLedger {
    async fn create(&self, record: &MessageRecord) -> Result<Uuid, AppError> {
        let id = assign_id(record);

        sqlx::query(
            r#"
            INSERT INTO messages (id, subject, text, status, receiver_id, contact_type, contact_value, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(&record.subject)
        .bind(&record.text)
        .bind(MessageStatus::Created.to_string())
        .bind(record.receiver_id)
        .bind(record.contact_type.to_string())
        .bind(&record.contact_value)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_status(&self, id: Uuid, status: MessageStatus) -> Result<(), AppError> {
        // Only `created` rows (or rows already in the target status) match.
        let result = sqlx::query(
            "UPDATE messages SET status = $1 WHERE id = $2 AND (status = 'created' OR status = $1)",
        )
        .bind(status.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match current {
            None => Err(AppError::NotFound(format!("Message {} not found", id))),
            Some((current,)) => check_transition(id, current.parse()?, status),
        }
    }

    async fn find_by_status(&self, status: MessageStatus) -> Result<Vec<MessageRecord>, AppError> {
        let records: Vec<MessageRecord> = sqlx::query_as(
            r#"
            SELECT id, subject, text, status, receiver_id, contact_type, contact_value, created_at
            FROM messages
            WHERE status = $1
            ORDER BY created_at
            "#,
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_transition() {
        let id = Uuid::new_v4();
        assert!(check_transition(id, MessageStatus::Created, MessageStatus::Delivered).is_ok());
        assert!(check_transition(id, MessageStatus::Failed, MessageStatus::Failed).is_ok());
        let err = check_transition(id, MessageStatus::Delivered, MessageStatus::Created).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
