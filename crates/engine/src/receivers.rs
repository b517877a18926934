//! Receiver directory and onboarding.
//!
//! Two call sites look receivers up by city and they disagree on purpose:
//! the fan-out engine treats an empty city as a successful no-op, while the
//! HTTP-facing [`ReceiverService::find_by_city`] reports it as `NotFound`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use siren_common::error::AppError;
use siren_common::types::{ChannelType, Contact, Receiver};

/// Read/write access to onboarded receivers.
#[async_trait]
pub trait ReceiverDirectory: Send + Sync {
    /// Receivers registered for `city`. An unknown city yields an empty list.
    async fn find_by_city(&self, city: &str) -> Result<Vec<Receiver>, AppError>;

    async fn create(&self, receiver: &Receiver) -> Result<(), AppError>;
}

#[derive(sqlx::FromRow)]
struct ReceiverRow {
    id: Uuid,
    name: String,
    city: String,
    contacts: Json<Vec<Contact>>,
}

impl From<ReceiverRow> for Receiver {
    fn from(row: ReceiverRow) -> Self {
        Receiver {
            id: row.id,
            name: row.name,
            city: row.city,
            contacts: row.contacts.0,
        }
    }
}

/// PostgreSQL-backed receiver directory; contacts live in a JSONB column.
#[derive(Clone)]
pub struct PgReceiverDirectory {
    pool: PgPool,
}

impl PgReceiverDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReceiverDirectory for PgReceiverDirectory {
    async fn find_by_city(&self, city: &str) -> Result<Vec<Receiver>, AppError> {
        let rows: Vec<ReceiverRow> =
            sqlx::query_as("SELECT id, name, city, contacts FROM receivers WHERE city = $1")
                .bind(city)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Receiver::from).collect())
    }

    async fn create(&self, receiver: &Receiver) -> Result<(), AppError> {
        sqlx::query("INSERT INTO receivers (id, name, city, contacts) VALUES ($1, $2, $3, $4)")
            .bind(receiver.id)
            .bind(&receiver.name)
            .bind(&receiver.city)
            .bind(Json(&receiver.contacts))
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Cells per onboarding row: first name; last name; phone; phone active;
/// email; email active; city.
const CSV_CELLS: usize = 7;

/// Parse a semicolon-delimited onboarding file.
///
/// A wrong cell count anywhere rejects the whole file. Rows without a full
/// name or with an unreadable active flag are skipped.
pub fn parse_receivers_csv(data: &[u8]) -> Result<Vec<Receiver>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut receivers = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|e| AppError::Validation(format!("Invalid CSV: {}", e)))?;
        if row.len() != CSV_CELLS {
            return Err(AppError::Validation(format!(
                "Invalid CSV row {}: expected {} cells, found {}",
                index + 1,
                CSV_CELLS,
                row.len()
            )));
        }

        // Header
        if index == 0 {
            continue;
        }

        let (first_name, last_name) = (row[0].trim(), row[1].trim());
        if first_name.is_empty() || last_name.is_empty() {
            tracing::debug!(row = index + 1, "Skipping receiver without a full name");
            continue;
        }

        let contacts = match contacts_from_row(&row) {
            Some(contacts) => contacts,
            None => {
                tracing::debug!(row = index + 1, "Skipping receiver with unreadable active flag");
                continue;
            }
        };

        receivers.push(Receiver {
            id: Uuid::new_v4(),
            name: format!("{} {}", first_name, last_name),
            city: row[6].trim().to_string(),
            contacts,
        });
    }

    Ok(receivers)
}

fn contacts_from_row(row: &csv::StringRecord) -> Option<Vec<Contact>> {
    let mut contacts = Vec::new();
    for (value, flag, channel_type) in [
        (&row[2], &row[3], ChannelType::Sms),
        (&row[4], &row[5], ChannelType::Email),
    ] {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        contacts.push(Contact {
            value: value.to_string(),
            channel_type,
            active: parse_flag(flag)?,
        });
    }
    Some(contacts)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// HTTP-facing receiver operations.
#[derive(Clone)]
pub struct ReceiverService {
    directory: Arc<dyn ReceiverDirectory>,
}

impl ReceiverService {
    pub fn new(directory: Arc<dyn ReceiverDirectory>) -> Self {
        Self { directory }
    }

    /// Receivers in `city`. Unlike the fan-out path, an empty result is
    /// reported to the caller as `NotFound`.
    pub async fn find_by_city(&self, city: &str) -> Result<Vec<Receiver>, AppError> {
        if city.trim().is_empty() {
            return Err(AppError::Validation("city is empty".to_string()));
        }

        let receivers = self.directory.find_by_city(city).await?;
        if receivers.is_empty() {
            return Err(AppError::NotFound(format!("No receivers in city '{}'", city)));
        }
        Ok(receivers)
    }

    /// Onboard every accepted row of a CSV file. Stops at the first store error.
    pub async fn upload(&self, data: &[u8]) -> Result<Vec<Receiver>, AppError> {
        let receivers = parse_receivers_csv(data)?;
        for receiver in &receivers {
            self.directory.create(receiver).await?;
        }

        tracing::info!(count = receivers.len(), "Receivers onboarded");
        Ok(receivers)
    }
}
