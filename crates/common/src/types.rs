use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Contact channel a receiver can be reached on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ChannelType {
    Sms,
    Email,
}

impl ChannelType {
    pub const ALL: [ChannelType; 2] = [ChannelType::Sms, ChannelType::Email];
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Sms => write!(f, "sms"),
            ChannelType::Email => write!(f, "email"),
        }
    }
}

/// Delivery status of a message ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum MessageStatus {
    Created,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Created)
    }

    /// Status only moves forward: `Created` may become `Delivered` or `Failed`,
    /// and re-applying the current status is a no-op.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        self == next || (self == MessageStatus::Created && next.is_terminal())
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Created => write!(f, "created"),
            MessageStatus::Delivered => write!(f, "delivered"),
            MessageStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(MessageStatus::Created),
            "delivered" => Ok(MessageStatus::Delivered),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(AppError::Validation(format!(
                "Unknown message status '{}'",
                other
            ))),
        }
    }
}

/// A broadcast template. `text` holds two positional `%s` slots filled with
/// the city and the strength, in that order.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: Uuid,
    pub subject: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One way of reaching a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub value: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(rename = "is_active")]
    pub active: bool,
}

/// A person eligible to receive broadcasts for their city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub id: Uuid,
    pub name: String,
    pub city: String,
    pub contacts: Vec<Contact>,
}

impl Receiver {
    /// Contacts that take part in delivery.
    pub fn active_contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter().filter(|c| c.active)
    }
}

/// Incoming request to broadcast a template to a city.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub template_id: Uuid,
    pub city: String,
    pub strength: String,
}

impl BroadcastRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.template_id.is_nil() {
            return Err(AppError::Validation("template_id is empty".to_string()));
        }
        if self.city.trim().is_empty() {
            return Err(AppError::Validation("city is empty".to_string()));
        }
        if self.strength.trim().is_empty() {
            return Err(AppError::Validation("strength is empty".to_string()));
        }
        Ok(())
    }
}

/// Queue payload: a template rendered for one city, not yet fanned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedBroadcast {
    pub subject: String,
    pub text: String,
    pub status: MessageStatus,
    pub city: String,
}

/// Ledger row for one (receiver, active contact) delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: Uuid,
    pub subject: String,
    pub text: String,
    pub status: MessageStatus,
    pub receiver_id: Uuid,
    pub contact_type: ChannelType,
    pub contact_value: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Build a fresh `Created` record. The id is left nil; the ledger assigns it.
    pub fn for_contact(broadcast: &RenderedBroadcast, receiver_id: Uuid, contact: &Contact) -> Self {
        Self {
            id: Uuid::nil(),
            subject: broadcast.subject.clone(),
            text: broadcast.text.clone(),
            status: MessageStatus::Created,
            receiver_id,
            contact_type: contact.channel_type,
            contact_value: contact.value.clone(),
            created_at: Utc::now(),
        }
    }
}
