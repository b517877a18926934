//! Delivery providers for broadcast messages.
//!
//! Each provider is a thin adapter over one third-party transactional channel.
//! Providers never retry or rate-limit; failed sends stay in the ledger as
//! `created` until the reconciliation sweep picks them up.

pub mod email;
pub mod sms;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use siren_common::config::AppConfig;
use siren_common::types::{ChannelType, MessageRecord};

/// Errors raised while handing a message to a provider.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No provider registered for channel '{0}'")]
    NoProvider(ChannelType),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected message (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Trait every channel adapter implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The channel this provider delivers to.
    fn channel(&self) -> ChannelType;

    /// Human-readable name for logs (e.g., "mailgun").
    fn name(&self) -> &'static str;

    /// Deliver one ledger record to `record.contact_value`.
    async fn send(&self, record: &MessageRecord) -> Result<(), NotifyError>;
}

/// Channel → provider mapping, populated once at startup and read-only after.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ChannelType, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its channel. A later registration for the
    /// same channel replaces the earlier one.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        let channel = provider.channel();
        if let Some(previous) = self.providers.insert(channel, provider) {
            tracing::warn!(
                channel = %channel,
                replaced = previous.name(),
                "Provider registered twice for channel"
            );
        }
        self
    }

    /// Build the registry from configured credentials. Channels without
    /// credentials are left unregistered.
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::new();

        match email::MailgunProvider::from_config(config, client.clone()) {
            Some(provider) => registry = registry.with_provider(Arc::new(provider)),
            None => tracing::warn!("Mailgun credentials missing, email delivery disabled"),
        }

        match sms::TwilioProvider::from_config(config, client) {
            Some(provider) => registry = registry.with_provider(Arc::new(provider)),
            None => tracing::warn!("Twilio credentials missing, SMS delivery disabled"),
        }

        tracing::info!(channels = ?registry.channels(), "Provider registry ready");
        registry
    }

    pub fn get(&self, channel: ChannelType) -> Option<&Arc<dyn Provider>> {
        self.providers.get(&channel)
    }

    /// Dispatch a record to the provider keyed by its contact type.
    pub async fn send(&self, record: &MessageRecord) -> Result<(), NotifyError> {
        let provider = self
            .get(record.contact_type)
            .ok_or(NotifyError::NoProvider(record.contact_type))?;

        provider.send(record).await?;

        tracing::debug!(
            message_id = %record.id,
            provider = provider.name(),
            "Message handed to provider"
        );
        Ok(())
    }

    /// Registered channels in a stable order.
    pub fn channels(&self) -> Vec<ChannelType> {
        ChannelType::ALL
            .into_iter()
            .filter(|c| self.providers.contains_key(c))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Map a non-2xx provider response into `NotifyError::Rejected`.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Strip a trailing slash so paths can be appended with `format!`.
pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
