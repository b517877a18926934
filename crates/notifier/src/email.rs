//! Mailgun email provider.

use async_trait::async_trait;

use siren_common::config::AppConfig;
use siren_common::types::{ChannelType, MessageRecord};

use crate::{NotifyError, Provider, ensure_success, trim_base_url};

pub const DEFAULT_MAILGUN_BASE_URL: &str = "https://api.mailgun.net";

/// Sends broadcasts through the Mailgun messages API.
pub struct MailgunProvider {
    client: reqwest::Client,
    api_key: String,
    domain: String,
    from: String,
    base_url: String,
}

impl MailgunProvider {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        domain: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            domain: domain.into(),
            from: from.into(),
            base_url: DEFAULT_MAILGUN_BASE_URL.to_string(),
        }
    }

    /// Point the provider at a different API host (EU region, test server).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = trim_base_url(base_url);
        self
    }

    /// Returns `None` unless the key, domain and sender are all configured.
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Option<Self> {
        let provider = Self::new(
            client,
            config.mailgun_api_key.clone()?,
            config.mailgun_domain.clone()?,
            config.mailgun_from.clone()?,
        );
        Some(match &config.mailgun_base_url {
            Some(url) => provider.with_base_url(url),
            None => provider,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v3/{}/messages", self.base_url, self.domain)
    }
}

#[async_trait]
impl Provider for MailgunProvider {
    fn channel(&self) -> ChannelType {
        ChannelType::Email
    }

    fn name(&self) -> &'static str {
        "mailgun"
    }

    async fn send(&self, record: &MessageRecord) -> Result<(), NotifyError> {
        let form = [
            ("from", self.from.as_str()),
            ("to", record.contact_value.as_str()),
            ("subject", record.subject.as_str()),
            ("text", record.text.as_str()),
        ];

        let response = self
            .client
            .post(self.endpoint())
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await?;

        ensure_success(response).await
    }
}
