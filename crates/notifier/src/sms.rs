//! Twilio SMS provider.

use async_trait::async_trait;

use siren_common::config::AppConfig;
use siren_common::types::{ChannelType, MessageRecord};

use crate::{NotifyError, Provider, ensure_success, trim_base_url};

pub const DEFAULT_TWILIO_BASE_URL: &str = "https://api.twilio.com";

/// Sends broadcast text as SMS through the Twilio Messages API.
///
/// SMS carries only the message text; the subject is dropped.
pub struct TwilioProvider {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
}

impl TwilioProvider {
    pub fn new(
        client: reqwest::Client,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            client,
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            base_url: DEFAULT_TWILIO_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = trim_base_url(base_url);
        self
    }

    /// Returns `None` unless the SID, token and sender number are all configured.
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Option<Self> {
        let provider = Self::new(
            client,
            config.twilio_account_sid.clone()?,
            config.twilio_auth_token.clone()?,
            config.twilio_from_number.clone()?,
        );
        Some(match &config.twilio_base_url {
            Some(url) => provider.with_base_url(url),
            None => provider,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait]
impl Provider for TwilioProvider {
    fn channel(&self) -> ChannelType {
        ChannelType::Sms
    }

    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, record: &MessageRecord) -> Result<(), NotifyError> {
        let form = [
            ("To", record.contact_value.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", record.text.as_str()),
        ];

        let response = self
            .client
            .post(self.endpoint())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        ensure_success(response).await
    }
}
