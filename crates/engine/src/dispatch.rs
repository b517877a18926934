//! Broadcast dispatch: turn a request into a rendered, queued broadcast.

use std::sync::Arc;

use siren_common::error::AppError;
use siren_common::types::{BroadcastRequest, MessageStatus, RenderedBroadcast};

use crate::queue::{BroadcastPublisher, encode};
use crate::templates::TemplateStore;

/// Fill the `%s` slots of `text` with `city` then `strength`.
///
/// `%%` renders as a literal `%`. Slots beyond the second are left as `%s`;
/// templates with fewer slots simply drop the unused values.
pub fn render(text: &str, city: &str, strength: &str) -> String {
    let mut values = [city, strength].into_iter();
    let mut out = String::with_capacity(text.len() + city.len() + strength.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('s') => {
                chars.next();
                match values.next() {
                    Some(value) => out.push_str(value),
                    None => out.push_str("%s"),
                }
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }
    out
}

/// Validates, renders and enqueues broadcast requests.
#[derive(Clone)]
pub struct DispatchService {
    templates: Arc<dyn TemplateStore>,
    publisher: Arc<dyn BroadcastPublisher>,
}

impl DispatchService {
    pub fn new(templates: Arc<dyn TemplateStore>, publisher: Arc<dyn BroadcastPublisher>) -> Self {
        Self {
            templates,
            publisher,
        }
    }

    /// Render the requested template for its city and publish it. Success
    /// means queued, not delivered.
    pub async fn send(&self, request: &BroadcastRequest) -> Result<RenderedBroadcast, AppError> {
        request.validate()?;

        let template = match self.templates.get_by_id(request.template_id).await {
            Ok(template) => template,
            Err(e @ AppError::NotFound(_)) => return Err(e),
            Err(e) => {
                tracing::error!(template_id = %request.template_id, error = %e, "Template lookup failed");
                return Err(AppError::Internal(format!("template lookup failed: {}", e)));
            }
        };

        let broadcast = RenderedBroadcast {
            subject: template.subject,
            text: render(&template.text, &request.city, &request.strength),
            status: MessageStatus::Created,
            city: request.city.clone(),
        };

        let payload = encode(&broadcast)?;
        self.publisher.send(payload).await.map_err(|e| {
            tracing::error!(city = %broadcast.city, error = %e, "Failed to publish broadcast");
            AppError::Internal(format!("publish failed: {}", e))
        })?;

        tracing::info!(
            template_id = %request.template_id,
            city = %broadcast.city,
            "Broadcast queued"
        );
        Ok(broadcast)
    }
}
