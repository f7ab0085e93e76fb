//! WhatsApp Cloud API sender: POST {api_base}/{version}/{phone_number_id}/messages.

use crate::channels::{OutboundSender, SendError};
use async_trait::async_trait;
use std::time::Duration;

/// Sends text messages as the configured business phone number.
pub struct WhatsAppSender {
    url: String,
    access_token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(
        api_base: &str,
        api_version: &str,
        phone_number_id: &str,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let url = format!(
            "{}/{}/{}/messages",
            api_base.trim_end_matches('/'),
            api_version,
            phone_number_id
        );
        Self {
            url,
            access_token: access_token.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Envelope for an individual text message.
pub fn text_message_payload(recipient: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient,
        "type": "text",
        "text": { "preview_url": false, "body": text },
    })
}

#[async_trait]
impl OutboundSender for WhatsAppSender {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), SendError> {
        let preview: String = text.chars().take(50).collect();
        log::info!("whatsapp: sending to {}: {}...", recipient_id, preview);
        let body = text_message_payload(recipient_id, text);
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;
        let res = match res {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                log::error!("whatsapp: timeout occurred while sending message");
                return Err(SendError::Timeout);
            }
            Err(e) => {
                log::error!("whatsapp: request failed: {}", e);
                return Err(SendError::Request(e));
            }
        };
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            log::error!("whatsapp: send failed: {} {}", status, body);
            return Err(SendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        log::info!("whatsapp: message sent ({})", status);
        log::debug!("whatsapp: response body: {}", body);
        Ok(())
    }
}
