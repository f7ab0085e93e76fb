//! Outbound channel: the WhatsApp Cloud API send-message endpoint.
//!
//! [`OutboundSender`] is the seam the dispatcher sends through; [`WhatsAppSender`] is the
//! real implementation. Reply text is normalised with [`format_for_whatsapp`] before sending.

mod format;
mod whatsapp;

pub use format::format_for_whatsapp;
pub use whatsapp::{text_message_payload, WhatsAppSender};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("send timed out")]
    Timeout,
    #[error("send request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("send rejected: {status} {body}")]
    Api { status: u16, body: String },
}

/// Delivers a text message to a platform user. Not retried by callers.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), SendError>;
}
