//! Fail-soft wrapper around a [`ChatProvider`].

use crate::llm::{ChatMessage, ChatProvider};
use std::sync::Arc;

/// Sent to the user whenever the provider fails, whatever the cause.
pub const APOLOGY_REPLY: &str =
    "I apologize, but I'm having trouble processing your request right now. Please try again later.";

/// Outcome of a completion: generated text, or the apology after a provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Generated(String),
    Fallback(String),
}

impl Completion {
    pub fn text(&self) -> &str {
        match self {
            Completion::Generated(t) | Completion::Fallback(t) => t,
        }
    }
}

#[derive(Clone)]
pub struct CompletionClient {
    provider: Arc<dyn ChatProvider>,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Send `history` (system prompt, prior turns, new user turn) and return the reply.
    /// Never fails: provider errors are logged and replaced by [`APOLOGY_REPLY`].
    pub async fn complete(&self, history: &[ChatMessage]) -> Completion {
        match self.provider.chat(history).await {
            Ok(text) => {
                log::info!("completion: generated {} chars", text.chars().count());
                Completion::Generated(text)
            }
            Err(e) => {
                log::error!("completion: error generating response: {}", e);
                Completion::Fallback(APOLOGY_REPLY.to_string())
            }
        }
    }
}
