//! Turns one webhook request into at most one outbound reply.
//!
//! POST flow: authenticate -> parse -> status callback? -> shape check -> extract -> dedup ->
//! (reset command | generate reply) -> format -> send. Everything after the dedup gate
//! acknowledges with 200 so the platform does not redeliver; send failures are logged only.

use crate::channels::{format_for_whatsapp, OutboundSender};
use crate::dedup::{DedupGate, Seen};
use crate::llm::{ChatMessage, Completion, CompletionClient, Role, APOLOGY_REPLY};
use crate::outcome::{Ack, DispatchError, Outcome, Rejection};
use crate::signature::{AuthFailure, SignatureVerifier};
use crate::store::{ConversationRepository, DEFAULT_HISTORY_LIMIT};
use crate::webhook::payload::{self, InboundMessage};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Texts (trimmed, case-insensitive) that wipe the sender's history instead of asking the model.
const RESET_COMMANDS: [&str; 4] = ["reset", "clear", "/reset", "/clear"];

/// Reply sent after a history reset.
pub const RESET_REPLY: &str = "Conversation history has been cleared. How can I help you today?";

/// Query parameters of the subscribe handshake (`hub.mode`, `hub.verify_token`, `hub.challenge`).
#[derive(Debug, Clone, Default)]
pub struct HandshakeParams {
    pub mode: Option<String>,
    pub verify_token: Option<String>,
    pub challenge: Option<String>,
}

impl HandshakeParams {
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self {
            mode: query.get("hub.mode").cloned(),
            verify_token: query.get("hub.verify_token").cloned(),
            challenge: query.get("hub.challenge").cloned(),
        }
    }
}

pub fn is_reset_command(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    RESET_COMMANDS.contains(&t.as_str())
}

/// One async lock per sender so messages from the same user are handled in arrival order.
#[derive(Default)]
struct UserLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    async fn lock(&self, key: &str) -> UserTurn<'_> {
        let lock = {
            let mut map = self.inner.lock();
            // Entries referenced only by the map are idle (left behind by cancelled waiters).
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(key.to_string()).or_default().clone()
        };
        UserTurn {
            locks: self,
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Held while one message from a user is processed; drops the table entry when nobody waits.
struct UserTurn<'a> {
    locks: &'a UserLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock();
        if map.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&self.key);
        }
    }
}

/// Webhook orchestrator; every collaborator is injected so tests can substitute doubles.
pub struct Dispatcher {
    verifier: SignatureVerifier,
    verify_token: String,
    dedup: DedupGate,
    repository: Arc<dyn ConversationRepository>,
    completion: CompletionClient,
    sender: Arc<dyn OutboundSender>,
    history_limit: usize,
    user_locks: UserLocks,
}

impl Dispatcher {
    pub fn new(
        verifier: SignatureVerifier,
        verify_token: impl Into<String>,
        dedup: DedupGate,
        repository: Arc<dyn ConversationRepository>,
        completion: CompletionClient,
        sender: Arc<dyn OutboundSender>,
    ) -> Self {
        Self {
            verifier,
            verify_token: verify_token.into(),
            dedup,
            repository,
            completion,
            sender,
            history_limit: DEFAULT_HISTORY_LIMIT,
            user_locks: UserLocks::default(),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// GET handshake: echo the challenge when mode is "subscribe" and the token matches.
    pub fn verify_subscription(&self, params: &HandshakeParams) -> Outcome<String> {
        let (Some(mode), Some(token)) = (
            params.mode.as_deref().filter(|s| !s.is_empty()),
            params.verify_token.as_deref().filter(|s| !s.is_empty()),
        ) else {
            log::warn!("webhook: verification missing parameters");
            return Outcome::Recoverable(Rejection::MissingParameters);
        };
        if mode == "subscribe" && tokens_match(token, &self.verify_token) {
            log::info!("webhook: verified");
            Outcome::Ok(params.challenge.clone().unwrap_or_default())
        } else {
            log::warn!("webhook: verification failed");
            Outcome::Recoverable(Rejection::VerificationFailed)
        }
    }

    /// POST handler: `signature` is the raw `X-Hub-Signature-256` header, `body` the unparsed bytes.
    pub async fn handle_event(&self, signature: Option<&str>, body: &[u8]) -> Outcome<Ack> {
        self.handle_event_at(signature, body, Utc::now()).await
    }

    /// Same as [`handle_event`](Self::handle_event) with an explicit clock for the dedup gate.
    pub async fn handle_event_at(
        &self,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Outcome<Ack> {
        match self.verifier.authenticate(signature, body) {
            Ok(()) => {}
            Err(AuthFailure::MissingSignature) => {
                return Outcome::Recoverable(Rejection::MissingSignature)
            }
            Err(AuthFailure::InvalidSignature) => {
                return Outcome::Recoverable(Rejection::InvalidSignature)
            }
        }

        let event: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                log::error!("webhook: failed to decode JSON: {}", e);
                return Outcome::Recoverable(Rejection::InvalidJson);
            }
        };

        if payload::is_status_update(&event) {
            log::info!("webhook: received a status update");
            return Outcome::Ok(Ack::StatusUpdate);
        }

        if !payload::is_message_event(&event) {
            log::warn!("webhook: not a WhatsApp API event");
            return Outcome::Recoverable(Rejection::NotAMessageEvent);
        }

        let message = match payload::extract_message(&event) {
            Ok(m) => m,
            Err(e) => {
                log::error!("webhook: {}", e);
                return Outcome::Recoverable(Rejection::InvalidMessageFormat);
            }
        };
        log::info!("webhook: message from {} ({})", message.name, message.wa_id);

        if self.dedup.seen_or_record(&message.message_id, now) == Seen::Duplicate {
            log::info!("webhook: duplicate message ignored: {}", message.message_id);
            return Outcome::Ok(Ack::Duplicate);
        }

        let Some(text) = message.text.clone() else {
            log::info!("webhook: ignoring non-text message {}", message.message_id);
            return Outcome::Ok(Ack::Ignored);
        };

        let _turn = self.user_locks.lock(&message.wa_id).await;

        let reply = if is_reset_command(&text) {
            if let Err(e) = self.repository.clear_history(&message.wa_id).await {
                return Outcome::Fatal(DispatchError::from(e));
            }
            RESET_REPLY.to_string()
        } else {
            self.generate_reply(&message, &text).await
        };

        let reply = format_for_whatsapp(&reply);
        log::info!("webhook: reply: {}...", preview(&reply));
        if let Err(e) = self.sender.send(&message.wa_id, &reply).await {
            log::warn!("webhook: reply to {} not delivered: {}", message.wa_id, e);
        }
        Outcome::Ok(Ack::Processed)
    }

    /// Load context, ask the model, and record the exchange. Falls back to the apology text on any failure.
    async fn generate_reply(&self, message: &InboundMessage, text: &str) -> String {
        let conversation = match self
            .repository
            .get_or_create(&message.wa_id, &message.name)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                log::error!("webhook: loading conversation for {}: {}", message.wa_id, e);
                return APOLOGY_REPLY.to_string();
            }
        };
        let mut history = match self
            .repository
            .recent_history(&conversation, self.history_limit, true)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                log::error!("webhook: loading history for {}: {}", message.wa_id, e);
                return APOLOGY_REPLY.to_string();
            }
        };
        history.push(ChatMessage::user(text));

        let stored = match self.completion.complete(&history).await {
            Completion::Generated(reply) => {
                let stored = self
                    .repository
                    .append_exchange(&conversation, text, &reply)
                    .await;
                (stored, reply)
            }
            Completion::Fallback(reply) => {
                let stored = self
                    .repository
                    .append_message(&conversation, Role::User, text)
                    .await;
                (stored, reply)
            }
        };
        match stored {
            (Ok(()), reply) => reply,
            (Err(e), _) => {
                log::error!("webhook: saving exchange for {}: {}", message.wa_id, e);
                APOLOGY_REPLY.to_string()
            }
        }
    }
}

/// Constant-time comparison for the handshake token.
fn tokens_match(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len()
        && provided
            .as_bytes()
            .iter()
            .zip(expected.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
