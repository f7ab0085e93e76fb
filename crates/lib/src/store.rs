//! Conversation records and message history, keyed by the platform's user id (`wa_id`).
//!
//! [`ConversationRepository`] is the seam the dispatcher talks to. [`ConversationStore`] keeps
//! everything in memory and, when given a path, mirrors it to a JSON file. Each mutation is
//! applied to a copy of the conversation, persisted, then committed; if persisting fails the
//! previous state is restored, so a write is either fully applied or not at all.

use crate::llm::{ChatMessage, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Content of the system message left behind by a history reset.
pub const RESET_MARKER: &str = "Conversation history cleared by user";

/// Default number of stored messages returned by `recent_history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: uuid::Uuid,
    pub wa_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored message; immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no conversation for wa_id {0}")]
    NotFound(String),
    #[error("persisting conversations: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding conversations: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Fetch the conversation for `wa_id`, creating it on first contact. Refreshes the name when it changed.
    async fn get_or_create(&self, wa_id: &str, name: &str) -> Result<Conversation, StoreError>;

    async fn append_message(
        &self,
        conversation: &Conversation,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Append a user turn and the assistant's reply as one write.
    async fn append_exchange(
        &self,
        conversation: &Conversation,
        user_text: &str,
        reply_text: &str,
    ) -> Result<(), StoreError>;

    /// Up to `limit` most recent messages, oldest first, optionally preceded by the system prompt.
    async fn recent_history(
        &self,
        conversation: &Conversation,
        limit: usize,
        include_system_prompt: bool,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Delete all messages for `wa_id` and leave a [`RESET_MARKER`]. Unknown ids are logged and ignored.
    async fn clear_history(&self, wa_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationRecord {
    conversation: Conversation,
    messages: Vec<StoredMessage>,
}

impl ConversationRecord {
    /// Messages are strictly ordered by timestamp: a clock that stalls or steps back is nudged forward.
    fn push(&mut self, role: Role, content: &str, now: DateTime<Utc>) {
        let timestamp = match self.messages.last() {
            Some(last) if last.timestamp >= now => last.timestamp + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.messages.push(StoredMessage {
            role,
            content: content.to_string(),
            timestamp,
        });
        self.conversation.updated_at = timestamp;
    }
}

/// In-memory conversation store with optional JSON file persistence.
pub struct ConversationStore {
    path: Option<PathBuf>,
    system_prompt: String,
    records: RwLock<HashMap<String, ConversationRecord>>,
}

impl ConversationStore {
    /// Memory-only store.
    pub fn in_memory(system_prompt: impl Into<String>) -> Self {
        Self {
            path: None,
            system_prompt: system_prompt.into(),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Store backed by `path`. A missing file starts empty; an unreadable one is an error so it is never overwritten.
    pub async fn open(
        path: impl AsRef<Path>,
        system_prompt: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records: HashMap<String, ConversationRecord> =
            match tokio::fs::read_to_string(&path).await {
                Ok(s) => {
                    let list: Vec<ConversationRecord> = serde_json::from_str(&s)?;
                    list.into_iter()
                        .map(|r| (r.conversation.wa_id.clone(), r))
                        .collect()
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
                Err(e) => return Err(e.into()),
            };
        log::info!(
            "conversation store: loaded {} conversations from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            path: Some(path),
            system_prompt: system_prompt.into(),
            records: RwLock::new(records),
        })
    }

    /// Full stored history for `wa_id` (no system prompt, no limit).
    pub async fn messages(&self, wa_id: &str) -> Option<Vec<StoredMessage>> {
        self.records
            .read()
            .await
            .get(wa_id)
            .map(|r| r.messages.clone())
    }

    async fn save(&self, records: &HashMap<String, ConversationRecord>) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let mut list: Vec<&ConversationRecord> = records.values().collect();
        list.sort_by(|a, b| a.conversation.created_at.cmp(&b.conversation.created_at));
        let json = serde_json::to_string_pretty(&list)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Apply `f` to a copy of the record for `wa_id` (created by `init` when absent and `init` is Some),
    /// persist, and commit. On persist failure the prior record is restored.
    async fn transact<T>(
        &self,
        wa_id: &str,
        init: Option<&(dyn Fn() -> ConversationRecord + Sync)>,
        f: impl FnOnce(&mut ConversationRecord) -> T,
    ) -> Result<Option<T>, StoreError> {
        let mut records = self.records.write().await;
        let mut record = match (records.get(wa_id), init) {
            (Some(r), _) => r.clone(),
            (None, Some(init)) => init(),
            (None, None) => return Ok(None),
        };
        let out = f(&mut record);
        let previous = records.insert(wa_id.to_string(), record);
        if let Err(e) = self.save(&records).await {
            match previous {
                Some(p) => records.insert(wa_id.to_string(), p),
                None => records.remove(wa_id),
            };
            return Err(e);
        }
        Ok(Some(out))
    }
}

#[async_trait]
impl ConversationRepository for ConversationStore {
    async fn get_or_create(&self, wa_id: &str, name: &str) -> Result<Conversation, StoreError> {
        {
            let records = self.records.read().await;
            if let Some(r) = records.get(wa_id) {
                if r.conversation.name == name {
                    return Ok(r.conversation.clone());
                }
            }
        }
        let init: &(dyn Fn() -> ConversationRecord + Sync) = &|| {
            let now = Utc::now();
            log::info!("conversation store: new conversation for {}", wa_id);
            ConversationRecord {
                conversation: Conversation {
                    id: uuid::Uuid::new_v4(),
                    wa_id: wa_id.to_string(),
                    name: name.to_string(),
                    created_at: now,
                    updated_at: now,
                },
                messages: Vec::new(),
            }
        };
        let conversation = self
            .transact(wa_id, Some(init), |r| {
                if r.conversation.name != name {
                    r.conversation.name = name.to_string();
                    r.conversation.updated_at = Utc::now();
                }
                r.conversation.clone()
            })
            .await?;
        conversation.ok_or_else(|| StoreError::NotFound(wa_id.to_string()))
    }

    async fn append_message(
        &self,
        conversation: &Conversation,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError> {
        self.transact(&conversation.wa_id, None, |r| r.push(role, content, Utc::now()))
            .await?
            .ok_or_else(|| StoreError::NotFound(conversation.wa_id.clone()))
    }

    async fn append_exchange(
        &self,
        conversation: &Conversation,
        user_text: &str,
        reply_text: &str,
    ) -> Result<(), StoreError> {
        self.transact(&conversation.wa_id, None, |r| {
            let now = Utc::now();
            r.push(Role::User, user_text, now);
            r.push(Role::Assistant, reply_text, now);
        })
        .await?
        .ok_or_else(|| StoreError::NotFound(conversation.wa_id.clone()))
    }

    async fn recent_history(
        &self,
        conversation: &Conversation,
        limit: usize,
        include_system_prompt: bool,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let records = self.records.read().await;
        let record = records
            .get(&conversation.wa_id)
            .ok_or_else(|| StoreError::NotFound(conversation.wa_id.clone()))?;
        let mut out = Vec::new();
        if include_system_prompt {
            out.push(ChatMessage::system(self.system_prompt.clone()));
        }
        let skip = record.messages.len().saturating_sub(limit);
        out.extend(record.messages[skip..].iter().map(|m| ChatMessage {
            role: m.role,
            content: m.content.clone(),
        }));
        Ok(out)
    }

    async fn clear_history(&self, wa_id: &str) -> Result<(), StoreError> {
        let cleared = self
            .transact(wa_id, None, |r| {
                r.messages.clear();
                r.push(Role::System, RESET_MARKER, Utc::now());
            })
            .await?;
        match cleared {
            Some(()) => log::info!("conversation store: cleared history for {}", wa_id),
            None => log::warn!("conversation store: no conversation found for {}", wa_id),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = "You are a helpful assistant.";

    fn temp_store_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("wa-relay-store-{}", uuid::Uuid::new_v4()))
            .join("conversations.json")
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_and_refreshes_name() {
        let store = ConversationStore::in_memory(PROMPT);
        let a = store.get_or_create("15550001", "Ana").await.unwrap();
        let b = store.get_or_create("15550001", "Ana").await.unwrap();
        assert_eq!(a.id, b.id);
        let c = store.get_or_create("15550001", "Ana Maria").await.unwrap();
        assert_eq!(c.id, a.id);
        assert_eq!(c.name, "Ana Maria");
        assert_eq!(c.created_at, a.created_at);
    }

    #[tokio::test]
    async fn history_is_most_recent_oldest_first() {
        let store = ConversationStore::in_memory(PROMPT);
        let conv = store.get_or_create("1", "U").await.unwrap();
        for i in 0..8 {
            store
                .append_exchange(&conv, &format!("q{}", i), &format!("a{}", i))
                .await
                .unwrap();
        }
        let history = store.recent_history(&conv, 10, true).await.unwrap();
        assert_eq!(history.len(), 11);
        assert_eq!(history[0], ChatMessage::system(PROMPT));
        assert_eq!(history[1], ChatMessage::user("q3"));
        assert_eq!(history[2], ChatMessage::assistant("a3"));
        assert_eq!(history[10], ChatMessage::assistant("a7"));

        let bare = store.recent_history(&conv, 10, false).await.unwrap();
        assert_eq!(bare.len(), 10);
        assert_eq!(bare[0], ChatMessage::user("q3"));
    }

    #[tokio::test]
    async fn short_history_returns_everything() {
        let store = ConversationStore::in_memory(PROMPT);
        let conv = store.get_or_create("1", "U").await.unwrap();
        store.append_message(&conv, Role::User, "hello").await.unwrap();
        let history = store.recent_history(&conv, DEFAULT_HISTORY_LIMIT, false).await.unwrap();
        assert_eq!(history, vec![ChatMessage::user("hello")]);
    }

    #[tokio::test]
    async fn timestamps_strictly_increase() {
        let store = ConversationStore::in_memory(PROMPT);
        let conv = store.get_or_create("1", "U").await.unwrap();
        for _ in 0..5 {
            store.append_exchange(&conv, "q", "a").await.unwrap();
        }
        let msgs = store.messages("1").await.unwrap();
        assert!(msgs.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn clear_leaves_only_marker() {
        let store = ConversationStore::in_memory(PROMPT);
        let conv = store.get_or_create("1", "U").await.unwrap();
        store.append_exchange(&conv, "q", "a").await.unwrap();
        store.clear_history("1").await.unwrap();
        let history = store.recent_history(&conv, 10, true).await.unwrap();
        assert_eq!(
            history,
            vec![ChatMessage::system(PROMPT), ChatMessage::system(RESET_MARKER)]
        );
        assert!(store.get_or_create("1", "U").await.is_ok());
    }

    #[tokio::test]
    async fn clear_unknown_conversation_is_soft() {
        let store = ConversationStore::in_memory(PROMPT);
        assert!(store.clear_history("nobody").await.is_ok());
        assert!(store.messages("nobody").await.is_none());
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_fails() {
        let store = ConversationStore::in_memory(PROMPT);
        let other = ConversationStore::in_memory(PROMPT);
        let conv = other.get_or_create("9", "X").await.unwrap();
        assert!(matches!(
            store.append_message(&conv, Role::User, "hi").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let path = temp_store_path();
        {
            let store = ConversationStore::open(&path, PROMPT).await.unwrap();
            let conv = store.get_or_create("1", "U").await.unwrap();
            store.append_exchange(&conv, "q", "a").await.unwrap();
        }
        let store = ConversationStore::open(&path, PROMPT).await.unwrap();
        let conv = store.get_or_create("1", "U").await.unwrap();
        let history = store.recent_history(&conv, 10, false).await.unwrap();
        assert_eq!(history, vec![ChatMessage::user("q"), ChatMessage::assistant("a")]);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn failed_persist_rolls_back() {
        let dir = std::env::temp_dir().join(format!("wa-relay-store-{}", uuid::Uuid::new_v4()));
        let store = ConversationStore::open(dir.join("data").join("conversations.json"), PROMPT)
            .await
            .unwrap();
        // A regular file where the data directory should be makes every save fail.
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("data"), b"x").unwrap();
        assert!(store.get_or_create("1", "U").await.is_err());
        assert!(store.messages("1").await.is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
