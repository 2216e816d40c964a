use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub sender_id: String,
    pub sent_at: DateTime<Utc>,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        LastMessage {
            content: message.content.clone(),
            sender_id: message.sender_id.clone(),
            sent_at: message.sent_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub participant_ids: [String; 2],
    pub last_message: LastMessage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backing document store for messages and conversation summaries.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// Insert or update the summary for `conversation_id`. `created_at` is
    /// written on insert only.
    async fn upsert_summary(
        &self,
        conversation_id: &str,
        participant_ids: [String; 2],
        last_message: LastMessage,
        now: DateTime<Utc>,
    ) -> Result<ConversationSummary>;

    /// Messages of one conversation, oldest first.
    async fn messages_for(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Flags every unread message addressed to `reader_id` as read and
    /// returns how many changed.
    async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<usize>;

    async fn unread_count(&self, conversation_id: &str, reader_id: &str) -> Result<usize>;

    /// Summaries `user_id` participates in, most recently updated first.
    async fn summaries_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>>;
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    messages: Arc<RwLock<HashMap<String, Vec<Message>>>>, // conversation_id -> messages
    summaries: Arc<RwLock<HashMap<String, ConversationSummary>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert_message(&self, message: &Message) -> Result<()> {
        let mut messages = self.messages.write().await;
        messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn upsert_summary(
        &self,
        conversation_id: &str,
        participant_ids: [String; 2],
        last_message: LastMessage,
        now: DateTime<Utc>,
    ) -> Result<ConversationSummary> {
        let mut summaries = self.summaries.write().await;
        let summary = summaries
            .entry(conversation_id.to_string())
            .and_modify(|existing| {
                existing.last_message = last_message.clone();
                existing.updated_at = now;
            })
            .or_insert_with(|| ConversationSummary {
                conversation_id: conversation_id.to_string(),
                participant_ids,
                last_message,
                created_at: now,
                updated_at: now,
            });
        Ok(summary.clone())
    }

    async fn messages_for(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut history = messages.get(conversation_id).cloned().unwrap_or_default();
        // stable: equal timestamps keep insertion order
        history.sort_by_key(|m| m.sent_at);
        Ok(history)
    }

    async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<usize> {
        let mut messages = self.messages.write().await;
        let Some(history) = messages.get_mut(conversation_id) else {
            return Ok(0);
        };

        let mut updated = 0;
        for message in history
            .iter_mut()
            .filter(|m| m.recipient_id == reader_id && !m.read)
        {
            message.read = true;
            updated += 1;
        }
        Ok(updated)
    }

    async fn unread_count(&self, conversation_id: &str, reader_id: &str) -> Result<usize> {
        let messages = self.messages.read().await;
        Ok(messages.get(conversation_id).map_or(0, |history| {
            history
                .iter()
                .filter(|m| m.recipient_id == reader_id && !m.read)
                .count()
        }))
    }

    async fn summaries_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let summaries = self.summaries.read().await;
        let mut mine: Vec<ConversationSummary> = summaries
            .values()
            .filter(|s| s.participant_ids.iter().any(|id| id == user_id))
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(mine)
    }
}

/// Resolves user ids to display names. Owned by the portal's account
/// system; this crate only reads from it.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Option<String>;

    async fn exists(&self, user_id: &str) -> bool {
        self.display_name(user_id).await.is_some()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    users: Arc<RwLock<HashMap<String, String>>>, // user_id -> display name
    allow_unlisted: bool,
}

impl InMemoryDirectory {
    pub fn new(users: HashMap<String, String>) -> Self {
        InMemoryDirectory {
            users: Arc::new(RwLock::new(users)),
            allow_unlisted: false,
        }
    }

    /// A directory that resolves any id, using the id as the display name
    /// when no entry is listed.
    pub fn open() -> Self {
        InMemoryDirectory {
            users: Arc::default(),
            allow_unlisted: true,
        }
    }

    pub async fn add_user(&self, user_id: String, name: String) {
        let mut users = self.users.write().await;
        users.insert(user_id, name);
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn display_name(&self, user_id: &str) -> Option<String> {
        if user_id.trim().is_empty() {
            return None;
        }
        let users = self.users.read().await;
        match users.get(user_id) {
            Some(name) => Some(name.clone()),
            None if self.allow_unlisted => Some(user_id.to_string()),
            None => None,
        }
    }
}
