use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{ConversationSummary, LastMessage, Message};

pub const TIMESTAMP_FORMAT: &str = "%b %d, %H:%M";

/// Events pushed down the `/api/stream` event stream.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "new_message")]
    NewMessage {
        data: MessageView,
        #[serde(rename = "chatId")]
        chat_id: String,
        #[serde(rename = "senderName")]
        sender_name: String,
    },
    #[serde(rename = "typing_status")]
    TypingStatus { data: TypingStatus },
}

/// A message as one particular viewer sees it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: String,
    pub is_own: bool,
}

impl MessageView {
    pub fn for_viewer(message: &Message, viewer_id: &str) -> Self {
        MessageView {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            timestamp: format_timestamp(message.sent_at),
            is_own: message.sender_id == viewer_id,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    pub sender_id: String,
    pub is_typing: bool,
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

// Request bodies keep every field optional so a missing field is a 400 from
// our own validation instead of a body deserialization rejection.

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub is_typing: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContactQuery {
    pub contact_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SendMessageResponse {
    pub message: String,
    pub data: MessageView,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TypingResponse {
    pub success: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MarkReadResponse {
    pub updated: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

/// One row of the caller's conversation list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub chat_id: String,
    pub contact_id: String,
    pub contact_name: String,
    pub last_message: LastMessage,
    pub unread_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationView {
    pub fn new(
        summary: &ConversationSummary,
        viewer_id: &str,
        contact_name: String,
        unread_count: usize,
    ) -> Self {
        let contact_id = summary
            .participant_ids
            .iter()
            .find(|id| id.as_str() != viewer_id)
            .unwrap_or(&summary.participant_ids[0])
            .clone();

        ConversationView {
            chat_id: summary.conversation_id.clone(),
            contact_id,
            contact_name,
            last_message: summary.last_message.clone(),
            unread_count,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}
