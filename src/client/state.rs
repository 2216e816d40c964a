use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::client::typing::TypingTracker;
use crate::messages::{format_timestamp, MessageView, StreamEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub message: MessageView,
    /// Shown optimistically, not yet confirmed by the server.
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
}

/// Everything the chat view renders, fed by stream events and by the
/// results of the user's own requests.
pub struct ChatState {
    user_id: String,
    active_contact: Option<String>,
    transcript: Vec<TranscriptEntry>,
    unread: HashMap<String, u32>, // contact_id -> count
    notifications: Vec<Notification>,
    typing: TypingTracker,
}

impl ChatState {
    pub fn new(user_id: impl Into<String>) -> Self {
        ChatState {
            user_id: user_id.into(),
            active_contact: None,
            transcript: Vec::new(),
            unread: HashMap::new(),
            notifications: Vec::new(),
            typing: TypingTracker::default(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn active_contact(&self) -> Option<&str> {
        self.active_contact.as_deref()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn unread(&self, contact_id: &str) -> u32 {
        self.unread.get(contact_id).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn is_typing(&self, contact_id: &str) -> bool {
        self.typing.is_typing(contact_id)
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected | StreamEvent::Ping => {}
            StreamEvent::NewMessage { data, chat_id, sender_name } => {
                if self.active_contact.as_deref() == Some(data.sender_id.as_str()) {
                    if !self.transcript.iter().any(|e| e.message.id == data.id) {
                        self.transcript.push(TranscriptEntry { message: data, pending: false });
                    }
                } else {
                    *self.unread.entry(data.sender_id.clone()).or_insert(0) += 1;
                    self.notifications.push(Notification {
                        chat_id,
                        text: format!("{}: {}", sender_name, data.content),
                        sender_id: data.sender_id,
                    });
                }
            }
            StreamEvent::TypingStatus { data } => {
                self.typing.apply(&data.sender_id, data.is_typing);
            }
        }
    }

    /// Switches to `contact_id` with its freshly loaded history.
    pub fn open_conversation(&mut self, contact_id: &str, history: Vec<MessageView>) {
        self.active_contact = Some(contact_id.to_string());
        self.transcript = history
            .into_iter()
            .map(|message| TranscriptEntry { message, pending: false })
            .collect();
        self.unread.remove(contact_id);
    }

    /// Appends a pending copy of an outgoing message. Returns its local id
    /// and the recipient, or `None` if there is nothing to send to.
    pub fn begin_send(&mut self, content: &str) -> Option<(String, String)> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let recipient_id = self.active_contact.clone()?;
        let local_id = format!("local-{}", Uuid::new_v4());

        self.transcript.push(TranscriptEntry {
            message: MessageView {
                id: local_id.clone(),
                sender_id: self.user_id.clone(),
                content: content.to_string(),
                timestamp: format_timestamp(Utc::now()),
                is_own: true,
            },
            pending: true,
        });
        Some((local_id, recipient_id))
    }

    pub fn confirm_send(&mut self, local_id: &str, confirmed: MessageView) {
        if let Some(entry) = self.transcript.iter_mut().find(|e| e.message.id == local_id) {
            entry.message = confirmed;
            entry.pending = false;
        }
    }

    pub fn rollback_send(&mut self, local_id: &str) {
        self.transcript.retain(|e| e.message.id != local_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::TypingStatus;

    fn incoming(id: &str, from: &str, content: &str) -> StreamEvent {
        StreamEvent::NewMessage {
            data: MessageView {
                id: id.to_string(),
                sender_id: from.to_string(),
                content: content.to_string(),
                timestamp: "Jan 01, 10:00".to_string(),
                is_own: false,
            },
            chat_id: crate::conversation::chat_id(from, "me"),
            sender_name: format!("User {from}"),
        }
    }

    #[tokio::test]
    async fn message_from_open_contact_joins_transcript() {
        let mut state = ChatState::new("me");
        state.open_conversation("u1", Vec::new());
        state.apply(incoming("m1", "u1", "hi"));
        state.apply(incoming("m1", "u1", "hi"));

        assert_eq!(state.transcript().len(), 1);
        assert_eq!(state.unread("u1"), 0);
        assert!(state.notifications().is_empty());
    }

    #[tokio::test]
    async fn message_from_other_contact_counts_unread() {
        let mut state = ChatState::new("me");
        state.open_conversation("u1", Vec::new());
        state.apply(incoming("m1", "u2", "ping"));
        state.apply(incoming("m2", "u2", "ping again"));

        assert!(state.transcript().is_empty());
        assert_eq!(state.unread("u2"), 2);
        assert_eq!(state.total_unread(), 2);
        let notes = state.take_notifications();
        assert_eq!(notes[0].text, "User u2: ping");
        assert_eq!(notes[0].chat_id, "me_u2");
        assert!(state.notifications().is_empty());

        state.open_conversation("u2", Vec::new());
        assert_eq!(state.unread("u2"), 0);
    }

    #[tokio::test]
    async fn control_events_change_nothing() {
        let mut state = ChatState::new("me");
        state.apply(StreamEvent::Connected);
        state.apply(StreamEvent::Ping);
        assert!(state.transcript().is_empty());
        assert_eq!(state.total_unread(), 0);
    }

    #[tokio::test]
    async fn typing_events_drive_tracker() {
        let mut state = ChatState::new("me");
        state.apply(StreamEvent::TypingStatus {
            data: TypingStatus { sender_id: "u1".to_string(), is_typing: true },
        });
        assert!(state.is_typing("u1"));
        state.apply(StreamEvent::TypingStatus {
            data: TypingStatus { sender_id: "u1".to_string(), is_typing: false },
        });
        assert!(!state.is_typing("u1"));
    }

    #[tokio::test]
    async fn optimistic_send_confirm_and_rollback() {
        let mut state = ChatState::new("me");
        assert!(state.begin_send("hello").is_none());

        state.open_conversation("u1", Vec::new());
        assert!(state.begin_send("   ").is_none());

        let (local_id, recipient) = state.begin_send(" hello ").unwrap();
        assert_eq!(recipient, "u1");
        assert!(state.transcript()[0].pending);
        assert_eq!(state.transcript()[0].message.content, "hello");

        let confirmed = MessageView {
            id: "srv-1".to_string(),
            sender_id: "me".to_string(),
            content: "hello".to_string(),
            timestamp: "Jan 01, 10:00".to_string(),
            is_own: true,
        };
        state.confirm_send(&local_id, confirmed.clone());
        assert_eq!(state.transcript()[0].message, confirmed);
        assert!(!state.transcript()[0].pending);

        let (failed_id, _) = state.begin_send("lost").unwrap();
        assert_eq!(state.transcript().len(), 2);
        state.rollback_send(&failed_id);
        assert_eq!(state.transcript().len(), 1);
    }
}
