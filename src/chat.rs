use std::sync::Arc;

use chrono::Utc;
use log::{error, info};
use uuid::Uuid;

use crate::conversation::{chat_id, sorted_pair};
use crate::error::{ChatError, Result};
use crate::messages::{ConversationView, MessageView, SendMessageRequest, StreamEvent};
use crate::registry::Broadcaster;
use crate::store::{LastMessage, Message, MessageStore, UserDirectory};

/// Message send, history and read-state for direct conversations.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        ChatService { store, users, broadcaster }
    }

    /// Persists a message from `sender_id` and pushes it to the recipient's
    /// live stream, if any. Success depends on persistence only.
    pub async fn send(&self, sender_id: &str, request: SendMessageRequest) -> Result<MessageView> {
        let recipient_id = request
            .recipient_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChatError::validation("recipientId is required"))?
            .to_string();
        let content = request
            .content
            .as_deref()
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ChatError::validation("content is required"))?
            .to_string();

        if !self.users.exists(&recipient_id).await {
            return Err(ChatError::UnknownUser(recipient_id));
        }

        let conversation_id = chat_id(sender_id, &recipient_id);
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.clone(),
            content,
            sent_at: Utc::now(),
            read: false,
        };

        self.store.insert_message(&message).await.map_err(|e| {
            error!("Failed to store message in {}: {}", conversation_id, e);
            e
        })?;
        self.store
            .upsert_summary(
                &conversation_id,
                sorted_pair(sender_id, &recipient_id),
                LastMessage::from(&message),
                message.sent_at,
            )
            .await
            .map_err(|e| {
                error!("Failed to update summary for {}: {}", conversation_id, e);
                e
            })?;

        let sender_name = self
            .users
            .display_name(sender_id)
            .await
            .unwrap_or_else(|| sender_id.to_string());

        self.broadcaster
            .broadcast_to_one(
                &recipient_id,
                &StreamEvent::NewMessage {
                    data: MessageView::for_viewer(&message, &recipient_id),
                    chat_id: conversation_id.clone(),
                    sender_name,
                },
            )
            .await;

        info!("Message {} sent in {}", message.id, conversation_id);
        Ok(MessageView::for_viewer(&message, sender_id))
    }

    /// The conversation between `viewer_id` and `contact_id`, oldest first.
    pub async fn history(&self, viewer_id: &str, contact_id: &str) -> Result<Vec<MessageView>> {
        let contact_id = required(contact_id, "contactId")?;
        let messages = self.store.messages_for(&chat_id(viewer_id, contact_id)).await?;
        Ok(messages
            .iter()
            .map(|m| MessageView::for_viewer(m, viewer_id))
            .collect())
    }

    pub async fn mark_read(&self, viewer_id: &str, contact_id: &str) -> Result<usize> {
        let contact_id = required(contact_id, "contactId")?;
        self.store.mark_read(&chat_id(viewer_id, contact_id), viewer_id).await
    }

    pub async fn conversations(&self, viewer_id: &str) -> Result<Vec<ConversationView>> {
        let summaries = self.store.summaries_for(viewer_id).await?;
        let mut views = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            let unread = self
                .store
                .unread_count(&summary.conversation_id, viewer_id)
                .await?;
            let mut view = ConversationView::new(summary, viewer_id, String::new(), unread);
            view.contact_name = self
                .users
                .display_name(&view.contact_id)
                .await
                .unwrap_or_else(|| view.contact_id.clone());
            views.push(view);
        }
        Ok(views)
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(ChatError::Validation(format!("{field} is required")))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionRegistry, ConnectionStream, DEFAULT_KEEP_ALIVE};
    use crate::store::{ConversationSummary, InMemoryDirectory, InMemoryStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use futures_util::StreamExt;
    use std::collections::HashMap;
    use std::time::Duration;

    fn directory() -> Arc<InMemoryDirectory> {
        Arc::new(InMemoryDirectory::new(HashMap::from([
            ("u1".to_string(), "Ada".to_string()),
            ("u2".to_string(), "Grace".to_string()),
            ("u3".to_string(), "Linus".to_string()),
        ])))
    }

    fn service_with(store: Arc<dyn MessageStore>) -> (ChatService, Arc<ConnectionRegistry>) {
        let registry = ConnectionRegistry::new(DEFAULT_KEEP_ALIVE);
        let service = ChatService::new(store, directory(), registry.clone());
        (service, registry)
    }

    fn send_request(to: &str, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            recipient_id: Some(to.to_string()),
            content: Some(content.to_string()),
        }
    }

    async fn try_next(stream: &mut ConnectionStream) -> Option<StreamEvent> {
        tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .ok()
            .flatten()
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn insert_message(&self, _: &Message) -> Result<()> {
            Err(ChatError::Store("disk full".to_string()))
        }
        async fn upsert_summary(
            &self,
            _: &str,
            _: [String; 2],
            _: LastMessage,
            _: DateTime<Utc>,
        ) -> Result<ConversationSummary> {
            Err(ChatError::Store("disk full".to_string()))
        }
        async fn messages_for(&self, _: &str) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }
        async fn mark_read(&self, _: &str, _: &str) -> Result<usize> {
            Ok(0)
        }
        async fn unread_count(&self, _: &str, _: &str) -> Result<usize> {
            Ok(0)
        }
        async fn summaries_for(&self, _: &str) -> Result<Vec<ConversationSummary>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn send_pushes_to_online_recipient() {
        let store = Arc::new(InMemoryStore::new());
        let (service, registry) = service_with(store);
        let mut stream = registry.register("u2");
        assert_eq!(try_next(&mut stream).await, Some(StreamEvent::Connected));

        let view = service.send("u1", send_request("u2", "  hello  ")).await.unwrap();
        assert!(view.is_own);
        assert_eq!(view.content, "hello");

        match try_next(&mut stream).await {
            Some(StreamEvent::NewMessage { data, chat_id, sender_name }) => {
                assert_eq!(chat_id, "u1_u2");
                assert_eq!(sender_name, "Ada");
                assert_eq!(data.sender_id, "u1");
                assert_eq!(data.content, "hello");
                assert_eq!(data.id, view.id);
                assert!(!data.is_own);
            }
            other => panic!("expected new_message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_content_is_rejected_without_side_effects() {
        let store = Arc::new(InMemoryStore::new());
        let (service, registry) = service_with(store.clone());
        let mut stream = registry.register("u2");
        try_next(&mut stream).await;

        for content in ["", "   ", "\n\t"] {
            let result = service.send("u1", send_request("u2", content)).await;
            assert!(matches!(result, Err(ChatError::Validation(_))));
        }
        let missing = service
            .send("u1", SendMessageRequest { recipient_id: Some("u2".to_string()), content: None })
            .await;
        assert!(matches!(missing, Err(ChatError::Validation(_))));

        assert!(store.messages_for("u1_u2").await.unwrap().is_empty());
        assert!(store.summaries_for("u1").await.unwrap().is_empty());
        assert_eq!(try_next(&mut stream).await, None);
    }

    #[tokio::test]
    async fn missing_or_unknown_recipient_is_rejected() {
        let (service, _registry) = service_with(Arc::new(InMemoryStore::new()));
        let missing = service
            .send("u1", SendMessageRequest { recipient_id: None, content: Some("hi".to_string()) })
            .await;
        assert!(matches!(missing, Err(ChatError::Validation(_))));

        let unknown = service.send("u1", send_request("u404", "hi")).await;
        assert!(matches!(unknown, Err(ChatError::UnknownUser(id)) if id == "u404"));
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_history() {
        let (service, registry) = service_with(Arc::new(InMemoryStore::new()));
        assert!(!registry.is_connected("u2"));

        service.send("u1", send_request("u2", "are you there?")).await.unwrap();

        let theirs = service.history("u2", "u1").await.unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].content, "are you there?");
        assert!(!theirs[0].is_own);

        let mine = service.history("u1", "u2").await.unwrap();
        assert!(mine[0].is_own);
    }

    #[tokio::test]
    async fn store_failure_means_no_broadcast() {
        let (service, registry) = service_with(Arc::new(FailingStore));
        let mut stream = registry.register("u2");
        try_next(&mut stream).await;

        let result = service.send("u1", send_request("u2", "hello")).await;
        assert!(matches!(result, Err(ChatError::Store(_))));
        assert_eq!(try_next(&mut stream).await, None);
    }

    #[tokio::test]
    async fn history_is_ordered_and_requires_contact() {
        let (service, _registry) = service_with(Arc::new(InMemoryStore::new()));
        service.send("u1", send_request("u2", "first")).await.unwrap();
        service.send("u2", send_request("u1", "second")).await.unwrap();
        service.send("u1", send_request("u2", "third")).await.unwrap();

        let contents: Vec<String> = service
            .history("u2", "u1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert!(matches!(service.history("u1", "").await, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn conversations_report_unread_and_contact() {
        let (service, _registry) = service_with(Arc::new(InMemoryStore::new()));
        service.send("u1", send_request("u2", "one")).await.unwrap();
        service.send("u1", send_request("u2", "two")).await.unwrap();
        service.send("u3", send_request("u2", "hey")).await.unwrap();

        let list = service.conversations("u2").await.unwrap();
        assert_eq!(list.len(), 2);
        let with_ada = list.iter().find(|c| c.contact_id == "u1").unwrap();
        assert_eq!(with_ada.contact_name, "Ada");
        assert_eq!(with_ada.unread_count, 2);
        assert_eq!(with_ada.last_message.content, "two");

        assert_eq!(service.mark_read("u2", "u1").await.unwrap(), 2);
        let list = service.conversations("u2").await.unwrap();
        let with_ada = list.iter().find(|c| c.contact_id == "u1").unwrap();
        assert_eq!(with_ada.unread_count, 0);

        // the sender has nothing unread
        let senders_view = service.conversations("u1").await.unwrap();
        assert_eq!(senders_view[0].unread_count, 0);
    }
}
