use std::sync::Arc;

use crate::error::{ChatError, Result};
use crate::messages::{StreamEvent, TypingStatus};
use crate::registry::Broadcaster;

/// Relays typing indicators. Nothing is stored and an offline recipient is
/// not an error.
#[derive(Clone)]
pub struct TypingCoordinator {
    broadcaster: Arc<dyn Broadcaster>,
}

impl TypingCoordinator {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        TypingCoordinator { broadcaster }
    }

    pub async fn set_typing(&self, sender_id: &str, recipient_id: &str, is_typing: bool) -> Result<()> {
        if recipient_id.trim().is_empty() {
            return Err(ChatError::validation("recipientId is required"));
        }

        let event = StreamEvent::TypingStatus {
            data: TypingStatus {
                sender_id: sender_id.to_string(),
                is_typing,
            },
        };
        self.broadcaster.broadcast_to_one(recipient_id, &event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionRegistry, DEFAULT_KEEP_ALIVE};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn relays_to_recipient() {
        let registry = ConnectionRegistry::new(DEFAULT_KEEP_ALIVE);
        let typing = TypingCoordinator::new(registry.clone());
        let mut stream = registry.register("u2");
        stream.next().await;

        typing.set_typing("u1", "u2", true).await.unwrap();
        assert_eq!(
            stream.next().await,
            Some(StreamEvent::TypingStatus {
                data: TypingStatus { sender_id: "u1".to_string(), is_typing: true }
            })
        );
    }

    #[tokio::test]
    async fn offline_recipient_is_fine() {
        let registry = ConnectionRegistry::new(DEFAULT_KEEP_ALIVE);
        let typing = TypingCoordinator::new(registry);
        assert!(typing.set_typing("u1", "u2", false).await.is_ok());
    }

    #[tokio::test]
    async fn requires_recipient() {
        let registry = ConnectionRegistry::new(DEFAULT_KEEP_ALIVE);
        let typing = TypingCoordinator::new(registry);
        assert!(matches!(
            typing.set_typing("u1", " ", true).await,
            Err(ChatError::Validation(_))
        ));
    }
}
