use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};

use crate::client::reconnect::{ConnectionState, ReconnectPolicy, Reconnector};
use crate::client::state::ChatState;
use crate::client::transport::ChatTransport;
use crate::client::ClientError;
use crate::messages::MessageView;

/// One authenticated client session: keeps the event stream open and
/// mirrors it into a [`ChatState`].
pub struct SessionManager {
    transport: Arc<dyn ChatTransport>,
    state: Arc<Mutex<ChatState>>,
    reconnect: Mutex<Reconnector>,
    connection: watch::Sender<ConnectionState>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn ChatTransport>, state: ChatState, policy: ReconnectPolicy) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Connecting);
        SessionManager {
            transport,
            state: Arc::new(Mutex::new(state)),
            reconnect: Mutex::new(Reconnector::new(policy)),
            connection,
        }
    }

    pub fn state(&self) -> Arc<Mutex<ChatState>> {
        self.state.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Drives the stream until reconnection gives up. Returns the terminal
    /// state; call [`refresh`](Self::refresh) and run again to start over.
    pub async fn run(&self) -> ConnectionState {
        loop {
            self.transition(|r| r.connecting()).await;

            let error = match self.transport.open_stream().await {
                Ok(mut events) => {
                    self.transition(Reconnector::opened).await;
                    info!("Event stream open");
                    loop {
                        match events.next().await {
                            Some(Ok(event)) => self.state.lock().await.apply(event),
                            Some(Err(e)) => break e,
                            None => break ClientError::StreamClosed,
                        }
                    }
                }
                Err(e) => e,
            };

            let delay = {
                let mut reconnect = self.reconnect.lock().await;
                let delay = reconnect.failed(error.to_string());
                self.connection.send_replace(reconnect.state().clone());
                delay
            };

            match delay {
                Some(delay) => {
                    warn!("Event stream lost ({}), reconnecting in {:?}", error, delay);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!("Event stream failed permanently: {}", error);
                    return self.connection_state();
                }
            }
        }
    }

    /// Clears a terminal failure so [`run`](Self::run) starts fresh.
    pub async fn refresh(&self) {
        self.transition(Reconnector::reset).await;
    }

    /// Loads history for `contact_id` and makes it the open conversation.
    pub async fn open_conversation(&self, contact_id: &str) -> Result<(), ClientError> {
        let history = self.transport.history(contact_id).await?;
        self.state.lock().await.open_conversation(contact_id, history);
        Ok(())
    }

    /// Shows the message right away, then confirms or removes it depending
    /// on the server's answer.
    pub async fn send(&self, content: &str) -> Result<MessageView, ClientError> {
        let (local_id, recipient_id) = {
            let mut state = self.state.lock().await;
            if state.active_contact().is_none() {
                return Err(ClientError::NoConversation);
            }
            state.begin_send(content).ok_or(ClientError::EmptyMessage)?
        };

        match self.transport.send_message(&recipient_id, content.trim()).await {
            Ok(confirmed) => {
                self.state.lock().await.confirm_send(&local_id, confirmed.clone());
                Ok(confirmed)
            }
            Err(e) => {
                warn!("Send to {} failed, rolling back: {}", recipient_id, e);
                self.state.lock().await.rollback_send(&local_id);
                Err(e)
            }
        }
    }

    /// Typing signals are best-effort; failures are only logged.
    pub async fn set_typing(&self, is_typing: bool) {
        let Some(recipient_id) = self.state.lock().await.active_contact().map(str::to_string) else {
            return;
        };
        if let Err(e) = self.transport.set_typing(&recipient_id, is_typing).await {
            debug!("Typing signal to {} dropped: {}", recipient_id, e);
        }
    }

    async fn transition(&self, change: impl FnOnce(&mut Reconnector)) {
        let mut reconnect = self.reconnect.lock().await;
        change(&mut reconnect);
        self.connection.send_replace(reconnect.state().clone());
    }
}
