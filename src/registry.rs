use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::messages::StreamEvent;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

pub type EventSender = mpsc::UnboundedSender<StreamEvent>;

/// Delivers stream events to recipients by id.
///
/// Delivery is at-most-once with no acknowledgement: callers never learn
/// whether an event reached anyone. The in-process [`ConnectionRegistry`]
/// only reaches clients connected to this process; a broker-backed
/// implementation is needed to run more than one instance.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast_to_one(&self, recipient_id: &str, event: &StreamEvent);

    async fn broadcast_to_many(&self, recipient_ids: &[String], event: &StreamEvent) {
        for recipient_id in recipient_ids {
            self.broadcast_to_one(recipient_id, event).await;
        }
    }
}

struct Connection {
    id: u64,
    sender: EventSender,
    keep_alive: JoinHandle<()>,
}

/// Live event streams keyed by recipient id.
///
/// One connection is tracked per recipient. Registering again for the same
/// id evicts the previous connection (its stream ends), so the most recent
/// stream is the only one that receives broadcasts.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
    next_id: AtomicU64,
    keep_alive_interval: Duration,
}

impl ConnectionRegistry {
    pub fn new(keep_alive_interval: Duration) -> Arc<Self> {
        Arc::new(ConnectionRegistry {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            keep_alive_interval,
        })
    }

    /// Opens a stream for `recipient_id`. The first event on it is always
    /// [`StreamEvent::Connected`], followed by a [`StreamEvent::Ping`] every
    /// keep-alive interval. Dropping the returned stream unregisters it.
    pub fn register(self: &Arc<Self>, recipient_id: &str) -> ConnectionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        // the receiver is still in hand, this cannot fail
        let _ = tx.send(StreamEvent::Connected);

        let connection_id = self.insert(recipient_id, tx);
        info!("Stream opened for {} (connection {})", recipient_id, connection_id);

        ConnectionStream {
            recipient_id: recipient_id.to_string(),
            connection_id,
            receiver: rx,
            registry: Arc::downgrade(self),
        }
    }

    fn insert(self: &Arc<Self>, recipient_id: &str, sender: EventSender) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let keep_alive = spawn_keep_alive(
            Arc::downgrade(self),
            recipient_id.to_string(),
            id,
            sender.clone(),
            self.keep_alive_interval,
        );

        let previous = self
            .write()
            .insert(recipient_id.to_string(), Connection { id, sender, keep_alive });

        if let Some(previous) = previous {
            previous.keep_alive.abort();
            info!("Replaced connection {} for {}", previous.id, recipient_id);
        }
        id
    }

    /// Removes whatever connection is registered for `recipient_id` and
    /// stops its keep-alive.
    pub fn unregister(&self, recipient_id: &str) {
        let removed = self.write().remove(recipient_id);
        if let Some(connection) = removed {
            connection.keep_alive.abort();
            info!("Unregistered connection {} for {}", connection.id, recipient_id);
        }
    }

    /// Like [`unregister`](Self::unregister) but only if the entry is still
    /// the given connection, so a replaced stream cannot evict its
    /// successor.
    pub(crate) fn unregister_connection(&self, recipient_id: &str, connection_id: u64) {
        let removed = {
            let mut connections = self.write();
            match connections.get(recipient_id) {
                Some(current) if current.id == connection_id => connections.remove(recipient_id),
                _ => None,
            }
        };
        if let Some(connection) = removed {
            connection.keep_alive.abort();
            info!("Unregistered connection {} for {}", connection.id, recipient_id);
        }
    }

    /// Pushes `event` to `recipient_id` if connected. A failed write means
    /// the stream is gone and the entry is dropped.
    pub fn send_to(&self, recipient_id: &str, event: &StreamEvent) -> bool {
        let dead = {
            let connections = self.read();
            let Some(connection) = connections.get(recipient_id) else {
                return false;
            };
            match connection.sender.send(event.clone()) {
                Ok(()) => return true,
                Err(_) => connection.id,
            }
        };

        debug!("Dropping dead connection {} for {}", dead, recipient_id);
        self.unregister_connection(recipient_id, dead);
        false
    }

    pub fn is_connected(&self, recipient_id: &str) -> bool {
        self.read().contains_key(recipient_id)
    }

    pub fn connection_count(&self) -> usize {
        self.read().len()
    }

    /// Unregisters every connection. Open streams end and clients are
    /// expected to reconnect.
    pub fn shutdown(&self) {
        let drained: Vec<(String, Connection)> = self.write().drain().collect();
        for (_, connection) in &drained {
            connection.keep_alive.abort();
        }
        info!("Registry shut down, closed {} connection(s)", drained.len());
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Connection>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Connection>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        let connections = self.connections.get_mut().unwrap_or_else(PoisonError::into_inner);
        for connection in connections.values() {
            connection.keep_alive.abort();
        }
    }
}

#[async_trait]
impl Broadcaster for ConnectionRegistry {
    async fn broadcast_to_one(&self, recipient_id: &str, event: &StreamEvent) {
        self.send_to(recipient_id, event);
    }
}

fn spawn_keep_alive(
    registry: Weak<ConnectionRegistry>,
    recipient_id: String,
    connection_id: u64,
    sender: EventSender,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if sender.send(StreamEvent::Ping).is_err() {
                if let Some(registry) = registry.upgrade() {
                    debug!("Keep-alive failed for {}", recipient_id);
                    registry.unregister_connection(&recipient_id, connection_id);
                }
                break;
            }
        }
    })
}

/// Receiving half of a registered connection.
pub struct ConnectionStream {
    recipient_id: String,
    connection_id: u64,
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
    registry: Weak<ConnectionRegistry>,
}

impl ConnectionStream {
    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }
}

impl Stream for ConnectionStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ConnectionStream {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister_connection(&self.recipient_id, self.connection_id);
        }
    }
}
