//! Client side of the event stream: reconnects with backoff, merges pushed
//! events into local chat state and performs optimistic sends.

pub mod reconnect;
pub mod session;
pub mod state;
pub mod transport;
pub mod typing;

use thiserror::Error;

pub use reconnect::{ConnectionState, ReconnectPolicy, Reconnector};
pub use session::SessionManager;
pub use state::{ChatState, Notification, TranscriptEntry};
pub use transport::{ChatTransport, EventStream, HttpTransport};
pub use typing::{TypingTracker, TYPING_TIMEOUT};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Malformed event stream: {0}")]
    Stream(String),
    #[error("Invalid event payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Event stream closed")]
    StreamClosed,
    #[error("No conversation is open")]
    NoConversation,
    #[error("Message is empty")]
    EmptyMessage,
}
