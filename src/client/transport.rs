use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{future, Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;

use crate::client::ClientError;
use crate::messages::{ErrorResponse, MessageView, SendMessageResponse, StreamEvent};
use crate::server::USER_HEADER;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ClientError>> + Send>>;

/// What the session manager needs from the server.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self) -> Result<EventStream, ClientError>;
    async fn send_message(&self, recipient_id: &str, content: &str) -> Result<MessageView, ClientError>;
    async fn set_typing(&self, recipient_id: &str, is_typing: bool) -> Result<(), ClientError>;
    async fn history(&self, contact_id: &str) -> Result<Vec<MessageView>, ClientError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    user_id: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        HttpTransport {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header(USER_HEADER, &self.user_id)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header(USER_HEADER, &self.user_id)
    }
}

async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(&self) -> Result<EventStream, ClientError> {
        let response = check(
            self.get("/api/stream")
                .header("accept", "text/event-stream")
                .send()
                .await?,
        )
        .await?;

        Ok(decode_events(response.bytes_stream()))
    }

    async fn send_message(&self, recipient_id: &str, content: &str) -> Result<MessageView, ClientError> {
        let response = self
            .post("/api/messages")
            .json(&json!({ "recipientId": recipient_id, "content": content }))
            .send()
            .await?;
        let body: SendMessageResponse = check(response).await?.json().await?;
        Ok(body.data)
    }

    async fn set_typing(&self, recipient_id: &str, is_typing: bool) -> Result<(), ClientError> {
        let response = self
            .post("/api/typing")
            .json(&json!({ "recipientId": recipient_id, "isTyping": is_typing }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn history(&self, contact_id: &str) -> Result<Vec<MessageView>, ClientError> {
        let response = self
            .get("/api/messages")
            .query(&[("contactId", contact_id)])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Parses a `text/event-stream` body into stream events. Comments and
/// events without a `data` field are skipped.
pub fn decode_events<S, B>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let events = body
        .eventsource()
        .filter(|item| future::ready(!matches!(item, Ok(event) if event.data.is_empty())))
        .map(|item| match item {
            Ok(event) => serde_json::from_str(&event.data).map_err(ClientError::from),
            Err(EventStreamError::Transport(e)) => Err(ClientError::from(e)),
            Err(e) => Err(ClientError::Stream(e.to_string())),
        });
    Box::pin(events)
}
