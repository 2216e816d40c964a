use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use log::{info, warn};
use serde::de::DeserializeOwned;
use warp::http::StatusCode;
use warp::sse::Event;
use warp::{Filter, Rejection, Reply};

use crate::chat::ChatService;
use crate::error::ChatError;
use crate::messages::{
    ContactQuery, ErrorResponse, MarkReadResponse, SendMessageRequest, SendMessageResponse,
    TypingRequest, TypingResponse,
};
use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, UserDirectory};
use crate::typing::TypingCoordinator;

/// Header carrying the caller's user id, set by the authenticating proxy in
/// front of this service.
pub const USER_HEADER: &str = "x-user-id";

/// Largest JSON request body accepted by the API.
pub const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Clone)]
pub struct Server {
    registry: Arc<ConnectionRegistry>,
    chat: ChatService,
    typing: TypingCoordinator,
}

impl Server {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Server {
            chat: ChatService::new(store, users, registry.clone()),
            typing: TypingCoordinator::new(registry.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn api(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let stream = warp::path!("api" / "stream")
            .and(warp::get())
            .and(caller())
            .and(with_server(self.clone()))
            .map(|user_id: String, server: Server| server.open_stream(&user_id));

        let send = warp::path!("api" / "messages")
            .and(warp::post())
            .and(caller())
            .and(json_body())
            .and(with_server(self.clone()))
            .and_then(handle_send);

        let history = warp::path!("api" / "messages")
            .and(warp::get())
            .and(caller())
            .and(warp::query::<ContactQuery>())
            .and(with_server(self.clone()))
            .and_then(handle_history);

        let mark_read = warp::path!("api" / "messages" / "read")
            .and(warp::post())
            .and(caller())
            .and(json_body())
            .and(with_server(self.clone()))
            .and_then(handle_mark_read);

        let typing = warp::path!("api" / "typing")
            .and(warp::post())
            .and(caller())
            .and(json_body())
            .and(with_server(self.clone()))
            .and_then(handle_typing);

        let conversations = warp::path!("api" / "conversations")
            .and(warp::get())
            .and(caller())
            .and(with_server(self.clone()))
            .and_then(handle_conversations);

        stream
            .or(send)
            .or(history)
            .or(mark_read)
            .or(typing)
            .or(conversations)
    }

    pub fn routes(
        &self,
        static_dir: PathBuf,
    ) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let health = warp::path!("health").and(warp::get()).map(|| "OK");

        self.api()
            .or(health)
            .or(warp::fs::dir(static_dir))
            .with(
                warp::cors()
                    .allow_any_origin()
                    .allow_methods(vec!["GET", "POST"])
                    .allow_headers(vec!["content-type", USER_HEADER]),
            )
            .recover(handle_rejection)
            .with(warp::log("campus_chat::http"))
    }

    fn open_stream(&self, user_id: &str) -> impl Reply {
        let events = self
            .registry
            .register(user_id)
            .map(|event| Event::default().json_data(&event));

        let reply = warp::sse::reply(events);
        let reply = warp::reply::with_header(reply, "cache-control", "no-cache");
        warp::reply::with_header(reply, "connection", "keep-alive")
    }
}

fn with_server(server: Server) -> impl Filter<Extract = (Server,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn caller() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>(USER_HEADER).and_then(|user: Option<String>| async move {
        user.map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| warp::reject::custom(ChatError::Unauthorized))
    })
}

async fn handle_send(
    user_id: String,
    body: SendMessageRequest,
    server: Server,
) -> Result<impl Reply, Rejection> {
    let data = server.chat.send(&user_id, body).await.map_err(warp::reject::custom)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&SendMessageResponse {
            message: "Message sent".to_string(),
            data,
        }),
        StatusCode::CREATED,
    ))
}

async fn handle_history(
    user_id: String,
    query: ContactQuery,
    server: Server,
) -> Result<impl Reply, Rejection> {
    let contact_id = query.contact_id.unwrap_or_default();
    let history = server
        .chat
        .history(&user_id, &contact_id)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&history))
}

async fn handle_mark_read(
    user_id: String,
    body: ContactQuery,
    server: Server,
) -> Result<impl Reply, Rejection> {
    let contact_id = body.contact_id.unwrap_or_default();
    let updated = server
        .chat
        .mark_read(&user_id, &contact_id)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&MarkReadResponse { updated }))
}

async fn handle_typing(
    user_id: String,
    body: TypingRequest,
    server: Server,
) -> Result<impl Reply, Rejection> {
    let recipient_id = body.recipient_id.unwrap_or_default();
    server
        .typing
        .set_typing(&user_id, recipient_id.trim(), body.is_typing)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&TypingResponse { success: true }))
}

async fn handle_conversations(user_id: String, server: Server) -> Result<impl Reply, Rejection> {
    let conversations = server
        .chat
        .conversations(&user_id)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&conversations))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<ChatError>() {
        (e.status(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::cors::CorsForbidden>() {
        (StatusCode::FORBIDDEN, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        warn!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    if status.is_server_error() {
        warn!("Request failed: {}", message);
    }

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorResponse { error: message }),
        status,
    ))
}

/// Serves until `shutdown` resolves, then closes every open stream so the
/// graceful shutdown is not held up by long-lived responses.
pub async fn serve<F>(server: Server, config: &crate::config::Config, shutdown: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let registry = server.registry.clone();
    let routes = server.routes(config.static_dir.clone());
    let shutdown = async move {
        shutdown.await;
        info!("Shutting down, closing {} stream(s)", registry.connection_count());
        registry.shutdown();
    };

    if config.tls_available() {
        info!("Starting secure server (HTTPS) on {}", config.bind);
        let (_, running) = warp::serve(routes)
            .tls()
            .cert_path(&config.cert_path)
            .key_path(&config.key_path)
            .bind_with_graceful_shutdown(config.bind, shutdown);
        running.await;
    } else {
        warn!(
            "TLS certificate or key not found at {} / {}, falling back to HTTP on {}",
            config.cert_path.display(),
            config.key_path.display(),
            config.bind
        );
        let (_, running) = warp::serve(routes).bind_with_graceful_shutdown(config.bind, shutdown);
        running.await;
    }
}
