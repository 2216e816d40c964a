use thiserror::Error;
use warp::http::StatusCode;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("Unknown user: {0}")]
    UnknownUser(String),
    #[error("Missing caller identity")]
    Unauthorized,
    #[error("Store error: {0}")]
    Store(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::UnknownUser(_) => StatusCode::NOT_FOUND,
            ChatError::Unauthorized => StatusCode::UNAUTHORIZED,
            ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl warp::reject::Reject for ChatError {}

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
