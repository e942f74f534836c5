use reqwest::StatusCode;
use thiserror::Error;

use huddle_shared::ErrorCode;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body.
    #[error("{status}: {message} ({code})")]
    Api {
        status: StatusCode,
        code: ErrorCode,
        message: String,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No conversation is open")]
    NoOpenConversation,
}

impl ClientError {
    /// The server-side error code, if this came from an error response.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
