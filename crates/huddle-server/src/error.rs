use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use huddle_shared::{ErrorBody, ErrorCode};
use huddle_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotAuthorized(String),

    #[error("Missing or invalid session")]
    Unauthenticated,

    #[error("{0}")]
    Validation(String),

    #[error("Image too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Conflict(String),

    /// Blob service or database failure. The detail is logged, never returned.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Persistence or runtime failure. The detail is logged, never returned.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::NotAuthorized(_) => ErrorCode::NotAuthorized,
            ServerError::Unauthenticated => ErrorCode::Unauthenticated,
            ServerError::Validation(_) | ServerError::BlobTooLarge { .. } => {
                ErrorCode::ValidationError
            }
            ServerError::Conflict(_) => ErrorCode::Conflict,
            ServerError::Upstream(_) => ErrorCode::UpstreamFailure,
            ServerError::Internal(_) => ErrorCode::Internal,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::BlobTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ServerError::NotFound(msg.to_string()),
            StoreError::NotAuthorized(msg) => ServerError::NotAuthorized(msg.to_string()),
            StoreError::AlreadyMember => ServerError::Conflict("AlreadyMember".to_string()),
            StoreError::Validation(msg) => ServerError::Validation(msg),
            StoreError::Sqlite(e) => ServerError::Upstream(format!("database: {e}")),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = match &self {
            ServerError::Upstream(detail) => {
                tracing::error!(error = %detail, "Upstream failure");
                "Upstream service failure".to_string()
            }
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: message,
            code: self.code(),
        };

        (self.status(), axum::Json(body)).into_response()
    }
}
