use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, client-visible error codes.
///
/// `NotFound` deliberately covers both "does not exist" and "you may not see
/// it" so that private conversations do not leak their existence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    NotAuthorized,
    Unauthenticated,
    ValidationError,
    Conflict,
    UpstreamFailure,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotAuthorized => "NOT_AUTHORIZED",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::UpstreamFailure => "UPSTREAM_FAILURE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body of every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}
