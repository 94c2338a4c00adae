use serde::Deserialize;
use thiserror::Error;

use crate::auth::DecodeError;

/// Fallback shown when the server rejected a login without saying why
pub const GENERIC_AUTH_MESSAGE: &str = "Authentication failed";

/// Fallback shown when the server could not be reached at all
pub const CONNECTION_ERROR_MESSAGE: &str = "Could not connect to the server";

/// Failure of a login attempt.
///
/// The display string is the user-facing message and nothing else, so
/// callers can render `err.to_string()` directly.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("{0}")]
    Connection(String),

    #[error("Server returned an unreadable access token")]
    InvalidToken(#[from] DecodeError),
}

/// Error body shapes returned by the token endpoint
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
    message: Option<String>,
}

impl AuthError {
    /// Build a rejection from a non-2xx response, preferring `detail`, then
    /// `message`, then the generic text.
    pub fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .detail
            .filter(|s| !s.is_empty())
            .or(parsed.message.filter(|s| !s.is_empty()))
            .unwrap_or_else(|| GENERIC_AUTH_MESSAGE.to_string());

        AuthError::Rejected {
            status: status.as_u16(),
            message,
        }
    }

    pub fn connection() -> Self {
        AuthError::Connection(CONNECTION_ERROR_MESSAGE.to_string())
    }
}

/// Failure of an authorized API request (anything other than login).
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}
