//! HTTP error types.

use thiserror::Error;

/// Errors that can occur during HTTP operations.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Request failed in transit.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rate limited by the provider.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds until the rate limit expires.
        retry_after_ms: u64,
        /// Whether this is a global rate limit.
        global: bool,
    },

    /// The API returned an error body.
    #[error("API error {code}: {message} (status {status})")]
    Api {
        /// HTTP status.
        status: u16,
        /// Provider error code.
        code: u32,
        /// Provider error message.
        message: String,
    },

    /// Unauthorized (invalid token).
    #[error("Unauthorized: invalid token")]
    Unauthorized,

    /// Forbidden (missing permissions).
    #[error("Forbidden: missing permissions")]
    Forbidden,

    /// Resource not found.
    #[error("Not found")]
    NotFound,

    /// Server-side error.
    #[error("Server error: status {0}")]
    ServerError(u16),

    /// Response had an unexpected status.
    #[error("Unexpected status {0}")]
    UnexpectedStatus(u16),

    /// A downloaded artifact was not an image.
    #[error("Unexpected content type: {0:?}")]
    NotAnImage(Option<String>),

    /// The overall deadline elapsed before the operation succeeded.
    #[error("Deadline elapsed during retries")]
    DeadlineElapsed,

    /// Invalid header value.
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    /// Client internal error.
    #[error("Client error: {0}")]
    ClientError(String),
}

impl HttpError {
    /// HTTP status carried by this error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Api { status, .. } => Some(*status),
            HttpError::Unauthorized => Some(401),
            HttpError::Forbidden => Some(403),
            HttpError::NotFound => Some(404),
            HttpError::RateLimited { .. } => Some(429),
            HttpError::ServerError(status) | HttpError::UnexpectedStatus(status) => Some(*status),
            HttpError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the request never reached the server (connect/IO failures),
    /// making a retry safe regardless of status classification.
    pub fn is_transport(&self) -> bool {
        match self {
            HttpError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

/// Provider error response body.
#[derive(Debug, serde::Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub message: String,
}
