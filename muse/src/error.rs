//! Error taxonomy surfaced to callers.
//!
//! The transport layers absorb what they can (retries, backoff); what
//! reaches this module is terminal for the call that produced it. Every
//! generation error carries the triggering message id when one exists,
//! the normalized prompt fingerprint, and the elapsed time.

use muse_gateway::GatewayError;
use muse_http::HttpError;
use muse_model::Snowflake;
use muse_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Distinct error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Gateway close 4004 or HTTP 401; fatal.
    Auth,
    /// The provider never replied to the command (silent drop).
    PreModeration,
    /// The provider started, then stopped the job (`(Stopped)`).
    PostModeration,
    /// The tracked reply was deleted mid-generation.
    EphemeralModeration,
    /// The interaction was rejected outright (4xx with moderation body).
    InvalidRequest,
    /// The provider's queue is full; callers may retry later.
    QueueFull,
    /// The job was queued rather than started.
    JobQueued,
    /// I/O or 5xx that outlived the retry budget.
    TransientNetwork,
    /// A per-call deadline fired.
    Deadline,
    /// A variant's correlation window closed without a match.
    Correlation,
    /// Artifact persistence failed.
    Storage,
    /// The client was closed while the call was in flight.
    Cancelled,
}

/// A terminal generation or upscale failure.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} after {elapsed:?} (fingerprint: {fingerprint:?}, message: {message_id:?}): {detail}")]
pub struct GenerationError {
    /// Which kind of failure this is.
    pub kind: ErrorKind,
    /// Message that triggered the classification, when one exists.
    pub message_id: Option<Snowflake>,
    /// Normalized prompt fingerprint of the generation.
    pub fingerprint: String,
    /// Time from the start of the call to the failure.
    pub elapsed: Duration,
    /// Human-readable detail; never a stack trace.
    pub detail: String,
}

impl GenerationError {
    pub(crate) fn new(
        kind: ErrorKind,
        fingerprint: impl Into<String>,
        elapsed: Duration,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message_id: None,
            fingerprint: fingerprint.into(),
            elapsed,
            detail: detail.into(),
        }
    }

    pub(crate) fn with_message(mut self, message_id: Option<Snowflake>) -> Self {
        self.message_id = message_id;
        self
    }
}

/// Top-level client error.
#[derive(Debug, Error)]
pub enum MuseError {
    /// Gateway failure (fatal close codes, ready timeout).
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// HTTP failure that escaped the retry layer.
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Artifact persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration failure.
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A terminal generation failure.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The client has not been initialized (or was closed).
    #[error("Client is not initialized")]
    NotInitialized,
}

impl MuseError {
    /// Collapse this error to its caller-facing kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MuseError::Gateway(GatewayError::AuthenticationFailed { .. }) => ErrorKind::Auth,
            MuseError::Gateway(GatewayError::ReadyTimeout) => ErrorKind::Deadline,
            MuseError::Gateway(_) => ErrorKind::TransientNetwork,
            MuseError::Http(err) => http_error_kind(err),
            MuseError::Storage(_) => ErrorKind::Storage,
            MuseError::Config(_) => ErrorKind::InvalidRequest,
            MuseError::Generation(err) => err.kind,
            MuseError::NotInitialized => ErrorKind::Cancelled,
        }
    }
}

/// Map a transport error to the caller-facing kind.
pub(crate) fn http_error_kind(err: &HttpError) -> ErrorKind {
    match err {
        HttpError::Unauthorized => ErrorKind::Auth,
        HttpError::Forbidden | HttpError::NotFound | HttpError::Api { .. } => {
            ErrorKind::InvalidRequest
        }
        HttpError::DeadlineElapsed => ErrorKind::Deadline,
        _ => ErrorKind::TransientNetwork,
    }
}
