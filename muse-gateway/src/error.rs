//! Gateway error types.

use thiserror::Error;

/// Errors that can occur during gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// WebSocket connection or protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Failed to parse a JSON payload.
    #[error("JSON decode error: {0}")]
    JsonDecode(String),

    /// Session was invalidated by the gateway.
    /// The boolean indicates if the session is resumable.
    #[error("Session invalidated, resumable: {resumable}")]
    InvalidSession {
        /// Whether the session can be resumed.
        resumable: bool,
    },

    /// Connection was closed.
    #[error("Connection closed: code={code}, reason={reason}")]
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// The gateway rejected the token or intents; reconnecting will not
    /// help.
    #[error("Authentication failed: close code {code}")]
    AuthenticationFailed {
        /// The fatal close code.
        code: u16,
    },

    /// Heartbeat acknowledgment was not received in time.
    #[error("Heartbeat acknowledgment timeout")]
    HeartbeatTimeout,

    /// Failed to forward an event through the dispatch channel.
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Timed out waiting for the session to become ready.
    #[error("Timed out waiting for READY")]
    ReadyTimeout,

    /// Session is not connected.
    #[error("Session not connected")]
    NotConnected,
}

impl GatewayError {
    /// Whether this error permits another connection attempt.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            GatewayError::AuthenticationFailed { .. } | GatewayError::ReadyTimeout
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::JsonDecode(err.to_string())
    }
}

impl<T> From<flume::SendError<T>> for GatewayError {
    fn from(err: flume::SendError<T>) -> Self {
        GatewayError::ChannelSend(err.to_string())
    }
}

/// Gateway close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error occurred.
    UnknownError = 4000,
    /// Invalid opcode sent.
    UnknownOpcode = 4001,
    /// Invalid payload (decode error).
    DecodeError = 4002,
    /// Payload sent before identifying.
    NotAuthenticated = 4003,
    /// Invalid token.
    AuthenticationFailed = 4004,
    /// Already authenticated.
    AlreadyAuthenticated = 4005,
    /// Invalid sequence number for resume.
    InvalidSeq = 4007,
    /// Rate limited.
    RateLimited = 4008,
    /// Session timed out.
    SessionTimedOut = 4009,
    /// Invalid shard configuration.
    InvalidShard = 4010,
    /// Sharding required.
    ShardingRequired = 4011,
    /// Invalid API version.
    InvalidApiVersion = 4012,
    /// Invalid intents.
    InvalidIntents = 4013,
    /// Disallowed intents (privileged intent not enabled).
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Returns whether the session can be resumed after this close code.
    pub const fn is_resumable(self) -> bool {
        matches!(
            self,
            CloseCode::UnknownError | CloseCode::InvalidSeq | CloseCode::SessionTimedOut
        )
    }

    /// Returns whether this close code is fatal: no reconnection attempt
    /// may follow it.
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            CloseCode::AuthenticationFailed
                | CloseCode::InvalidShard
                | CloseCode::ShardingRequired
                | CloseCode::InvalidApiVersion
                | CloseCode::InvalidIntents
                | CloseCode::DisallowedIntents
        )
    }

    /// Try to convert a u16 close code to this enum.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            4000 => Some(CloseCode::UnknownError),
            4001 => Some(CloseCode::UnknownOpcode),
            4002 => Some(CloseCode::DecodeError),
            4003 => Some(CloseCode::NotAuthenticated),
            4004 => Some(CloseCode::AuthenticationFailed),
            4005 => Some(CloseCode::AlreadyAuthenticated),
            4007 => Some(CloseCode::InvalidSeq),
            4008 => Some(CloseCode::RateLimited),
            4009 => Some(CloseCode::SessionTimedOut),
            4010 => Some(CloseCode::InvalidShard),
            4011 => Some(CloseCode::ShardingRequired),
            4012 => Some(CloseCode::InvalidApiVersion),
            4013 => Some(CloseCode::InvalidIntents),
            4014 => Some(CloseCode::DisallowedIntents),
            _ => None,
        }
    }
}
