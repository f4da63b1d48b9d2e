//! Muse Gateway - websocket session client
#![deny(unsafe_code)]
//!
//! This crate maintains one gateway websocket per [`Session`]: Hello
//! negotiation, heartbeating, Identify/Resume, dispatch decoding, and
//! reconnection policy. The facade runs two sessions concurrently (user
//! and bot identities) and merges their dispatched events.

pub mod backoff;
pub mod error;
pub mod event;
pub mod heartbeat;
mod opcode;
mod payload;
mod session;

// Public re-exports
pub use error::{CloseCode, GatewayError};
pub use event::GatewayEvent;
pub use opcode::OpCode;
pub use payload::{
    ConnectionProperties, GatewayPayload, HelloPayload, IdentifyPayload, ReadyPayload,
    ResumePayload,
};
pub use session::{Session, SessionConfig, SessionKind, SessionState};

/// Gateway API version used by this library.
pub const GATEWAY_VERSION: u8 = 10;

/// Default gateway URL.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";
