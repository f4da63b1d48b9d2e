//! Gateway event decoding.
//!
//! Dispatch payloads (opcode 0) are decoded into a tagged event type. The
//! pipeline only consumes connection events and the three message events;
//! anything else becomes [`GatewayEvent::Unknown`], which the session logs
//! and drops.

use crate::error::GatewayError;
use crate::payload::ReadyPayload;
use muse_model::{Message, MessageDelete, MessageUpdate};

/// Parsed gateway event ready for dispatch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum GatewayEvent {
    /// Received after successful Identify.
    Ready(Box<ReadyPayload>),

    /// Received after successful Resume.
    Resumed,

    /// Message was created.
    MessageCreate(Box<Message>),

    /// Message was updated.
    MessageUpdate(Box<MessageUpdate>),

    /// Message was deleted.
    MessageDelete(MessageDelete),

    /// Any dispatch event the pipeline does not consume.
    Unknown(String),
}

impl GatewayEvent {
    /// Event name as carried in the dispatch `t` field.
    pub fn kind(&self) -> &str {
        match self {
            GatewayEvent::Ready(_) => "READY",
            GatewayEvent::Resumed => "RESUMED",
            GatewayEvent::MessageCreate(_) => "MESSAGE_CREATE",
            GatewayEvent::MessageUpdate(_) => "MESSAGE_UPDATE",
            GatewayEvent::MessageDelete(_) => "MESSAGE_DELETE",
            GatewayEvent::Unknown(name) => name,
        }
    }
}

/// Decode a dispatch payload into a [`GatewayEvent`].
pub fn parse_event(
    event_name: &str,
    data: &serde_json::value::RawValue,
) -> Result<GatewayEvent, GatewayError> {
    let event = match event_name {
        "READY" => GatewayEvent::Ready(Box::new(serde_json::from_str(data.get())?)),
        "RESUMED" => GatewayEvent::Resumed,
        "MESSAGE_CREATE" => GatewayEvent::MessageCreate(Box::new(serde_json::from_str(data.get())?)),
        "MESSAGE_UPDATE" => GatewayEvent::MessageUpdate(Box::new(serde_json::from_str(data.get())?)),
        "MESSAGE_DELETE" => GatewayEvent::MessageDelete(serde_json::from_str(data.get())?),
        other => GatewayEvent::Unknown(other.to_string()),
    };
    Ok(event)
}
