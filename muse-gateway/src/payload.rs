//! Gateway payload structures.
//!
//! These structures represent the JSON payloads sent and received over the
//! gateway websocket. Dispatch data is deferred with
//! `serde_json::value::RawValue` so event bodies are only parsed once the
//! event type is known.

use crate::opcode::OpCode;
use muse_model::{Intents, User};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A raw gateway payload for initial parsing.
#[derive(Debug, Deserialize)]
pub struct RawGatewayPayload<'a> {
    /// Opcode for the payload.
    pub op: OpCode,

    /// Event data, deferred.
    #[serde(borrow)]
    pub d: Option<&'a serde_json::value::RawValue>,

    /// Sequence number (for Dispatch events).
    pub s: Option<u64>,

    /// Event name (for Dispatch events).
    pub t: Option<String>,
}

/// A fully formed gateway payload for sending.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayPayload<D> {
    /// Opcode for the payload.
    pub op: OpCode,

    /// Payload data.
    pub d: D,
}

impl<D: Serialize> GatewayPayload<D> {
    /// Create a new payload with opcode and data.
    pub fn new(op: OpCode, data: D) -> Self {
        Self { op, d: data }
    }
}

/// Payload for the Hello opcode (op 10).
///
/// Received immediately after connecting to the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    /// Interval (in milliseconds) at which to send heartbeats.
    pub heartbeat_interval: u64,
}

/// Payload for the Identify opcode (op 2).
///
/// Sent to authenticate and start a new session.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload<'a> {
    /// Authentication token.
    pub token: Cow<'a, str>,

    /// Gateway intents mask.
    pub intents: Intents,

    /// Connection properties.
    pub properties: ConnectionProperties<'a>,

    /// Whether to enable payload compression. Always `false`; the session
    /// does not negotiate zlib streams.
    pub compress: bool,
}

impl<'a> IdentifyPayload<'a> {
    /// Create an Identify payload for the given token and properties.
    pub fn new(
        token: impl Into<Cow<'a, str>>,
        intents: Intents,
        properties: ConnectionProperties<'a>,
    ) -> Self {
        Self {
            token: token.into(),
            intents,
            properties,
            compress: false,
        }
    }
}

/// Connection properties sent with Identify.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProperties<'a> {
    /// Operating system.
    pub os: Cow<'a, str>,

    /// Client name.
    pub browser: Cow<'a, str>,

    /// Device name.
    pub device: Cow<'a, str>,
}

impl ConnectionProperties<'static> {
    /// Properties resembling an official desktop client, for user-token
    /// sessions. The provider only accepts interactions from what it
    /// believes is a regular client.
    pub fn official_client() -> Self {
        Self {
            os: Cow::Borrowed("Windows"),
            browser: Cow::Borrowed("Chrome"),
            device: Cow::Borrowed(""),
        }
    }

    /// Library properties, for bot-token sessions.
    pub fn library() -> Self {
        Self {
            os: Cow::Owned(std::env::consts::OS.to_string()),
            browser: Cow::Borrowed("muse"),
            device: Cow::Borrowed("muse"),
        }
    }
}

/// Payload for the Resume opcode (op 6).
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload<'a> {
    /// Authentication token.
    pub token: Cow<'a, str>,

    /// Session ID from the previous Ready event.
    pub session_id: Cow<'a, str>,

    /// Last sequence number received.
    pub seq: u64,
}

/// Payload for the READY dispatch event.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    /// Gateway protocol version.
    #[serde(default)]
    pub v: u8,

    /// The authenticated user.
    pub user: User,

    /// Session ID, required to authenticate interaction requests.
    pub session_id: String,

    /// URL to use for resuming the session.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Create a Heartbeat payload.
///
/// The heartbeat payload is just the sequence number (or null if no events
/// received yet).
pub fn create_heartbeat_payload(sequence: Option<u64>) -> String {
    match sequence {
        Some(seq) => format!(r#"{{"op":1,"d":{}}}"#, seq),
        None => r#"{"op":1,"d":null}"#.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_payload() {
        let json = r#"{"heartbeat_interval": 41250}"#;
        let payload: HelloPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.heartbeat_interval, 41250);
    }

    #[test]
    fn test_identify_serialization() {
        let identify = IdentifyPayload::new(
            "test_token",
            Intents::default(),
            ConnectionProperties::official_client(),
        );
        let payload = GatewayPayload::new(OpCode::Identify, identify);

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""op":2"#));
        assert!(json.contains("test_token"));
        assert!(json.contains(r#""intents":513"#));
        assert!(json.contains(r#""compress":false"#));
        assert!(json.contains(r#""browser":"Chrome""#));
    }

    #[test]
    fn test_resume_serialization() {
        let resume = ResumePayload {
            token: "t".into(),
            session_id: "abc".into(),
            seq: 12,
        };
        let json = serde_json::to_string(&GatewayPayload::new(OpCode::Resume, resume)).unwrap();
        assert!(json.contains(r#""op":6"#));
        assert!(json.contains(r#""seq":12"#));
    }

    #[test]
    fn test_heartbeat_payload() {
        assert_eq!(create_heartbeat_payload(Some(42)), r#"{"op":1,"d":42}"#);
        assert_eq!(create_heartbeat_payload(None), r#"{"op":1,"d":null}"#);
    }

    #[test]
    fn test_ready_parsing() {
        let json = r#"{
            "v": 10,
            "user": {"id": "5", "username": "me"},
            "session_id": "deadbeef",
            "resume_gateway_url": "wss://gateway-us-east1-b.example.gg"
        }"#;
        let ready: ReadyPayload = serde_json::from_str(json).unwrap();
        assert_eq!(ready.session_id, "deadbeef");
        assert!(ready.resume_gateway_url.is_some());
    }
}
