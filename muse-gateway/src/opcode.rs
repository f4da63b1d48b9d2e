//! Gateway opcodes.
//!
//! Opcodes define the type of payload being sent or received over the
//! gateway websocket. Only the opcodes the session protocol uses are
//! modelled; anything else deserializes to [`OpCode::Other`] and is
//! dropped.

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Gateway operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// Dispatch - an event was dispatched.
    /// Direction: Receive
    Dispatch = 0,

    /// Heartbeat - keep the connection alive.
    /// Direction: Send/Receive
    Heartbeat = 1,

    /// Identify - start a new session.
    /// Direction: Send
    Identify = 2,

    /// Resume - resume a previous session.
    /// Direction: Send
    Resume = 6,

    /// Reconnect - server requested a reconnect.
    /// Direction: Receive
    Reconnect = 7,

    /// Invalid Session - session has been invalidated.
    /// Direction: Receive
    InvalidSession = 9,

    /// Hello - sent after connecting, contains heartbeat interval.
    /// Direction: Receive
    Hello = 10,

    /// Heartbeat ACK - acknowledgment of heartbeat received.
    /// Direction: Receive
    HeartbeatAck = 11,

    /// Any opcode the session protocol does not use.
    #[serde(other)]
    Other = 255,
}

impl OpCode {
    /// Returns whether this opcode is only received (not sent).
    pub const fn is_receive_only(self) -> bool {
        matches!(
            self,
            OpCode::Dispatch
                | OpCode::Reconnect
                | OpCode::InvalidSession
                | OpCode::Hello
                | OpCode::HeartbeatAck
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_serialization() {
        let json = serde_json::to_string(&OpCode::Hello).unwrap();
        assert_eq!(json, "10");

        let opcode: OpCode = serde_json::from_str("10").unwrap();
        assert_eq!(opcode, OpCode::Hello);
    }

    #[test]
    fn test_unknown_opcode_maps_to_other() {
        let opcode: OpCode = serde_json::from_str("31").unwrap();
        assert_eq!(opcode, OpCode::Other);
    }
}
