//! Gateway opcodes.
//!
//! Opcodes tag every payload exchanged over the Gateway WebSocket and
//! determine how the payload's `d` field is interpreted.

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Gateway operation codes.
///
/// The integer assignments are wire-exact; opcode 5 is unassigned by the
/// server and intentionally absent here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// Dispatch - An event was dispatched.
    /// Direction: Receive
    Dispatch = 0,

    /// Heartbeat - Keep the connection alive.
    /// Direction: Send/Receive
    Heartbeat = 1,

    /// Identify - Start a new session.
    /// Direction: Send
    Identify = 2,

    /// Status Update - Update the client's presence.
    /// Direction: Send
    StatusUpdate = 3,

    /// Voice State Update - Join/leave/move between voice channels.
    /// Direction: Send
    VoiceStateUpdate = 4,

    /// Resume - Resume a previous session.
    /// Direction: Send
    Resume = 6,

    /// Reconnect - Server requested a reconnect.
    /// Direction: Receive
    Reconnect = 7,

    /// Request Guild Members - Request guild member chunks.
    /// Direction: Send
    RequestGuildMembers = 8,

    /// Invalid Session - Session has been invalidated.
    /// Direction: Receive
    InvalidSession = 9,

    /// Hello - Sent after connecting, contains the heartbeat interval.
    /// Direction: Receive
    Hello = 10,

    /// Heartbeat ACK - Acknowledgment of a heartbeat.
    /// Direction: Receive
    HeartbeatAck = 11,
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

    /// Returns whether this opcode is only sent (not received).
    pub const fn is_send_only(self) -> bool {
        matches!(
            self,
            OpCode::Identify
                | OpCode::StatusUpdate
                | OpCode::VoiceStateUpdate
                | OpCode::Resume
                | OpCode::RequestGuildMembers
        )
    }

    /// Returns whether this opcode can be both sent and received.
    pub const fn is_bidirectional(self) -> bool {
        matches!(self, OpCode::Heartbeat)
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
    fn test_unassigned_opcode_rejected() {
        assert!(serde_json::from_str::<OpCode>("5").is_err());
        assert!(serde_json::from_str::<OpCode>("255").is_err());
    }

    #[test]
    fn test_opcode_direction() {
        assert!(OpCode::Dispatch.is_receive_only());
        assert!(OpCode::Identify.is_send_only());
        assert!(OpCode::Heartbeat.is_bidirectional());
    }
}
