//! Gateway error types using thiserror.
//!
//! Per-frame failures (undecodable payloads) are absorbed where they occur;
//! everything in [`GatewayError`] unwinds a connection attempt. The
//! supervisor consults [`GatewayError::is_fatal`] to decide between retrying
//! with backoff and surfacing the error to the caller.

use thiserror::Error;

/// Errors that can occur during Gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// WebSocket connection or protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Transport-level failure outside the WebSocket protocol itself
    /// (session ended, connect timeout, pump channel torn down).
    #[error("transport error: {0}")]
    Transport(String),

    /// Failed to decode a payload.
    #[error("payload decode error: {0}")]
    PayloadDecode(String),

    /// The connection stopped acknowledging heartbeats.
    #[error("heartbeat acknowledgment timeout")]
    ZombieConnection,

    /// The server requested a reconnect (opcode 7).
    #[error("server requested reconnect")]
    ServerReconnect,

    /// The client requested a fresh connection via `close(reconnect=true)`.
    #[error("client requested reconnect")]
    ReconnectRequested,

    /// The session was invalidated by the server (opcode 9).
    #[error("session invalidated, resumable: {resumable}")]
    InvalidSession {
        /// Whether the session can still be resumed.
        resumable: bool,
    },

    /// Authentication failed (invalid token).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The connection was closed by the server.
    #[error("connection closed: code={code}, reason={reason}")]
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// The retry budget was exhausted without reaching Ready/Resumed.
    #[error("retry limit exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
    },

    /// Failed to send through a channel.
    #[error("channel send error: {0}")]
    ChannelSend(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Whether this error terminates the supervisor instead of scheduling
    /// a retry.
    pub fn is_fatal(&self) -> bool {
        match self {
            GatewayError::AuthenticationFailed(_) => true,
            GatewayError::RetriesExhausted { .. } => true,
            GatewayError::Closed { code, .. } => CloseCode::from_code(*code)
                .is_some_and(|cc| !cc.can_reconnect()),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::PayloadDecode(err.to_string())
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
    /// Too many guilds (sharding required).
    ShardingRequired = 4011,
    /// Invalid API version.
    InvalidApiVersion = 4012,
    /// Invalid intents.
    InvalidIntents = 4013,
    /// Disallowed intents (privileged intent not enabled).
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Returns whether reconnection is possible after this close code.
    ///
    /// Authentication failures and sharding/version misconfiguration will
    /// fail identically on every attempt.
    pub const fn can_reconnect(self) -> bool {
        !matches!(
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_reconnectability() {
        assert!(CloseCode::UnknownError.can_reconnect());
        assert!(CloseCode::SessionTimedOut.can_reconnect());
        assert!(!CloseCode::AuthenticationFailed.can_reconnect());
        assert!(!CloseCode::ShardingRequired.can_reconnect());
        assert!(!CloseCode::DisallowedIntents.can_reconnect());
    }

    #[test]
    fn test_fatality() {
        assert!(GatewayError::AuthenticationFailed("bad token".into()).is_fatal());
        assert!(GatewayError::Closed {
            code: 4013,
            reason: String::new()
        }
        .is_fatal());

        // Normal closes and unassigned codes stay retriable.
        assert!(!GatewayError::Closed {
            code: 1000,
            reason: String::new()
        }
        .is_fatal());
        assert!(!GatewayError::ZombieConnection.is_fatal());
        assert!(!GatewayError::ServerReconnect.is_fatal());
        assert!(!GatewayError::InvalidSession { resumable: false }.is_fatal());
    }
}
