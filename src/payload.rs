//! Gateway payload structures.
//!
//! Every frame on the wire is a JSON envelope `{"op", "d", "s", "t"}`. The
//! envelope is kept fully owned so a single decoded value can feed both the
//! raw payload stream and the opcode dispatcher.

use crate::error::GatewayError;
use crate::opcode::OpCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Gateway payload envelope.
///
/// `s` and `t` are only populated on `Dispatch` payloads. For outbound
/// payloads, absent fields are omitted entirely rather than sent as `null`
/// (the one exception is a sequence-less heartbeat, which carries an
/// explicit `"d": null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Opcode for the payload.
    pub op: OpCode,

    /// Event data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,

    /// Sequence number (for Dispatch events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,

    /// Event name (for Dispatch events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// Create a payload with only opcode and data.
    pub fn new(op: OpCode, data: Value) -> Self {
        Self {
            op,
            d: Some(data),
            s: None,
            t: None,
        }
    }

    /// Create a payload with no data.
    pub fn opcode_only(op: OpCode) -> Self {
        Self {
            op,
            d: None,
            s: None,
            t: None,
        }
    }

    /// Create a Heartbeat payload.
    ///
    /// Carries the last observed sequence, or JSON `null` before any
    /// Dispatch has been seen.
    pub fn heartbeat(sequence: Option<i64>) -> Self {
        let d = match sequence {
            Some(seq) => Value::from(seq),
            None => Value::Null,
        };
        Self::new(OpCode::Heartbeat, d)
    }

    /// Create an Identify payload from the configured options.
    pub fn identify(options: &IdentifyOptions) -> Result<Self, GatewayError> {
        let data = IdentifyData {
            token: options.token.clone(),
            properties: options.properties.clone(),
            compress: false,
            large_threshold: options.large_threshold,
            shard: options.shard,
            presence: options.presence.clone(),
        };
        Ok(Self::new(OpCode::Identify, serde_json::to_value(data)?))
    }

    /// Create a Resume payload reattaching to an existing session.
    pub fn resume(
        options: &IdentifyOptions,
        session_id: &str,
        seq: i64,
    ) -> Result<Self, GatewayError> {
        let data = ResumeData {
            token: options.token.clone(),
            session_id: session_id.to_owned(),
            seq,
        };
        Ok(Self::new(OpCode::Resume, serde_json::to_value(data)?))
    }

    /// Create a Status Update payload.
    pub fn status_update(presence: &PresenceUpdate) -> Result<Self, GatewayError> {
        Ok(Self::new(
            OpCode::StatusUpdate,
            serde_json::to_value(presence)?,
        ))
    }
}

/// Body of the Hello payload (op 10), received right after connecting.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloData {
    /// Interval (in milliseconds) at which to send heartbeats.
    pub heartbeat_interval: u64,
}

/// Body of the Identify payload (op 2).
#[derive(Debug, Clone, Serialize)]
struct IdentifyData {
    token: String,
    properties: ConnectionProperties,
    compress: bool,
    large_threshold: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    shard: Option<[u32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence: Option<PresenceUpdate>,
}

/// Body of the Resume payload (op 6).
#[derive(Debug, Clone, Serialize)]
struct ResumeData {
    token: String,
    session_id: String,
    seq: i64,
}

/// Everything needed to open (or reattach) a session.
///
/// The resume fields are a caller-supplied hint: when both are present the
/// first connection attempt sends Resume instead of Identify.
#[derive(Debug, Clone)]
pub struct IdentifyOptions {
    /// Authentication token.
    pub token: String,

    /// Connection properties reported in Identify.
    pub properties: ConnectionProperties,

    /// Threshold above which guilds are sent as "large" (50-250).
    pub large_threshold: u8,

    /// Shard information: [shard_id, total_shards].
    pub shard: Option<[u32; 2]>,

    /// Initial presence.
    pub presence: Option<PresenceUpdate>,

    /// Session id from a previous run, to resume instead of identifying.
    pub resume_session_id: Option<String>,

    /// Last sequence observed by a previous run.
    pub resume_sequence: Option<i64>,
}

impl IdentifyOptions {
    /// Create identify options with required fields.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            properties: ConnectionProperties::default(),
            large_threshold: 250,
            shard: None,
            presence: None,
            resume_session_id: None,
            resume_sequence: None,
        }
    }

    /// Set shard information.
    pub fn with_shard(mut self, shard_id: u32, total_shards: u32) -> Self {
        self.shard = Some([shard_id, total_shards]);
        self
    }

    /// Set the initial presence.
    pub fn with_presence(mut self, presence: PresenceUpdate) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Seed a resume hint from a previous run's `(session_id, sequence)`.
    pub fn with_resume_hint(mut self, session_id: impl Into<String>, sequence: i64) -> Self {
        self.resume_session_id = Some(session_id.into());
        self.resume_sequence = Some(sequence);
        self
    }
}

/// Connection properties sent with Identify.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProperties {
    /// Operating system.
    pub os: String,

    /// Library name.
    pub browser: String,

    /// Library name (again, for device).
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "basalt-gateway".to_string(),
            device: "basalt-gateway".to_string(),
        }
    }
}

/// Presence update, used both in Identify and as a Status Update body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Unix timestamp (milliseconds) of when the client went idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// User's activities.
    pub activities: Vec<Activity>,

    /// User's status.
    pub status: Status,

    /// Whether the client is AFK.
    pub afk: bool,
}

/// Activity for presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name.
    pub name: String,

    /// Activity type.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,

    /// Stream URL (only for Streaming type).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Activity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ActivityType {
    /// Playing {name}
    Playing,
    /// Streaming {name}
    Streaming,
    /// Listening to {name}
    Listening,
    /// Watching {name}
    Watching,
    /// {emoji} {name}
    Custom,
    /// Competing in {name}
    Competing,
}

impl From<u8> for ActivityType {
    fn from(value: u8) -> Self {
        match value {
            0 => ActivityType::Playing,
            1 => ActivityType::Streaming,
            2 => ActivityType::Listening,
            3 => ActivityType::Watching,
            4 => ActivityType::Custom,
            5 => ActivityType::Competing,
            _ => ActivityType::Playing,
        }
    }
}

impl From<ActivityType> for u8 {
    fn from(value: ActivityType) -> Self {
        match value {
            ActivityType::Playing => 0,
            ActivityType::Streaming => 1,
            ActivityType::Listening => 2,
            ActivityType::Watching => 3,
            ActivityType::Custom => 4,
            ActivityType::Competing => 5,
        }
    }
}

/// User status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online.
    #[default]
    Online,
    /// Do Not Disturb.
    Dnd,
    /// Away / Idle.
    Idle,
    /// Invisible (shown as offline).
    Invisible,
    /// Offline.
    Offline,
}
