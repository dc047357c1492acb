//! Payload serialization seam.
//!
//! The connection runner never touches `serde_json` directly; it goes
//! through a [`PayloadCodec`] so the wire format can be swapped (or frames
//! captured) without touching the state machine.

use crate::error::GatewayError;
use crate::payload::GatewayPayload;

/// Encodes and decodes [`GatewayPayload`] envelopes.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Decode a single frame.
    ///
    /// Fails on empty, truncated, or otherwise malformed input and on
    /// unassigned opcodes. Decode failures are per-frame: the caller logs
    /// and drops the frame without tearing the connection down.
    fn decode(&self, bytes: &[u8]) -> Result<GatewayPayload, GatewayError>;

    /// Encode a payload into its wire form.
    fn encode(&self, payload: &GatewayPayload) -> Result<String, GatewayError>;
}

/// The default JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<GatewayPayload, GatewayError> {
        if bytes.is_empty() {
            return Err(GatewayError::PayloadDecode("empty frame".to_string()));
        }
        serde_json::from_slice(bytes).map_err(GatewayError::from)
    }

    fn encode(&self, payload: &GatewayPayload) -> Result<String, GatewayError> {
        serde_json::to_string(payload).map_err(GatewayError::from)
    }
}
