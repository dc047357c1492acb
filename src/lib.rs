//! Basalt Gateway - self-healing Discord Gateway WebSocket client
#![deny(unsafe_code)]
//!
//! This crate maintains a single logical Gateway session across arbitrarily
//! many underlying WebSocket connections, and exposes it to the application
//! as three streams: decoded dispatch events (with synthetic connection
//! state changes folded in), raw inbound payloads, and an outbound payload
//! sink.
//!
//! # What it handles
//!
//! - The Hello / Identify / Ready handshake, and Resume instead of Identify
//!   whenever the previous session is still valid
//! - Heartbeating at the server-dictated interval, with zombie-connection
//!   detection when ACKs stop coming
//! - Sequence and session-id bookkeeping so sessions resume instead of
//!   replaying from scratch
//! - Reconnection with jittered exponential backoff, close-code
//!   classification, and observable retry transitions
//!
//! Payload encoding ([`PayloadCodec`]) and the WebSocket itself
//! ([`WsTransport`]) are seams: the defaults speak JSON over
//! tokio-tungstenite, and tests swap in scripted implementations.
//!
//! # Example
//!
//! ```ignore
//! use basalt_gateway::{Event, GatewayClient, GatewayConfig, IdentifyOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::new(IdentifyOptions::new("your-token"));
//!     let client = GatewayClient::new(config);
//!
//!     let events = client.dispatch();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv_async().await {
//!             if let Event::Dispatch { name, .. } = event {
//!                 println!("event: {name}");
//!             }
//!         }
//!     });
//!
//!     client.run("wss://gateway.discord.gg").await?;
//!     Ok(())
//! }
//! ```

mod client;
mod codec;
mod compression;
mod dispatcher;
pub mod error;
pub mod event;
mod heartbeat;
mod opcode;
mod payload;
mod retry;
mod runner;
mod session;
mod transport;

// Public re-exports
pub use client::{CommandSender, GatewayClient, GatewayConfig};
pub use codec::{JsonCodec, PayloadCodec};
pub use compression::ZlibDecompressor;
pub use error::{CloseCode, GatewayError};
pub use event::{Event, ReadyData, StateChange};
pub use heartbeat::HeartbeatTimer;
pub use opcode::OpCode;
pub use payload::{
    Activity, ActivityType, ConnectionProperties, GatewayPayload, HelloData, IdentifyOptions,
    PresenceUpdate, Status,
};
pub use retry::{RetryContext, RetryPolicy};
pub use session::{ConnectionStage, SessionState};
pub use transport::{TungsteniteTransport, WsFrame, WsSession, WsTransport};

/// Gateway protocol version requested on connect.
pub const GATEWAY_VERSION: u8 = 10;
