//! One connection attempt, end to end.
//!
//! The runner opens a transport session and multiplexes its arms in a
//! single `select!` loop: inbound frames through codec and dispatcher,
//! outbound commands through the codec onto the wire, heartbeat ticks with
//! zombie detection, and a Hello deadline. Whatever arm terminates first
//! unwinds the whole attempt; the heartbeat timer is stopped
//! unconditionally on the way out.
//!
//! An attempt returns `Ok` only when the facade asked for a non-reconnect
//! close. Every other outcome is an error the supervisor classifies.

use crate::client::{Command, GatewayConfig, LatestSender};
use crate::codec::PayloadCodec;
use crate::compression::ZlibDecompressor;
use crate::dispatcher::{dispatch, DispatchContext, Directive};
use crate::error::{CloseCode, GatewayError};
use crate::event::Event;
use crate::heartbeat::HeartbeatTimer;
use crate::opcode::OpCode;
use crate::payload::GatewayPayload;
use crate::retry::RetryContext;
use crate::session::{ConnectionStage, SessionState};
use crate::transport::{WsFrame, WsSession, WsTransport};
use crate::GATEWAY_VERSION;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Drives a single transport attempt against borrowed client state.
pub(crate) struct ConnectionRunner<'a, T, C> {
    pub transport: &'a T,
    pub codec: &'a C,
    pub config: &'a GatewayConfig,
    pub session: &'a SessionState,
    pub timer: &'a HeartbeatTimer,
    pub retry: &'a RetryContext,
    pub command_rx: flume::Receiver<Command>,
    pub commands: LatestSender<Command>,
    pub events: LatestSender<Event>,
    pub raw: LatestSender<GatewayPayload>,
}

impl<T: WsTransport, C: PayloadCodec> ConnectionRunner<'_, T, C> {
    /// Run one attempt to completion.
    pub async fn run(&self, base_url: &Url) -> Result<(), GatewayError> {
        let url = self.attempt_url(base_url);

        info!(url = %url, "connecting to gateway");
        self.session.set_stage(ConnectionStage::Connecting);

        let ws = self
            .transport
            .connect(&url, &self.config.user_agent)
            .await?;

        debug!("transport session open, awaiting Hello");
        self.session.set_stage(ConnectionStage::Handshaking);
        self.session.mark_ack();
        self.timer.reset_ack();

        let mut decompressor = self
            .config
            .transport_compression
            .then(ZlibDecompressor::new);

        // The guard stops the timer on every exit path, including the run
        // future being dropped mid-attempt.
        let _stop_timer = TimerStopGuard(self.timer);
        self.drive(&ws, decompressor.as_mut()).await
    }

    /// The URL for this attempt: the server-advertised resume URL when the
    /// attempt will resume, the configured one otherwise, decorated with
    /// the protocol query parameters.
    fn attempt_url(&self, base: &Url) -> Url {
        let mut url = if self.session.can_resume() {
            self.session
                .resume_url()
                .and_then(|u| Url::parse(&u).ok())
                .unwrap_or_else(|| base.clone())
        } else {
            base.clone()
        };

        url.query_pairs_mut()
            .append_pair("v", &GATEWAY_VERSION.to_string())
            .append_pair("encoding", "json");
        if self.config.transport_compression {
            url.query_pairs_mut().append_pair("compress", "zlib-stream");
        }
        url
    }

    async fn drive(
        &self,
        ws: &WsSession,
        mut decompressor: Option<&mut ZlibDecompressor>,
    ) -> Result<(), GatewayError> {
        let ticks = self.timer.ticks();
        let hello_deadline = tokio::time::Instant::now() + self.config.hello_timeout;
        let mut hello_seen = false;

        loop {
            tokio::select! {
                frame = ws.recv() => match frame {
                    None => {
                        return Err(GatewayError::Transport(
                            "connection ended without a close frame".to_string(),
                        ));
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(WsFrame::Close { code, reason })) => {
                        warn!(code, reason = %reason, "server closed the connection");
                        return Err(classify_close(code, reason));
                    }
                    Some(Ok(WsFrame::Text(text))) => {
                        self.handle_frame(text.as_bytes(), &mut hello_seen)?;
                    }
                    Some(Ok(WsFrame::Binary(data))) => {
                        if let Some(inflate) = decompressor.as_deref_mut() {
                            if let Some(message) = inflate.push(&data)? {
                                self.handle_frame(message, &mut hello_seen)?;
                            }
                        } else {
                            self.handle_frame(&data, &mut hello_seen)?;
                        }
                    }
                },

                command = self.command_rx.recv_async() => match command {
                    Ok(Command::Send(payload)) => {
                        let is_heartbeat = payload.op == OpCode::Heartbeat;
                        let text = self.codec.encode(&payload)?;
                        trace!(opcode = ?payload.op, "sending payload");
                        ws.send(WsFrame::Text(text)).await?;
                        if is_heartbeat {
                            self.timer.mark_sent();
                        }
                    }
                    Ok(Command::Shutdown { reconnect }) => {
                        info!(reconnect, "close requested");
                        self.session.set_stage(ConnectionStage::Disconnecting);
                        let _ = ws
                            .send(WsFrame::Close {
                                code: 1000,
                                reason: String::new(),
                            })
                            .await;
                        if reconnect {
                            self.session.set_resumable(false);
                            return Err(GatewayError::ReconnectRequested);
                        }
                        return Ok(());
                    }
                    Err(_) => {
                        return Err(GatewayError::Transport(
                            "command channel closed".to_string(),
                        ));
                    }
                },

                tick = ticks.recv_async() => match tick {
                    Ok(()) => {
                        if !self.timer.is_acked()
                            && self.session.last_ack_elapsed() > self.timer.period()
                        {
                            error!("no heartbeat ACK within the interval, assuming zombie connection");
                            return Err(GatewayError::ZombieConnection);
                        }
                        let payload = GatewayPayload::heartbeat(self.session.sequence());
                        let text = self.codec.encode(&payload)?;
                        ws.send(WsFrame::Text(text)).await?;
                        self.timer.mark_sent();
                        trace!(seq = ?self.session.sequence(), "heartbeat sent");
                    }
                    Err(_) => {
                        return Err(GatewayError::Transport(
                            "heartbeat tick channel closed".to_string(),
                        ));
                    }
                },

                _ = tokio::time::sleep_until(hello_deadline), if !hello_seen => {
                    return Err(GatewayError::Transport(
                        "timed out waiting for Hello".to_string(),
                    ));
                }
            }
        }
    }

    /// Decode and dispatch one frame.
    ///
    /// Decode failures and dispatcher rejections are logged and dropped;
    /// only teardown directives become errors.
    fn handle_frame(&self, bytes: &[u8], hello_seen: &mut bool) -> Result<(), GatewayError> {
        let payload = match self.codec.decode(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return Ok(());
            }
        };

        if payload.op == OpCode::Hello {
            *hello_seen = true;
        }

        // Raw payloads are published in arrival order, before any side
        // effects of dispatching them.
        self.raw.send(payload.clone());

        let ctx = DispatchContext {
            session: self.session,
            timer: self.timer,
            retry: self.retry,
            identify: &self.config.identify,
            commands: self.commands.clone(),
            events: self.events.clone(),
        };

        match dispatch(&payload, &ctx) {
            Ok(Directive::Continue) => Ok(()),
            Ok(Directive::Reconnect) => Err(GatewayError::ServerReconnect),
            Ok(Directive::InvalidSession { resumable }) => {
                Err(GatewayError::InvalidSession { resumable })
            }
            Err(e) => {
                warn!(error = %e, opcode = ?payload.op, "dropping payload the dispatcher rejected");
                Ok(())
            }
        }
    }
}

struct TimerStopGuard<'a>(&'a HeartbeatTimer);

impl Drop for TimerStopGuard<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Map a server close frame onto the error taxonomy.
fn classify_close(code: u16, reason: String) -> GatewayError {
    if CloseCode::from_code(code) == Some(CloseCode::AuthenticationFailed) {
        let reason = if reason.is_empty() {
            "invalid token".to_string()
        } else {
            reason
        };
        return GatewayError::AuthenticationFailed(reason);
    }
    GatewayError::Closed { code, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_close() {
        assert!(matches!(
            classify_close(4004, String::new()),
            GatewayError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            classify_close(1000, "bye".to_string()),
            GatewayError::Closed { code: 1000, .. }
        ));
        assert!(matches!(
            classify_close(4013, String::new()),
            GatewayError::Closed { code: 4013, .. }
        ));
    }
}
