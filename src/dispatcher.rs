//! Per-opcode payload handling.
//!
//! [`dispatch`] is a pure function of `(payload, context)`: it mutates
//! session state, feeds the outbound command queue and the dispatch stream,
//! and tells the runner whether to keep going or tear the attempt down. The
//! context is a bundle of borrows taken at the moment of handling; nothing
//! here holds a reference back to the client.

use crate::client::{Command, LatestSender};
use crate::error::GatewayError;
use crate::event::{parse_event, Event, StateChange};
use crate::heartbeat::HeartbeatTimer;
use crate::opcode::OpCode;
use crate::payload::{GatewayPayload, HelloData, IdentifyOptions};
use crate::retry::RetryContext;
use crate::session::{ConnectionStage, SessionState};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// What the runner should do after a payload was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
    /// Keep the connection running.
    Continue,

    /// Server requested a reconnect (opcode 7); tear down and resume.
    Reconnect,

    /// Server invalidated the session (opcode 9); tear down.
    InvalidSession {
        /// Whether the session survives for a resume.
        resumable: bool,
    },
}

/// Borrows the dispatcher needs for one payload.
pub(crate) struct DispatchContext<'a> {
    pub session: &'a SessionState,
    pub timer: &'a HeartbeatTimer,
    pub retry: &'a RetryContext,
    pub identify: &'a IdentifyOptions,
    pub commands: LatestSender<Command>,
    pub events: LatestSender<Event>,
}

/// Route one inbound payload to its opcode handler.
pub(crate) fn dispatch(
    payload: &GatewayPayload,
    ctx: &DispatchContext<'_>,
) -> Result<Directive, GatewayError> {
    match payload.op {
        OpCode::Hello => on_hello(payload, ctx),
        OpCode::Heartbeat => on_heartbeat_request(ctx),
        OpCode::HeartbeatAck => on_heartbeat_ack(ctx),
        OpCode::Dispatch => on_dispatch(payload, ctx),
        OpCode::Reconnect => {
            info!("server requested reconnect");
            Ok(Directive::Reconnect)
        }
        OpCode::InvalidSession => on_invalid_session(payload, ctx),
        other => {
            trace!(opcode = ?other, "ignoring send-only opcode from server");
            Ok(Directive::Continue)
        }
    }
}

/// Hello: start heartbeating at the server-dictated interval, then open the
/// session with Resume when possible and Identify otherwise.
fn on_hello(
    payload: &GatewayPayload,
    ctx: &DispatchContext<'_>,
) -> Result<Directive, GatewayError> {
    let body = payload
        .d
        .clone()
        .ok_or_else(|| GatewayError::PayloadDecode("Hello without body".to_string()))?;
    let hello: HelloData = serde_json::from_value(body)?;
    let interval = Duration::from_millis(hello.heartbeat_interval);

    debug!(interval_ms = hello.heartbeat_interval, "received Hello");
    ctx.session.mark_ack();
    ctx.timer.reset_ack();
    ctx.timer.start(interval);

    match ctx.session.sequence() {
        Some(seq) if ctx.session.can_resume() => {
            let session_id = ctx.session.session_id();
            info!(session_id = %session_id, seq, "resuming session");
            ctx.session.set_stage(ConnectionStage::Resuming);
            ctx.commands.send(Command::Send(GatewayPayload::resume(
                ctx.identify,
                &session_id,
                seq,
            )?));
        }
        _ => {
            ctx.session.set_resumable(false);
            info!("identifying");
            ctx.session.set_stage(ConnectionStage::Identifying);
            ctx.commands
                .send(Command::Send(GatewayPayload::identify(ctx.identify)?));
        }
    }

    Ok(Directive::Continue)
}

/// Server-initiated heartbeat request: answer out of cycle.
fn on_heartbeat_request(ctx: &DispatchContext<'_>) -> Result<Directive, GatewayError> {
    debug!("server requested heartbeat");
    ctx.commands
        .send(Command::Send(GatewayPayload::heartbeat(
            ctx.session.sequence(),
        )));
    Ok(Directive::Continue)
}

fn on_heartbeat_ack(ctx: &DispatchContext<'_>) -> Result<Directive, GatewayError> {
    ctx.session.mark_ack();
    ctx.timer.mark_acked();
    trace!(rtt = ?ctx.timer.latency(), "heartbeat acknowledged");
    Ok(Directive::Continue)
}

/// Dispatch: apply the sequence, decode by event name, deliver.
///
/// The sequence is applied before the event reaches the dispatch stream, so
/// a consumer persisting `(session_id, sequence)` on each event never
/// records a sequence behind what it has seen.
fn on_dispatch(
    payload: &GatewayPayload,
    ctx: &DispatchContext<'_>,
) -> Result<Directive, GatewayError> {
    if let Some(seq) = payload.s {
        ctx.session.observe_sequence(seq);
    }

    let name = payload
        .t
        .as_deref()
        .ok_or_else(|| GatewayError::PayloadDecode("Dispatch without event name".to_string()))?;
    let data = payload.d.clone().unwrap_or(Value::Null);
    let event = parse_event(name, data)?;

    match &event {
        Event::Ready(ready) => {
            info!(session_id = %ready.session_id, "session ready");
            ctx.session
                .set_session(&ready.session_id, ready.resume_gateway_url.clone());
            ctx.events.send(event.clone());
            complete_handshake(ctx);
        }
        Event::Resumed => {
            info!(session_id = %ctx.session.session_id(), "session resumed");
            ctx.events.send(Event::Resumed);
            complete_handshake(ctx);
        }
        _ => {
            trace!(event = name, "dispatching event");
            ctx.events.send(event);
        }
    }

    Ok(Directive::Continue)
}

/// Shared Ready/Resumed bookkeeping: the session is resumable from here on,
/// and the retry streak (if any) is over.
fn complete_handshake(ctx: &DispatchContext<'_>) {
    ctx.session.set_resumable(true);
    ctx.session.set_stage(ConnectionStage::Connected);

    let attempts = ctx.retry.attempts();
    let change = if attempts > 0 {
        StateChange::RetrySucceeded { attempts }
    } else {
        StateChange::Connected
    };
    ctx.retry.reset();
    ctx.events.send(Event::State(change));
}

fn on_invalid_session(
    payload: &GatewayPayload,
    ctx: &DispatchContext<'_>,
) -> Result<Directive, GatewayError> {
    let resumable = payload.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
    warn!(
        resumable,
        session_id = %ctx.session.session_id(),
        "session invalidated"
    );
    Ok(Directive::InvalidSession { resumable })
}
