//! Gateway client facade.
//!
//! [`GatewayClient`] owns the session state, the heartbeat timer, the retry
//! accounting, and the three streams the application sees: `dispatch()`
//! (decoded events plus state changes), `receiver()` (raw inbound
//! payloads), and `sender()` (outbound payload sink). `run()` wraps one
//! [`ConnectionRunner`] attempt after another in the retry policy until the
//! client is closed or a fatal error surfaces.

use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::GatewayError;
use crate::event::{Event, StateChange};
use crate::heartbeat::HeartbeatTimer;
use crate::payload::{GatewayPayload, IdentifyOptions};
use crate::retry::{RetryContext, RetryPolicy};
use crate::runner::ConnectionRunner;
use crate::session::{ConnectionStage, SessionState};
use crate::transport::{TungsteniteTransport, WsTransport};
use futures_util::{Stream, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

/// Bounded channel with drop-oldest overflow.
///
/// The producer side holds a receiver clone so that, when full, it can pop
/// the oldest item and push the new one; a consumer that falls behind loses
/// history, never the most recent item.
pub(crate) struct LatestChannel<T> {
    tx: flume::Sender<T>,
    rx: flume::Receiver<T>,
}

impl<T> LatestChannel<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub(crate) fn sender(&self) -> LatestSender<T> {
        LatestSender {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }

    pub(crate) fn subscribe(&self) -> flume::Receiver<T> {
        self.rx.clone()
    }
}

/// Producer handle for a [`LatestChannel`].
pub(crate) struct LatestSender<T> {
    tx: flume::Sender<T>,
    rx: flume::Receiver<T>,
}

impl<T> Clone for LatestSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> LatestSender<T> {
    /// Non-blocking send; evicts the oldest queued item under pressure.
    pub(crate) fn send(&self, item: T) {
        if let Err(flume::TrySendError::Full(item)) = self.tx.try_send(item) {
            let _ = self.rx.try_recv();
            let _ = self.tx.try_send(item);
        }
    }
}

/// What flows through the outbound command queue.
pub(crate) enum Command {
    /// Encode and write a payload.
    Send(GatewayPayload),

    /// End the current attempt. With `reconnect`, the supervisor starts a
    /// fresh (identifying) connection; without, it exits.
    Shutdown { reconnect: bool },
}

/// Serializing sink handle for outbound payloads.
///
/// Writes are non-blocking with drop-oldest overflow. A single logical
/// producer is assumed; concurrent callers must coordinate externally.
#[derive(Clone)]
pub struct CommandSender {
    inner: LatestSender<Command>,
}

impl CommandSender {
    /// Enqueue a payload for the wire.
    pub fn send(&self, payload: GatewayPayload) {
        self.inner.send(Command::Send(payload));
    }
}

/// Configuration for a [`GatewayClient`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Identity and resume hint.
    pub identify: IdentifyOptions,

    /// Reconnection backoff policy.
    pub retry: RetryPolicy,

    /// `User-Agent` sent during the WebSocket upgrade.
    pub user_agent: String,

    /// Enable zlib-stream transport compression.
    pub transport_compression: bool,

    /// How long to wait for Hello after the socket opens.
    pub hello_timeout: Duration,

    /// Capacity of each facade stream before drop-oldest kicks in.
    pub stream_capacity: usize,
}

impl GatewayConfig {
    /// Create a configuration with defaults around the given identity.
    pub fn new(identify: IdentifyOptions) -> Self {
        Self {
            identify,
            retry: RetryPolicy::default(),
            user_agent: concat!("basalt-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
            transport_compression: false,
            hello_timeout: Duration::from_secs(10),
            stream_capacity: 256,
        }
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enable zlib-stream transport compression.
    pub fn with_transport_compression(mut self, enabled: bool) -> Self {
        self.transport_compression = enabled;
        self
    }

    /// Set the Hello timeout.
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }
}

/// Persistent, self-healing gateway client.
///
/// One logical session, arbitrarily many transport connections. See the
/// crate docs for the full lifecycle.
pub struct GatewayClient<T = TungsteniteTransport, C = JsonCodec> {
    config: GatewayConfig,
    transport: T,
    codec: C,

    session: SessionState,
    timer: HeartbeatTimer,
    retry: RetryContext,

    commands: LatestChannel<Command>,
    events: LatestChannel<Event>,
    raw: LatestChannel<GatewayPayload>,

    closed: AtomicBool,
    resume_seeded: AtomicBool,
}

impl GatewayClient {
    /// Create a client with the default transport and JSON codec.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_parts(config, TungsteniteTransport, JsonCodec)
    }
}

impl<T: WsTransport, C: PayloadCodec> GatewayClient<T, C> {
    /// Create a client with a custom transport and codec.
    pub fn with_parts(config: GatewayConfig, transport: T, codec: C) -> Self {
        let capacity = config.stream_capacity;
        Self {
            config,
            transport,
            codec,
            session: SessionState::new(),
            timer: HeartbeatTimer::new(),
            retry: RetryContext::new(),
            commands: LatestChannel::new(capacity),
            events: LatestChannel::new(capacity),
            raw: LatestChannel::new(capacity),
            closed: AtomicBool::new(false),
            resume_seeded: AtomicBool::new(false),
        }
    }

    /// Run the reconnection supervisor until the client is closed or a
    /// fatal error surfaces.
    pub async fn run(&self, url: &str) -> Result<(), GatewayError> {
        let base = Url::parse(url)?;
        self.seed_resume_hint();

        loop {
            let runner = ConnectionRunner {
                transport: &self.transport,
                codec: &self.codec,
                config: &self.config,
                session: &self.session,
                timer: &self.timer,
                retry: &self.retry,
                command_rx: self.commands.subscribe(),
                commands: self.commands.sender(),
                events: self.events.sender(),
                raw: self.raw.sender(),
            };

            let err = match runner.run(&base).await {
                Ok(()) => {
                    info!("gateway client closed");
                    return self.finish(Ok(()));
                }
                Err(err) => err,
            };

            if err.is_fatal() || !self.config.retry.should_retry(&err) {
                error!(error = %err, "gateway connection failed fatally");
                return self.finish(Err(err));
            }

            if let GatewayError::InvalidSession { resumable: false } = err {
                self.session.invalidate();
            }

            let attempt = self.retry.next();
            if self.config.retry.exhausted(attempt) {
                let err = GatewayError::RetriesExhausted {
                    attempts: attempt - 1,
                };
                error!(error = %err, "giving up on the gateway");
                return self.finish(Err(err));
            }

            let delay = self.retry_delay(&err, attempt);
            warn!(
                error = %err,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "connection attempt failed, retrying"
            );

            let change = if attempt == 1 {
                StateChange::RetryStarted { delay }
            } else {
                StateChange::RetryFailed { attempt, delay }
            };
            self.events.sender().send(Event::State(change));
            self.session.set_stage(ConnectionStage::Reconnecting);

            tokio::time::sleep(delay).await;

            if self.closed.load(Ordering::SeqCst) {
                return self.finish(Ok(()));
            }
        }
    }

    /// Stream of decoded [`Event`]s, including synthetic state changes.
    /// Overflow drops the oldest items.
    pub fn dispatch(&self) -> flume::Receiver<Event> {
        self.events.subscribe()
    }

    /// Stream of raw inbound payloads in network-arrival order. Overflow
    /// drops the oldest items.
    pub fn receiver(&self) -> flume::Receiver<GatewayPayload> {
        self.raw.subscribe()
    }

    /// Sink for outbound payloads.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            inner: self.commands.sender(),
        }
    }

    /// Forward every payload of a stream into the sender sink.
    pub async fn send<S>(&self, mut payloads: S)
    where
        S: Stream<Item = GatewayPayload> + Unpin,
    {
        let sender = self.sender();
        while let Some(payload) = payloads.next().await {
            sender.send(payload);
        }
    }

    /// Close the client.
    ///
    /// With `reconnect`, the current session is abandoned and the
    /// supervisor opens a fresh, identifying connection. Without, the
    /// supervisor exits; further calls are no-ops.
    pub fn close(&self, reconnect: bool) {
        if reconnect {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            self.session.set_resumable(false);
            self.commands
                .sender()
                .send(Command::Shutdown { reconnect: true });
        } else if !self.closed.swap(true, Ordering::SeqCst) {
            self.commands
                .sender()
                .send(Command::Shutdown { reconnect: false });
        }
    }

    /// Current session id; empty until the first Ready.
    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    /// Last observed dispatch sequence.
    ///
    /// Together with [`session_id`](Self::session_id), this is what a
    /// caller persists to resume after a restart.
    pub fn sequence(&self) -> Option<i64> {
        self.session.sequence()
    }

    /// Round-trip time of the last acknowledged heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        self.timer.latency()
    }

    /// Current connection lifecycle stage.
    pub fn stage(&self) -> ConnectionStage {
        self.session.stage()
    }

    fn finish(&self, result: Result<(), GatewayError>) -> Result<(), GatewayError> {
        self.session.set_stage(ConnectionStage::Disconnected);
        self.events
            .sender()
            .send(Event::State(StateChange::Disconnected));
        result
    }

    fn retry_delay(&self, err: &GatewayError, attempt: u32) -> Duration {
        match err {
            // Both sides asked for an immediate fresh start.
            GatewayError::ServerReconnect | GatewayError::ReconnectRequested => Duration::ZERO,
            // The server wants identifying clients to spread out.
            GatewayError::InvalidSession { resumable: false } => {
                Duration::from_millis(rand::rng().random_range(1_000..=5_000))
            }
            _ => self.config.retry.next_delay(attempt),
        }
    }

    /// Apply the caller-supplied resume hint once, before the first
    /// attempt.
    fn seed_resume_hint(&self) {
        if self.resume_seeded.swap(true, Ordering::SeqCst) {
            return;
        }
        let identify = &self.config.identify;
        if let (Some(id), Some(seq)) = (&identify.resume_session_id, identify.resume_sequence) {
            info!(session_id = %id, seq, "seeding resume hint");
            self.session.set_session(id, None);
            self.session.observe_sequence(seq);
            self.session.set_resumable(true);
        }
    }
}
