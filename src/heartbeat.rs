//! Heartbeat timer.
//!
//! A resettable periodic tick source plus the ack/latency bookkeeping that
//! goes with it. Ticks are produced by a generation-guarded background task:
//! `stop`/`reset` bump the generation under the lock and drain the channel,
//! so once either returns no stale tick can reach a consumer.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Sentinel for "no round trip measured yet".
const NO_RTT: u64 = u64::MAX;

#[derive(Debug)]
struct TimerInner {
    generation: u64,
    period: Duration,
}

/// Resettable periodic tick source.
///
/// At most one tick is ever pending: a consumer that falls behind sees
/// ticks coalesce rather than pile up, which keeps heartbeats at-most-once
/// per tick.
#[derive(Debug)]
pub struct HeartbeatTimer {
    inner: Arc<Mutex<TimerInner>>,
    tick_tx: flume::Sender<()>,
    tick_rx: flume::Receiver<()>,

    ack_received: AtomicBool,
    last_sent: RwLock<Instant>,
    last_rtt_ms: AtomicU64,
}

impl HeartbeatTimer {
    pub fn new() -> Self {
        let (tick_tx, tick_rx) = flume::bounded(1);
        Self {
            inner: Arc::new(Mutex::new(TimerInner {
                generation: 0,
                period: Duration::ZERO,
            })),
            tick_tx,
            tick_rx,
            ack_received: AtomicBool::new(true),
            last_sent: RwLock::new(Instant::now()),
            last_rtt_ms: AtomicU64::new(NO_RTT),
        }
    }

    /// Begin emitting ticks every `period`, the first one a full `period`
    /// from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, period: Duration) {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.period = period;
            inner.generation
        };
        self.spawn_ticker(generation, period);
    }

    /// Cease emission. Idempotent; no tick is observable after this
    /// returns.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.period = Duration::ZERO;
        while self.tick_rx.try_recv().is_ok() {}
    }

    /// Stop, then start with a new period, atomically. The next tick is no
    /// earlier than now + `period`.
    pub fn reset(&self, period: Duration) {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.period = period;
            while self.tick_rx.try_recv().is_ok() {}
            inner.generation
        };
        self.spawn_ticker(generation, period);
    }

    /// The tick stream. A single consumer is assumed.
    pub fn ticks(&self) -> flume::Receiver<()> {
        self.tick_rx.clone()
    }

    /// Currently configured period; zero while stopped.
    pub fn period(&self) -> Duration {
        self.inner.lock().period
    }

    fn spawn_ticker(&self, generation: u64, period: Duration) {
        let inner = Arc::clone(&self.inner);
        let tick_tx = self.tick_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                // Emission is checked and performed under the lock so that
                // stop()/reset() callers never race a stale tick.
                let guard = inner.lock();
                if guard.generation != generation {
                    return;
                }
                let _ = tick_tx.try_send(());
            }
        });
    }

    /// Note that a heartbeat went out; clears the ack flag and stamps the
    /// round-trip clock.
    pub fn mark_sent(&self) {
        self.ack_received.store(false, Ordering::SeqCst);
        *self.last_sent.write() = Instant::now();
    }

    /// Note that the server acknowledged the outstanding heartbeat.
    pub fn mark_acked(&self) {
        let rtt = self.last_sent.read().elapsed();
        self.ack_received.store(true, Ordering::SeqCst);
        self.last_rtt_ms
            .store(rtt.as_millis() as u64, Ordering::Release);
    }

    /// Whether the most recent heartbeat has been acknowledged.
    pub fn is_acked(&self) -> bool {
        self.ack_received.load(Ordering::SeqCst)
    }

    /// Clear any outstanding-heartbeat state for a fresh connection.
    pub fn reset_ack(&self) {
        self.ack_received.store(true, Ordering::SeqCst);
        *self.last_sent.write() = Instant::now();
    }

    /// Round-trip time of the last acknowledged heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        match self.last_rtt_ms.load(Ordering::Acquire) {
            NO_RTT => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for HeartbeatTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let timer = HeartbeatTimer::new();
        let ticks = timer.ticks();
        timer.start(Duration::from_millis(100));
        tokio::task::yield_now().await;

        advance(Duration::from_millis(99)).await;
        assert!(ticks.try_recv().is_err(), "tick arrived early");

        advance(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert!(ticks.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_silences_ticks() {
        let timer = HeartbeatTimer::new();
        let ticks = timer.ticks();
        timer.start(Duration::from_millis(50));
        tokio::task::yield_now().await;

        advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(ticks.try_recv().is_ok());

        timer.stop();
        assert_eq!(timer.period(), Duration::ZERO);

        advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert!(ticks.try_recv().is_err());

        // Idempotent.
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_reschedules_from_now() {
        let timer = HeartbeatTimer::new();
        let ticks = timer.ticks();
        timer.start(Duration::from_millis(100));
        tokio::task::yield_now().await;

        advance(Duration::from_millis(90)).await;
        timer.reset(Duration::from_millis(100));
        tokio::task::yield_now().await;
        assert_eq!(timer.period(), Duration::from_millis(100));

        // The old schedule would have fired at t=100.
        advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        assert!(ticks.try_recv().is_err(), "tick earlier than reset + period");

        advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(ticks.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_coalesce() {
        let timer = HeartbeatTimer::new();
        let ticks = timer.ticks();
        timer.start(Duration::from_millis(10));
        tokio::task::yield_now().await;

        advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        let mut pending = 0;
        while ticks.try_recv().is_ok() {
            pending += 1;
        }
        assert!(pending <= 1, "ticks piled up: {pending}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_and_latency_tracking() {
        let timer = HeartbeatTimer::new();
        assert!(timer.is_acked());
        assert_eq!(timer.latency(), None);

        timer.mark_sent();
        assert!(!timer.is_acked());

        advance(Duration::from_millis(30)).await;
        timer.mark_acked();
        assert!(timer.is_acked());
        assert_eq!(timer.latency(), Some(Duration::from_millis(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_stream_stays_open_across_restart() {
        let timer = HeartbeatTimer::new();
        let ticks = timer.ticks();

        timer.start(Duration::from_millis(10));
        timer.stop();
        timer.start(Duration::from_millis(10));
        tokio::task::yield_now().await;

        advance(Duration::from_millis(11)).await;
        let tick = timeout(Duration::from_secs(1), ticks.recv_async()).await;
        assert!(tick.is_ok());
    }
}
