//! Session bookkeeping.
//!
//! [`SessionState`] is the record that survives transport connections: the
//! resume sequence, the session id, whether the next attempt should RESUME
//! rather than IDENTIFY, and the liveness clock fed by heartbeat ACKs.
//!
//! Each field is independently atomic. Cross-field invariants (resumable
//! implies a session id and a sequence) are re-established at the
//! serialization points of the protocol: after Ready, after Resumed, and
//! before a fresh Identify.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Sentinel for "no sequence observed yet".
const NO_SEQUENCE: i64 = -1;

/// Connection lifecycle stage, observable from the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStage {
    /// Not running.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected, waiting for Hello.
    Handshaking,
    /// Sent Identify, waiting for Ready.
    Identifying,
    /// Sent Resume, waiting for Resumed.
    Resuming,
    /// Fully connected and receiving events.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Shutting down.
    Disconnecting,
}

/// Process-local session record shared by the facade, the runner, and the
/// payload dispatcher.
#[derive(Debug)]
pub struct SessionState {
    /// Last sequence observed on a Dispatch payload.
    sequence: AtomicI64,

    /// Session id from Ready; empty until the first Ready.
    session_id: RwLock<String>,

    /// URL to prefer when resuming, if the server advertised one.
    resume_url: RwLock<Option<String>>,

    /// Whether the next connection attempt should send Resume.
    resumable: AtomicBool,

    /// Instant of the most recent heartbeat ACK (or connection start).
    last_ack: RwLock<Instant>,

    /// Current lifecycle stage.
    stage: RwLock<ConnectionStage>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            sequence: AtomicI64::new(NO_SEQUENCE),
            session_id: RwLock::new(String::new()),
            resume_url: RwLock::new(None),
            resumable: AtomicBool::new(false),
            last_ack: RwLock::new(Instant::now()),
            stage: RwLock::new(ConnectionStage::Disconnected),
        }
    }

    /// Last observed sequence, if any Dispatch has been seen.
    pub fn sequence(&self) -> Option<i64> {
        match self.sequence.load(Ordering::SeqCst) {
            NO_SEQUENCE => None,
            seq => Some(seq),
        }
    }

    /// Record a sequence observed on a Dispatch payload.
    ///
    /// Sequences only move forward; a replayed or out-of-order payload
    /// never regresses the resume point.
    pub fn observe_sequence(&self, seq: i64) {
        self.sequence.fetch_max(seq, Ordering::SeqCst);
    }

    /// Session id, empty until the first Ready.
    pub fn session_id(&self) -> String {
        self.session_id.read().clone()
    }

    /// Store the session identity delivered by Ready.
    pub fn set_session(&self, session_id: &str, resume_url: Option<String>) {
        *self.session_id.write() = session_id.to_owned();
        *self.resume_url.write() = resume_url;
    }

    /// URL to prefer for the next resume attempt.
    pub fn resume_url(&self) -> Option<String> {
        self.resume_url.read().clone()
    }

    /// Whether the next attempt should RESUME.
    pub fn resumable(&self) -> bool {
        self.resumable.load(Ordering::SeqCst)
    }

    pub fn set_resumable(&self, resumable: bool) {
        self.resumable.store(resumable, Ordering::SeqCst);
    }

    /// Whether a resume is actually possible: the flag is set and both the
    /// session id and a sequence exist to resume from.
    pub fn can_resume(&self) -> bool {
        self.resumable() && !self.session_id.read().is_empty() && self.sequence().is_some()
    }

    /// Forget the session entirely. Used for InvalidSession(resumable=false):
    /// the next attempt must Identify from scratch.
    pub fn invalidate(&self) {
        self.resumable.store(false, Ordering::SeqCst);
        self.sequence.store(NO_SEQUENCE, Ordering::SeqCst);
        *self.session_id.write() = String::new();
        *self.resume_url.write() = None;
    }

    /// Re-arm the liveness clock (connection start, Hello, HeartbeatAck).
    pub fn mark_ack(&self) {
        *self.last_ack.write() = Instant::now();
    }

    /// Time since the liveness clock was last re-armed.
    pub fn last_ack_elapsed(&self) -> Duration {
        self.last_ack.read().elapsed()
    }

    pub fn stage(&self) -> ConnectionStage {
        *self.stage.read()
    }

    pub fn set_stage(&self, stage: ConnectionStage) {
        *self.stage.write() = stage;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_starts_absent() {
        let state = SessionState::new();
        assert_eq!(state.sequence(), None);
    }

    #[test]
    fn test_sequence_only_moves_forward() {
        let state = SessionState::new();
        state.observe_sequence(7);
        state.observe_sequence(9);
        state.observe_sequence(8);
        assert_eq!(state.sequence(), Some(9));
    }

    #[test]
    fn test_can_resume_requires_all_parts() {
        let state = SessionState::new();
        assert!(!state.can_resume());

        state.set_resumable(true);
        assert!(!state.can_resume(), "no session id or sequence yet");

        state.set_session("abc", None);
        assert!(!state.can_resume(), "no sequence yet");

        state.observe_sequence(100);
        assert!(state.can_resume());
    }

    #[test]
    fn test_invalidate_clears_everything() {
        let state = SessionState::new();
        state.set_session("abc", Some("wss://resume.example".into()));
        state.observe_sequence(100);
        state.set_resumable(true);

        state.invalidate();
        assert!(!state.resumable());
        assert_eq!(state.session_id(), "");
        assert_eq!(state.sequence(), None);
        assert_eq!(state.resume_url(), None);
    }
}
