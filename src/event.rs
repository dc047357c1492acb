//! Decoded dispatch events and synthetic state changes.
//!
//! The dispatch stream interleaves two kinds of items: events decoded from
//! `Dispatch` payloads, and [`StateChange`] values injected by the
//! reconnection supervisor so applications can observe connection health
//! without a side channel.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// An item on the dispatch stream.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Event {
    /// Received after a successful Identify.
    Ready(ReadyData),

    /// Received after a successful Resume.
    Resumed,

    /// Any other dispatch event, carried by name with its raw body.
    Dispatch {
        /// Event name as sent by the server (e.g. `MESSAGE_CREATE`).
        name: String,
        /// Raw event body.
        data: Value,
    },

    /// A supervisor-level connection state transition.
    State(StateChange),
}

impl Event {
    /// The state change carried by this item, if it is one.
    pub fn as_state(&self) -> Option<&StateChange> {
        match self {
            Event::State(change) => Some(change),
            _ => None,
        }
    }
}

/// Body of the READY dispatch event.
///
/// Only the session bookkeeping fields are modeled; the rest of the body
/// (user, guilds, application) belongs to the domain layer and stays in
/// `Event::Ready`'s raw form if needed.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyData {
    /// Gateway protocol version.
    #[serde(default)]
    pub v: u8,

    /// Session id for resuming.
    pub session_id: String,

    /// URL to prefer when resuming this session.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Connection state transitions surfaced on the dispatch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// A session reached Ready/Resumed with no preceding retries.
    Connected,

    /// The supervisor exited; no further connection attempts follow.
    Disconnected,

    /// The first retry of a streak was scheduled.
    RetryStarted {
        /// Delay before the next connection attempt.
        delay: Duration,
    },

    /// A subsequent connection attempt failed and another retry was scheduled.
    RetryFailed {
        /// The attempt number that just failed.
        attempt: u32,
        /// Delay before the next connection attempt.
        delay: Duration,
    },

    /// A retried connection attempt reached Ready/Resumed.
    RetrySucceeded {
        /// Number of failed attempts before this success.
        attempts: u32,
    },
}

/// Decode a dispatch payload body into an [`Event`] by event name.
///
/// Unknown names are not an error: the open set of domain events is carried
/// through as [`Event::Dispatch`].
pub fn parse_event(name: &str, data: Value) -> Result<Event, serde_json::Error> {
    match name {
        "READY" => {
            let ready: ReadyData = serde_json::from_value(data)?;
            Ok(Event::Ready(ready))
        }
        "RESUMED" => Ok(Event::Resumed),
        _ => Ok(Event::Dispatch {
            name: name.to_owned(),
            data,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ready_event() {
        let data = json!({
            "v": 10,
            "session_id": "abc123",
            "resume_gateway_url": "wss://gateway.example.com",
            "user": {"id": "123"}
        });

        match parse_event("READY", data).unwrap() {
            Event::Ready(ready) => {
                assert_eq!(ready.v, 10);
                assert_eq!(ready.session_id, "abc123");
                assert_eq!(
                    ready.resume_gateway_url.as_deref(),
                    Some("wss://gateway.example.com")
                );
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_resumed_event() {
        assert!(matches!(
            parse_event("RESUMED", Value::Null).unwrap(),
            Event::Resumed
        ));
    }

    #[test]
    fn test_unknown_event_passes_through() {
        let data = json!({"content": "hello"});
        match parse_event("MESSAGE_CREATE", data.clone()).unwrap() {
            Event::Dispatch { name, data: body } => {
                assert_eq!(name, "MESSAGE_CREATE");
                assert_eq!(body, data);
            }
            other => panic!("expected Dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_ready_without_session_id_is_error() {
        assert!(parse_event("READY", json!({"v": 10})).is_err());
    }
}
