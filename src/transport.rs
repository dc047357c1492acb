//! WebSocket transport seam.
//!
//! The connection runner speaks to the network through [`WsTransport`],
//! which hands back a [`WsSession`]: an inbound frame stream and an
//! outbound frame sink backed by a channel pair. Closing either side closes
//! both. The default implementation bridges a tokio-tungstenite socket;
//! tests substitute scripted sessions.

use crate::error::GatewayError;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace};
use url::Url;

/// Frames a session carries after WebSocket protocol plumbing
/// (ping/pong, fragmentation) has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    /// A text frame.
    Text(String),

    /// A binary frame.
    Binary(Vec<u8>),

    /// The peer closed the connection. Terminal.
    Close {
        /// WebSocket close code (0 when none was sent).
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// One live WebSocket connection.
///
/// Dropping the session closes the socket; the socket closing ends the
/// inbound stream.
pub struct WsSession {
    frames: flume::Receiver<Result<WsFrame, GatewayError>>,
    sink: flume::Sender<WsFrame>,
}

impl WsSession {
    /// Assemble a session from its two channel ends.
    ///
    /// Intended for [`WsTransport`] implementations.
    pub fn new(
        frames: flume::Receiver<Result<WsFrame, GatewayError>>,
        sink: flume::Sender<WsFrame>,
    ) -> Self {
        Self { frames, sink }
    }

    /// Receive the next inbound frame. `None` means the connection ended
    /// without a close frame.
    pub async fn recv(&self) -> Option<Result<WsFrame, GatewayError>> {
        self.frames.recv_async().await.ok()
    }

    /// Send an outbound frame.
    pub async fn send(&self, frame: WsFrame) -> Result<(), GatewayError> {
        self.sink.send_async(frame).await.map_err(GatewayError::from)
    }
}

/// Capability of opening WebSocket connections.
pub trait WsTransport: Send + Sync + 'static {
    /// Open a connection to `url`, advertising `user_agent` during the
    /// HTTP upgrade.
    fn connect(
        &self,
        url: &Url,
        user_agent: &str,
    ) -> impl Future<Output = Result<WsSession, GatewayError>> + Send;
}

/// Internal buffer size for each direction of a bridged socket.
const FRAME_BUFFER: usize = 64;

/// The default transport, backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl WsTransport for TungsteniteTransport {
    async fn connect(&self, url: &Url, user_agent: &str) -> Result<WsSession, GatewayError> {
        let mut request = url.as_str().into_client_request()?;
        let agent = HeaderValue::from_str(user_agent)
            .map_err(|e| GatewayError::Transport(format!("invalid user agent: {e}")))?;
        request.headers_mut().insert(USER_AGENT, agent);

        let (mut socket, _response) = connect_async(request).await?;
        debug!(url = %url, "WebSocket connected");

        let (in_tx, in_rx) = flume::bounded(FRAME_BUFFER);
        let (out_tx, out_rx) = flume::bounded::<WsFrame>(FRAME_BUFFER);

        // Single pump task owning the socket: merges outbound frames and
        // inbound messages, answers pings, and tears everything down when
        // either direction ends.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = socket.next() => match message {
                        None => break,
                        Some(Ok(WsMessage::Text(text))) => {
                            if in_tx.send_async(Ok(WsFrame::Text(text.to_string()))).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            if in_tx.send_async(Ok(WsFrame::Binary(data.to_vec()))).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            trace!("answering WebSocket ping");
                            if socket.send(WsMessage::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                        Some(Ok(WsMessage::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f: CloseFrame| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((0, String::new()));
                            let _ = in_tx.send_async(Ok(WsFrame::Close { code, reason })).await;
                            break;
                        }
                        Some(Err(e)) => {
                            let _ = in_tx.send_async(Err(GatewayError::WebSocket(e))).await;
                            break;
                        }
                    },
                    frame = out_rx.recv_async() => match frame {
                        Ok(WsFrame::Text(text)) => {
                            if socket.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(WsFrame::Binary(data)) => {
                            if socket.send(WsMessage::Binary(data.into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(WsFrame::Close { code, reason }) => {
                            let _ = socket
                                .send(WsMessage::Close(Some(CloseFrame {
                                    code: code.into(),
                                    reason: reason.into(),
                                })))
                                .await;
                            break;
                        }
                        // Session dropped by the client side.
                        Err(_) => {
                            let _ = socket.close(None).await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(WsSession::new(in_rx, out_tx))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory session pairs for exercising the runner and client
    //! without a network.

    use super::*;

    /// The far end of an in-memory [`WsSession`].
    pub(crate) struct SessionPeer {
        pub(crate) to_client: flume::Sender<Result<WsFrame, GatewayError>>,
        pub(crate) from_client: flume::Receiver<WsFrame>,
    }

    impl SessionPeer {
        /// Push a text frame toward the client.
        pub(crate) async fn send_text(&self, text: impl Into<String>) {
            self.to_client
                .send_async(Ok(WsFrame::Text(text.into())))
                .await
                .expect("client side hung up");
        }

        /// Push a close frame toward the client.
        pub(crate) async fn send_close(&self, code: u16, reason: &str) {
            let _ = self
                .to_client
                .send_async(Ok(WsFrame::Close {
                    code,
                    reason: reason.to_string(),
                }))
                .await;
        }

        /// Await the next text frame from the client, decoded as JSON.
        pub(crate) async fn expect_json(&self) -> serde_json::Value {
            loop {
                match self.from_client.recv_async().await.expect("client ended") {
                    WsFrame::Text(text) => {
                        return serde_json::from_str(&text).expect("client sent invalid JSON")
                    }
                    WsFrame::Binary(_) => continue,
                    WsFrame::Close { .. } => panic!("client closed while expecting a frame"),
                }
            }
        }

        /// Await the client's close frame, skipping data frames.
        pub(crate) async fn expect_close(&self) {
            loop {
                match self.from_client.recv_async().await {
                    Ok(WsFrame::Close { .. }) | Err(_) => return,
                    Ok(_) => continue,
                }
            }
        }
    }

    /// A transport that hands out pre-built sessions in order and fails
    /// once the script runs dry.
    pub(crate) struct ScriptedTransport {
        sessions: parking_lot::Mutex<std::collections::VecDeque<WsSession>>,
        pub(crate) connects: std::sync::atomic::AtomicU32,
    }

    impl ScriptedTransport {
        pub(crate) fn new(sessions: Vec<WsSession>) -> Self {
            Self {
                sessions: parking_lot::Mutex::new(sessions.into()),
                connects: std::sync::atomic::AtomicU32::new(0),
            }
        }
    }

    impl WsTransport for ScriptedTransport {
        async fn connect(&self, _url: &Url, _user_agent: &str) -> Result<WsSession, GatewayError> {
            self.connects
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.sessions
                .lock()
                .pop_front()
                .ok_or_else(|| GatewayError::Transport("no scripted session left".to_string()))
        }
    }

    /// Build a connected `(session, peer)` pair.
    pub(crate) fn session_pair() -> (WsSession, SessionPeer) {
        let (in_tx, in_rx) = flume::bounded(FRAME_BUFFER);
        let (out_tx, out_rx) = flume::bounded(FRAME_BUFFER);
        (
            WsSession::new(in_rx, out_tx),
            SessionPeer {
                to_client: in_tx,
                from_client: out_rx,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::session_pair;
    use super::*;

    #[tokio::test]
    async fn test_session_send_recv() {
        let (session, peer) = session_pair();

        peer.send_text(r#"{"op":11}"#).await;
        match session.recv().await {
            Some(Ok(WsFrame::Text(text))) => assert_eq!(text, r#"{"op":11}"#),
            other => panic!("unexpected frame: {other:?}"),
        }

        session
            .send(WsFrame::Text("{\"op\":1,\"d\":null}".into()))
            .await
            .unwrap();
        let sent = peer.expect_json().await;
        assert_eq!(sent["op"], 1);
    }

    #[tokio::test]
    async fn test_recv_ends_when_peer_drops() {
        let (session, peer) = session_pair();
        drop(peer);
        assert!(session.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_fails_when_peer_drops() {
        let (session, peer) = session_pair();
        drop(peer);
        assert!(session.send(WsFrame::Text("x".into())).await.is_err());
    }
}
