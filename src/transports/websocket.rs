//! Lobby feed transport over WebSocket, using `tokio-tungstenite`.
//!
//! The game server pushes a lobby snapshot right after the socket is accepted
//! and then relays every lobby update as a JSON text frame. Both `ws://` and
//! `wss://` URLs are supported.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), guess_lobby_client::LobbyClientError> {
//! use guess_lobby_client::{FeedTransport, LobbyClientConfig, WebSocketTransport};
//!
//! let config = LobbyClientConfig::new("http://localhost:8000");
//! let mut transport = WebSocketTransport::connect_lobby(&config, "ABCDEF").await?;
//!
//! if let Some(Ok(snapshot)) = transport.recv().await {
//!     println!("initial lobby: {snapshot}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::config::LobbyClientConfig;
use crate::error::LobbyClientError;
use crate::transport::FeedTransport;

/// Underlying stream type, public so callers can wrap their own connection
/// with [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`FeedTransport`] backed by a WebSocket connection.
///
/// [`recv`](FeedTransport::recv) is cancel-safe: a dropped `recv` future does
/// not consume a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect to a WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyClientError::Io`] if the URL is invalid or the handshake
    /// fails. I/O error kinds are preserved; anything else maps to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, LobbyClientError> {
        debug!(url = %url, "connecting to lobby feed");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            LobbyClientError::Io(std::io::Error::new(kind, e))
        })?;

        info!(url = %url, "lobby feed connected");
        Ok(Self::from_stream(stream))
    }

    /// Connect to the feed of room `code` as configured in `config`.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_lobby(
        config: &LobbyClientConfig,
        code: &str,
    ) -> Result<Self, LobbyClientError> {
        Self::connect(&config.feed_url(code)).await
    }

    /// Connect, failing with [`LobbyClientError::Timeout`] if the handshake
    /// does not finish within `timeout`.
    ///
    /// # Errors
    ///
    /// [`LobbyClientError::Timeout`], or anything [`connect`](Self::connect) returns.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: Duration,
    ) -> Result<Self, LobbyClientError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| LobbyClientError::Timeout)?
    }

    /// Wrap an already-established stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), LobbyClientError> {
        if self.closed {
            return Err(LobbyClientError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| LobbyClientError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LobbyClientError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(LobbyClientError::TransportReceive(e.to_string()))),
            };

            match frame {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(close) => {
                    debug!(?close, "lobby feed closed by server");
                    return None;
                }
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Binary(_) => {
                    warn!("skipping binary frame on lobby feed");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), LobbyClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| LobbyClientError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{FeedFrame, RoomStatus};
    use tokio::net::TcpListener;

    /// Serve one WebSocket connection with `handler`; returns the base URL.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[test]
    fn websocket_transport_is_send_and_debug() {
        fn assert_traits<T: Send + std::fmt::Debug>() {}
        assert_traits::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, LobbyClientError::Io(_)));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        let err = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LobbyClientError::Timeout));
    }

    #[tokio::test]
    async fn receives_initial_snapshot_then_close() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Text(
                r#"{"code":"ABCDEF","status":"pending","players":[]}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let text = transport.recv().await.unwrap().unwrap();
        match FeedFrame::parse(&text).unwrap() {
            FeedFrame::Snapshot(state) => {
                assert_eq!(state.code, "ABCDEF");
                assert_eq!(state.status, RoomStatus::Pending);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"chat"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"type":"chat"}"#);
    }

    #[tokio::test]
    async fn ping_reaches_server() {
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = tx.send(text.to_string());
            }
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .send(r#"{"type":"ping","participant_id":7}"#.to_string())
            .await
            .unwrap();
        let seen = rx.await.unwrap();
        assert_eq!(seen, r#"{"type":"ping","participant_id":7}"#);
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_fails_and_close_is_idempotent() {
        let url =
            serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, LobbyClientError::TransportClosed));
    }
}
