//! Live lobby feed.
//!
//! [`LobbyFeed`] is a thin handle to a background task that owns a
//! [`FeedTransport`]. The task pushes incoming snapshots into a
//! [`LobbySession`] and forwards every frame as a [`LobbyEvent`] on a bounded
//! channel returned from [`LobbyFeed::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect_lobby(&config, "ABCDEF").await?;
//! let (mut feed, mut events) = LobbyFeed::start(transport, session.clone(), "ABCDEF", &config);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LobbyEvent::Snapshot { status, .. } => println!("lobby is now {status}"),
//!         LobbyEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! feed.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::LobbyClientConfig;
use crate::error::{LobbyClientError, Result};
use crate::event::LobbyEvent;
use crate::lobby::LobbySession;
use crate::protocol::{FeedClientMessage, FeedFrame, ParticipantId};
use crate::transport::FeedTransport;

/// Handle to a running lobby feed.
pub struct LobbyFeed {
    code: String,
    outgoing: mpsc::UnboundedSender<FeedClientMessage>,
    connected: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl LobbyFeed {
    /// Start consuming `transport` as the feed of room `code`.
    ///
    /// Snapshots are applied to `session` only while `code` is its interest.
    /// Must be called from within a Tokio runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl FeedTransport,
        session: Arc<LobbySession>,
        code: impl Into<String>,
        config: &LobbyClientConfig,
    ) -> (Self, mpsc::Receiver<LobbyEvent>) {
        let code = code.into();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(
            FeedLoop {
                code: code.clone(),
                session,
                event_tx,
                connected: Arc::clone(&connected),
            }
            .run(transport, outgoing_rx, shutdown_rx),
        );

        let feed = Self {
            code,
            outgoing,
            connected,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (feed, event_rx)
    }

    /// Room code this feed belongs to.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns `false` once the feed has ended for any reason.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a liveness ping for `participant_id`, usually the seat from
    /// [`LobbySession::participant`].
    ///
    /// # Errors
    ///
    /// [`LobbyClientError::NotConnected`] once the feed has ended.
    pub fn ping(&self, participant_id: Option<ParticipantId>) -> Result<()> {
        if !self.is_connected() {
            return Err(LobbyClientError::NotConnected);
        }
        self.outgoing
            .send(FeedClientMessage::Ping { participant_id })
            .map_err(|_| LobbyClientError::NotConnected)
    }

    /// Close the transport and stop the background task.
    ///
    /// The task gets `shutdown_timeout` to close cleanly and emit its final
    /// `Disconnected` event before it is aborted. Calling this twice is a
    /// no-op.
    pub async fn shutdown(&mut self) {
        debug!(code = %self.code, "lobby feed shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "lobby feed task failed"),
                Err(_) => {
                    warn!(code = %self.code, "lobby feed did not stop in time; aborting");
                    task.abort();
                    if let Err(e) = task.await {
                        debug!(error = %e, "lobby feed task aborted");
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for LobbyFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyFeed")
            .field("code", &self.code)
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for LobbyFeed {
    fn drop(&mut self) {
        // No runtime to drive `transport.close()` from here; just stop the task.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Background loop ─────────────────────────────────────────────────

struct FeedLoop {
    code: String,
    session: Arc<LobbySession>,
    event_tx: mpsc::Sender<LobbyEvent>,
    connected: Arc<AtomicBool>,
}

impl FeedLoop {
    /// Runs until the server closes, the transport fails, shutdown is
    /// requested or the handle is dropped.
    async fn run(
        self,
        mut transport: impl FeedTransport,
        mut outgoing: mpsc::UnboundedReceiver<FeedClientMessage>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!(code = %self.code, "lobby feed started");
        self.emit(LobbyEvent::Connected);

        loop {
            tokio::select! {
                message = outgoing.recv() => {
                    let Some(message) = message else {
                        let _ = transport.close().await;
                        self.disconnect(Some("feed handle dropped".into())).await;
                        break;
                    };
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(error = %e, "failed to encode feed message");
                            continue;
                        }
                    };
                    if let Err(e) = transport.send(text).await {
                        error!(code = %self.code, error = %e, "lobby feed send failed");
                        self.disconnect(Some(e.to_string())).await;
                        break;
                    }
                }

                _ = &mut shutdown_rx => {
                    let _ = transport.close().await;
                    self.disconnect(Some("feed shut down".into())).await;
                    break;
                }

                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        error!(code = %self.code, error = %e, "lobby feed receive failed");
                        self.disconnect(Some(e.to_string())).await;
                        break;
                    }
                    None => {
                        debug!(code = %self.code, "lobby feed closed by server");
                        self.disconnect(None).await;
                        break;
                    }
                },
            }
        }

        debug!(code = %self.code, "lobby feed stopped");
    }

    fn handle_frame(&self, text: &str) {
        match FeedFrame::parse(text) {
            Ok(FeedFrame::Snapshot(state)) => {
                if state.code != self.code {
                    warn!(
                        feed = %self.code,
                        received = %state.code,
                        "ignoring snapshot for another room"
                    );
                    return;
                }
                let status = state.status;
                if self.session.apply_snapshot(&self.code, *state) {
                    self.emit(LobbyEvent::Snapshot {
                        code: self.code.clone(),
                        status,
                    });
                }
            }
            Ok(FeedFrame::Update(value)) => self.emit(LobbyEvent::Update(value)),
            Err(e) => warn!(error = %e, "undecodable lobby feed frame"),
        }
    }

    /// Drops the event if the consumer is not keeping up.
    fn emit(&self, event: LobbyEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(code = %self.code, "lobby event channel full; dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("lobby event receiver dropped");
            }
        }
    }

    /// `Disconnected` is the last event and is never dropped.
    async fn disconnect(&self, reason: Option<String>) {
        self.connected.store(false, Ordering::Release);
        if self
            .event_tx
            .send(LobbyEvent::Disconnected { reason })
            .await
            .is_err()
        {
            debug!("lobby event receiver dropped");
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialManager, MemoryStore};
    use crate::gateway::Gateway;
    use crate::protocol::RoomStatus;
    use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl HttpTransport for Offline {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Err(LobbyClientError::Transport("offline".into()))
        }
    }

    /// Transport that never yields a frame and hangs forever in `close()`.
    struct StuckTransport {
        close_called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FeedTransport for StuckTransport {
        async fn send(&mut self, _message: String) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            self.close_called.store(true, Ordering::Release);
            std::future::pending().await
        }
    }

    fn session() -> Arc<LobbySession> {
        let gateway = Gateway::new(
            Arc::new(Offline),
            Arc::new(CredentialManager::new(MemoryStore::new())),
            LobbyClientConfig::new("http://test"),
        );
        Arc::new(LobbySession::new(gateway))
    }

    #[tokio::test]
    async fn shutdown_aborts_a_stuck_transport() {
        let close_called = Arc::new(AtomicBool::new(false));
        let transport = StuckTransport {
            close_called: Arc::clone(&close_called),
        };
        let config =
            LobbyClientConfig::new("http://test").with_shutdown_timeout(Duration::from_millis(20));
        let (mut feed, mut events) = LobbyFeed::start(transport, session(), "ABCDEF", &config);

        assert_eq!(events.recv().await, Some(LobbyEvent::Connected));
        feed.shutdown().await;

        assert!(close_called.load(Ordering::Acquire));
        assert!(!feed.is_connected());
        assert!(matches!(feed.ping(Some(1)), Err(LobbyClientError::NotConnected)));
    }

    #[tokio::test]
    async fn snapshot_for_another_room_is_ignored() {
        let session = session();
        let (event_tx, mut events) = mpsc::channel(4);
        let feed_loop = FeedLoop {
            code: "ABCDEF".into(),
            session: Arc::clone(&session),
            event_tx,
            connected: Arc::new(AtomicBool::new(true)),
        };

        feed_loop.handle_frame(r#"{"code":"OTHER1","status":"guessing"}"#);
        assert_eq!(session.state().status, RoomStatus::JoinCreate);
        assert!(events.try_recv().is_err());

        feed_loop.handle_frame(r#"{"type":"chat","message":"hi"}"#);
        assert!(matches!(events.try_recv(), Ok(LobbyEvent::Update(_))));
    }
}
