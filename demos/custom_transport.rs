//! # Custom Transport Example
//!
//! Implements [`HttpTransport`] and [`FeedTransport`] with an in-process fake
//! game server, so the whole client runs without any network. Useful for:
//!
//! - **Testing**: drive lobby logic against scripted server behavior
//! - **Custom backends**: adapt any I/O layer (an HTTP/3 client, a test
//!   harness, a different WebSocket stack)
//!
//! The fake server starts with an expired access token, so the first join
//! shows the gateway renewing the token and replaying the request.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use guess_lobby_client::transport::Method;
use guess_lobby_client::{
    CredentialManager, Credentials, EnterOutcome, FeedTransport, Gateway, HttpRequest,
    HttpResponse, HttpTransport, LobbyClientConfig, LobbyClientError, LobbyEvent, LobbyFeed,
    LobbySession, MemoryStore,
};
use tokio::sync::mpsc;

const ROOM: &str = "K3XQ9P";

// ─────────────────────────────────────────────────────────────────────
// Step 1: An in-process HTTP "server"
// ─────────────────────────────────────────────────────────────────────

/// Answers the four lobby endpoints. Only `fresh-access` is accepted as a
/// bearer token.
#[derive(Default)]
struct FakeGameServer {
    renewals: AtomicUsize,
}

#[async_trait]
impl HttpTransport for FakeGameServer {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LobbyClientError> {
        tracing::info!("server <- {} {}", request.method.as_str(), request.path);

        let authorized = request.header("Authorization") == Some("Bearer fresh-access");
        let response = match (request.method, request.path.as_str()) {
            (Method::Get, "/api/verify_room/") => HttpResponse::new(
                200,
                serde_json::json!({ "code": ROOM, "status": "pending", "players": [] }).to_string(),
            ),
            (Method::Post, "/api/token/refresh/") => {
                self.renewals.fetch_add(1, Ordering::SeqCst);
                HttpResponse::new(
                    200,
                    serde_json::json!({ "access": "fresh-access", "refresh": "fresh-refresh" })
                        .to_string(),
                )
            }
            (Method::Post, "/api/join_room/") if authorized => HttpResponse::new(
                200,
                serde_json::json!({
                    "code": ROOM,
                    "status": "pending",
                    "host_id": 1,
                    "players": [{ "id": 1, "username": "frodo", "is_host": true }],
                    "participant_id": 1,
                    "secret": "seat-secret",
                    "is_host": true,
                })
                .to_string(),
            ),
            (Method::Get, "/api/auth/user/") if authorized => HttpResponse::new(
                200,
                serde_json::json!({ "id": 1, "username": "frodo" }).to_string(),
            ),
            (_, "/api/join_room/" | "/api/auth/user/") => {
                HttpResponse::new(401, r#"{"detail":"Given token not valid"}"#)
            }
            _ => HttpResponse::new(404, r#"{"error":"not found"}"#),
        };
        Ok(response)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A loopback feed transport
// ─────────────────────────────────────────────────────────────────────

/// Client half of an in-process feed. The server half is the sender that
/// pushes frames and the receiver that reads pings.
struct LoopbackFeed {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

fn loopback_feed() -> (
    LoopbackFeed,
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedReceiver<String>,
) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackFeed {
            tx: client_tx,
            rx: client_rx,
        },
        server_tx,
        server_rx,
    )
}

#[async_trait]
impl FeedTransport for LoopbackFeed {
    async fn send(&mut self, message: String) -> Result<(), LobbyClientError> {
        self.tx
            .send(message)
            .map_err(|e| LobbyClientError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `UnboundedReceiver::recv` is. `None` once the
    /// server half is dropped.
    async fn recv(&mut self) -> Option<Result<String, LobbyClientError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), LobbyClientError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire the client to the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = LobbyClientConfig::new("http://in-process");
    let server = Arc::new(FakeGameServer::default());

    // Start out signed in with a token the server no longer accepts.
    let credentials = Arc::new(CredentialManager::new(MemoryStore::new()));
    credentials.set_credentials(Credentials::new("expired-access", "stale-refresh"))?;
    let gateway = Gateway::new(server.clone(), credentials, config.clone());

    let session = Arc::new(LobbySession::new(gateway.clone()));
    let outcome = session.enter(ROOM).await?;
    tracing::info!(
        "enter -> {outcome:?} after {} renewal(s)",
        server.renewals.load(Ordering::SeqCst)
    );
    if outcome != EnterOutcome::Joined {
        return Err(format!("expected to join {ROOM}, got {outcome:?}").into());
    }

    if let Some(identity) = gateway.refresh_identity().await {
        tracing::info!("identity: {}", identity.username);
    }

    // ── Live feed ───────────────────────────────────────────────────
    let (transport, push, mut pings) = loopback_feed();
    let (mut feed, mut events) = LobbyFeed::start(transport, Arc::clone(&session), ROOM, &config);

    let seat = session
        .participant()
        .ok_or("join response did not hand out a seat")?;
    tracing::info!("holding seat {} (host: {})", seat.participant_id, seat.is_host);
    feed.ping(Some(seat.participant_id))?;
    if let Some(ping) = pings.recv().await {
        tracing::info!("server <- {ping}");
    }

    let round_end = chrono::Utc::now() + chrono::Duration::seconds(95);
    push.send(
        serde_json::json!({
            "code": ROOM,
            "status": "in_progress",
            "current_round": {
                "round_number": 1,
                "question": "Does your character carry a sword?",
                "end_time": round_end,
            },
        })
        .to_string(),
    )?;
    drop(push);

    while let Some(event) = events.recv().await {
        match event {
            LobbyEvent::Snapshot { status, .. } => {
                let view = session.view();
                tracing::info!(
                    "lobby is {status}: round {:?}, {} left",
                    view.round_number,
                    view.time_left_formatted
                );
            }
            LobbyEvent::Disconnected { reason } => {
                tracing::info!("feed ended: {}", reason.as_deref().unwrap_or("clean close"));
                break;
            }
            other => tracing::info!("event: {other:?}"),
        }
    }

    feed.shutdown().await;
    tracing::info!("Done. Custom transports work!");
    Ok(())
}
