//! # Basic Lobby Example
//!
//! Walks through a complete lobby visit against a running game server:
//!
//! 1. Restore persisted credentials (if any) from a JSON file
//! 2. Look up the room and join it, as a member or as a guest
//! 3. Follow the live lobby feed and print the round countdown
//! 4. Shut down gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start the game server on localhost:8000, then:
//! LOBBY_ROOM_CODE=K3XQ9P cargo run --example basic_lobby
//!
//! # Override the server and the guest name:
//! LOBBY_API_BASE_URL=https://guess.example LOBBY_GUEST_NAME=Pippin \
//!     LOBBY_ROOM_CODE=K3XQ9P cargo run --example basic_lobby
//! ```

use std::sync::Arc;
use std::time::Duration;

use guess_lobby_client::{
    CredentialManager, EnterOutcome, FileStore, Gateway, LobbyClientConfig, LobbyEvent, LobbyFeed,
    LobbySession, ReqwestTransport, WebSocketTransport,
};

const DEFAULT_CREDENTIALS_FILE: &str = "lobby-credentials.json";
const DEFAULT_GUEST_NAME: &str = "RustGuest";
const PING_PERIOD: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = LobbyClientConfig::from_env();
    let code = std::env::var("LOBBY_ROOM_CODE")?;
    let credentials_file = std::env::var("LOBBY_CREDENTIALS_FILE")
        .unwrap_or_else(|_| DEFAULT_CREDENTIALS_FILE.to_string());
    tracing::info!("Using API at {}", config.base_url);

    // ── Credentials ─────────────────────────────────────────────────
    let credentials = Arc::new(CredentialManager::from_config(
        FileStore::new(credentials_file),
        &config,
    ));
    let gateway = Gateway::new(
        Arc::new(ReqwestTransport::from_config(&config)),
        credentials,
        config.clone(),
    );
    if let Some(pending) = gateway.restore()? {
        match pending.wait().await {
            Some(identity) => tracing::info!("Signed in as {}", identity.username),
            None => tracing::warn!("Stored session is no longer valid; continuing as guest"),
        }
    }

    // ── Enter the lobby ─────────────────────────────────────────────
    let mut session = LobbySession::new(gateway);
    if let Ok(name) = std::env::var("LOBBY_GUEST_NAME") {
        session = session.with_guest_name(name);
    }
    let session = Arc::new(session);

    match session.enter(&code).await? {
        EnterOutcome::Joined => tracing::info!("Joined room {code}"),
        EnterOutcome::Reconnected => tracing::info!("Reconnected to room {code}"),
        EnterOutcome::Resumed => tracing::info!("Resumed running game in room {code}"),
        EnterOutcome::GuestNameRequired { room } => {
            tracing::info!(
                "Room {code} is waiting for players ({} present); joining as {DEFAULT_GUEST_NAME}",
                room.players.len()
            );
            session.join_as_guest(&code, DEFAULT_GUEST_NAME).await?;
        }
    }

    // ── Live feed and countdown ─────────────────────────────────────
    let transport = WebSocketTransport::connect_lobby(&config, &code).await?;
    let (mut feed, mut events) = LobbyFeed::start(transport, Arc::clone(&session), &code, &config);
    let (ticker, mut views) = session.spawn_view_ticker(config.tick_period);
    let mut ping = tokio::time::interval(PING_PERIOD);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };
                match event {
                    LobbyEvent::Connected => tracing::info!("Lobby feed connected"),
                    LobbyEvent::Snapshot { status, .. } => tracing::info!("Lobby is now {status}"),
                    LobbyEvent::Update(value) => tracing::debug!("Lobby update: {value}"),
                    LobbyEvent::Disconnected { reason } => {
                        tracing::warn!("Disconnected: {}", reason.as_deref().unwrap_or("server closed"));
                        break;
                    }
                }
            }

            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                if !view.time_left_formatted.is_empty() {
                    tracing::info!("[{}] {} left {}", view.status, view.time_left_formatted, view.question);
                }
            }

            _ = ping.tick() => {
                let participant_id = session.participant().map(|p| p.participant_id);
                if let Err(e) = feed.ping(participant_id) {
                    tracing::warn!("Ping failed: {e}");
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    feed.shutdown().await;
    ticker.abort();
    session.leave();
    tracing::info!("Left the lobby. Goodbye!");
    Ok(())
}
