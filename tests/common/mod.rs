#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the lobby client integration tests.
//!
//! Provides a scripted HTTP transport keyed by path, a scripted feed
//! transport, and JSON fixtures shaped like real server responses.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Once};

use async_trait::async_trait;
use guess_lobby_client::config::LobbyClientConfig;
use guess_lobby_client::{
    CredentialManager, FeedTransport, Gateway, HttpRequest, HttpResponse, HttpTransport,
    LobbyClientError, MemoryStore,
};

pub const VERIFY: &str = "/api/verify_room/";
pub const JOIN: &str = "/api/join_room/";
pub const REFRESH: &str = "/api/token/refresh/";
pub const IDENTITY: &str = "/api/auth/user/";

/// Install a `tracing` subscriber once, filtered by `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── ScriptedHttp ────────────────────────────────────────────────────

/// HTTP transport answering from per-path queues.
///
/// Each path has a queue of responses; the last one is repeated once the
/// queue is down to a single entry. Requests to an unscripted path get a 404.
/// Every request is recorded.
#[derive(Default)]
pub struct ScriptedHttp {
    routes: StdMutex<HashMap<String, VecDeque<HttpResponse>>>,
    seen: StdMutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue `status`/`body` as the next response for `path`.
    pub fn on(&self, path: &str, status: u16, body: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(HttpResponse::new(status, body));
        self
    }

    /// All recorded requests, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    /// Recorded requests to `path`.
    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LobbyClientError> {
        let response = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&request.path) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => HttpResponse::new(404, r#"{"error":"not found"}"#),
            }
        };
        self.seen.lock().unwrap().push(request);
        Ok(response)
    }
}

/// Gateway over `http` with in-memory credential storage.
pub fn gateway(http: Arc<ScriptedHttp>) -> (Gateway, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let credentials = Arc::new(CredentialManager::new(Arc::clone(&store)));
    let gateway = Gateway::new(http, credentials, LobbyClientConfig::new("http://test"));
    (gateway, store)
}

// ── MockFeed ────────────────────────────────────────────────────────

/// Scripted [`FeedTransport`].
///
/// `recv()` yields the scripted items in order, then hangs until shutdown.
/// An explicit `None` item simulates the server closing the socket.
pub struct MockFeed {
    incoming: VecDeque<Option<Result<String, LobbyClientError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockFeed {
    pub fn new(
        incoming: Vec<Option<Result<String, LobbyClientError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let feed = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (feed, sent, closed)
    }
}

#[async_trait]
impl FeedTransport for MockFeed {
    async fn send(&mut self, message: String) -> Result<(), LobbyClientError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, LobbyClientError>> {
        match self.incoming.pop_front() {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), LobbyClientError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

/// Minimal room payload with the given code and status.
pub fn room_json(code: &str, status: &str) -> String {
    serde_json::json!({
        "code": code,
        "status": status,
        "players": [],
    })
    .to_string()
}

/// Full lobby state for a round in progress.
pub fn in_progress_json(code: &str, end_time: &str) -> String {
    serde_json::json!({
        "code": code,
        "status": "in_progress",
        "host_id": 1,
        "round_length": 120,
        "round_count": 3,
        "current_round": {
            "round_number": 1,
            "question": "Does your character wear a hat?",
            "end_time": end_time,
        },
        "my_character": { "name": "Gandalf", "image": "/media/gandalf.png" },
        "players": [
            { "id": 1, "username": "frodo", "characterSelected": true, "is_host": true },
            { "id": 2, "username": "sam", "characterSelected": true },
        ],
    })
    .to_string()
}

pub fn tokens_json(access: &str, refresh: &str) -> String {
    serde_json::json!({ "access": access, "refresh": refresh }).to_string()
}

pub fn identity_json(username: &str) -> String {
    serde_json::json!({ "id": 7, "username": username, "email": "frodo@shire.example" })
        .to_string()
}
