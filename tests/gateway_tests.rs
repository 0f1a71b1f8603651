#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the authenticated request gateway and the
//! credential lifecycle around it.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{gateway, identity_json, tokens_json, ScriptedHttp, IDENTITY, JOIN, REFRESH};
use guess_lobby_client::config::LobbyClientConfig;
use guess_lobby_client::protocol::JoinRoomRequest;
use guess_lobby_client::{
    CredentialManager, Credentials, Gateway, HttpRequest, HttpResponse, HttpTransport,
    LobbyClientError, MemoryStore,
};
use tokio::sync::{Barrier, Notify};
use tokio_test::{assert_err, assert_ok};

fn signed_in(http: &Arc<ScriptedHttp>) -> (Gateway, Arc<MemoryStore>) {
    let (gateway, store) = gateway(Arc::clone(http));
    gateway
        .credentials()
        .set_credentials(Credentials::new("a1", "r1"))
        .unwrap();
    (gateway, store)
}

// ── Header attachment ───────────────────────────────────────────────

#[tokio::test]
async fn bearer_is_attached_only_when_a_token_exists() {
    common::init_tracing();
    let http = ScriptedHttp::new();
    http.on(JOIN, 200, "{}");
    let (gateway, _store) = gateway(Arc::clone(&http));

    assert_ok!(gateway.join_room(&JoinRoomRequest::member("ABCDEF")).await);
    gateway
        .credentials()
        .set_credentials(Credentials::new("a1", "r1"))
        .unwrap();
    assert_ok!(gateway.join_room(&JoinRoomRequest::member("ABCDEF")).await);

    let joins = http.requests_to(JOIN);
    assert_eq!(joins[0].header("Authorization"), None);
    assert_eq!(joins[1].header("Authorization"), Some("Bearer a1"));
}

#[tokio::test]
async fn non_401_statuses_pass_through_untouched() {
    let http = ScriptedHttp::new();
    http.on(JOIN, 403, r#"{"error":"room full"}"#)
        .on(JOIN, 500, "boom");
    let (gateway, _store) = signed_in(&http);

    let first = gateway
        .join_room(&JoinRoomRequest::member("ABCDEF"))
        .await
        .unwrap();
    assert_eq!(first.status, 403);
    assert_eq!(first.body, r#"{"error":"room full"}"#);

    let second = gateway
        .join_room(&JoinRoomRequest::member("ABCDEF"))
        .await
        .unwrap();
    assert_eq!(second.status, 500);

    assert_eq!(http.count(REFRESH), 0);
    assert_eq!(gateway.credentials().current_access().as_deref(), Some("a1"));
}

#[tokio::test]
async fn unauthorized_without_credentials_is_returned_as_is() {
    let http = ScriptedHttp::new();
    http.on(JOIN, 401, r#"{"detail":"not authenticated"}"#);
    let (gateway, _store) = gateway(Arc::clone(&http));

    let response = gateway
        .join_room(&JoinRoomRequest::member("ABCDEF"))
        .await
        .unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(http.count(JOIN), 1);
    assert_eq!(http.count(REFRESH), 0);
}

// ── Renewal ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unauthorized_renews_once_and_replays_once() {
    common::init_tracing();
    let http = ScriptedHttp::new();
    http.on(JOIN, 401, "{}")
        .on(JOIN, 200, r#"{"code":"ABCDEF","status":"pending"}"#)
        .on(REFRESH, 200, &tokens_json("a2", "r2"));
    let (gateway, store) = signed_in(&http);

    let response = gateway
        .join_room(&JoinRoomRequest::guest("ABCDEF", "Bilbo"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    assert_eq!(http.count(JOIN), 2);
    assert_eq!(http.count(REFRESH), 1);

    let refresh = &http.requests_to(REFRESH)[0];
    assert_eq!(refresh.header("Authorization"), None);
    assert_eq!(refresh.body, Some(serde_json::json!({ "refresh": "r1" })));

    let joins = http.requests_to(JOIN);
    assert_eq!(joins[0].header("Authorization"), Some("Bearer a1"));
    assert_eq!(joins[1].header("Authorization"), Some("Bearer a2"));
    assert_eq!(joins[0].method, joins[1].method);
    assert_eq!(joins[0].body, joins[1].body);

    assert_eq!(
        gateway.credentials().credentials(),
        Some(Credentials::new("a2", "r2"))
    );
    let persisted = store.snapshot();
    assert_eq!(persisted.get("access").map(String::as_str), Some("a2"));
    assert_eq!(persisted.get("refresh").map(String::as_str), Some("r2"));
}

#[tokio::test]
async fn replayed_unauthorized_is_returned_without_a_second_renewal() {
    let http = ScriptedHttp::new();
    http.on(JOIN, 401, "{}")
        .on(REFRESH, 200, &tokens_json("a2", "r2"));
    let (gateway, _store) = signed_in(&http);

    let response = gateway
        .join_room(&JoinRoomRequest::member("ABCDEF"))
        .await
        .unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(http.count(JOIN), 2);
    assert_eq!(http.count(REFRESH), 1);
    assert!(gateway.is_authenticated());
}

#[tokio::test]
async fn failed_renewal_clears_credentials_and_expires_session() {
    common::init_tracing();
    let http = ScriptedHttp::new();
    http.on(JOIN, 401, "{}")
        .on(REFRESH, 401, r#"{"detail":"Token is blacklisted"}"#);
    let (gateway, store) = signed_in(&http);

    let err = assert_err!(gateway.join_room(&JoinRoomRequest::member("ABCDEF")).await);
    assert!(matches!(err, LobbyClientError::SessionExpired));

    assert_eq!(http.count(JOIN), 1);
    assert_eq!(http.count(REFRESH), 1);
    assert!(!gateway.is_authenticated());
    assert!(gateway.credentials().identity().is_none());
    assert!(store.snapshot().is_empty());
}

/// Answers 401 to the stale token only after both requests have been sent
/// with it, so both observe the same credential generation.
struct RacingServer {
    barrier: Barrier,
    refreshes: AtomicUsize,
}

#[async_trait]
impl HttpTransport for RacingServer {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LobbyClientError> {
        if request.path == REFRESH {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            return Ok(HttpResponse::new(200, tokens_json("new", "r-new")));
        }
        match request.header("Authorization") {
            Some("Bearer old") => {
                self.barrier.wait().await;
                Ok(HttpResponse::new(401, "{}"))
            }
            Some("Bearer new") => Ok(HttpResponse::new(200, r#"{"ok":true}"#)),
            other => panic!("unexpected authorization {other:?}"),
        }
    }
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_renewal() {
    common::init_tracing();
    let server = Arc::new(RacingServer {
        barrier: Barrier::new(2),
        refreshes: AtomicUsize::new(0),
    });
    let credentials = Arc::new(CredentialManager::new(MemoryStore::new()));
    credentials
        .set_credentials(Credentials::new("old", "r-old"))
        .unwrap();
    let gateway = Gateway::new(
        server.clone(),
        credentials,
        LobbyClientConfig::new("http://test"),
    );

    let (a, b) = tokio::join!(
        gateway.request(HttpRequest::get("/api/game/a/")),
        gateway.request(HttpRequest::get("/api/game/b/")),
    );

    assert_eq!(a.unwrap().status, 200);
    assert_eq!(b.unwrap().status, 200);
    assert_eq!(server.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.credentials().current_access().as_deref(), Some("new"));
}

// ── Identity ────────────────────────────────────────────────────────

#[tokio::test]
async fn identity_is_loaded_after_setting_credentials() {
    let http = ScriptedHttp::new();
    http.on(IDENTITY, 200, &identity_json("frodo"));
    let (gateway, _store) = gateway(Arc::clone(&http));

    let refresh = gateway
        .set_credentials(Credentials::new("a1", "r1"))
        .unwrap();
    let identity = refresh.wait().await.unwrap();

    assert_eq!(identity.username, "frodo");
    assert_eq!(identity.id, Some(7));
    assert_eq!(gateway.credentials().identity(), Some(identity));
    assert_eq!(
        http.requests_to(IDENTITY)[0].header("Authorization"),
        Some("Bearer a1")
    );
}

#[tokio::test]
async fn identity_failure_clears_credentials() {
    let http = ScriptedHttp::new();
    http.on(IDENTITY, 500, r#"{"error":"database unavailable"}"#);
    let (gateway, store) = gateway(Arc::clone(&http));

    let refresh = gateway
        .set_credentials(Credentials::new("a1", "r1"))
        .unwrap();
    assert!(refresh.wait().await.is_none());

    assert!(!gateway.is_authenticated());
    assert!(gateway.credentials().identity().is_none());
    assert!(store.snapshot().is_empty());
}

/// Holds the identity lookup for `a1` until released, then answers with
/// `first_login`. Lookups for `b1` answer immediately as "bob".
struct SlowFirstLookup {
    entered: Notify,
    release: Notify,
    first_login: HttpResponse,
}

#[async_trait]
impl HttpTransport for SlowFirstLookup {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LobbyClientError> {
        match request.header("Authorization") {
            Some("Bearer a1") => {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(self.first_login.clone())
            }
            Some("Bearer b1") => Ok(HttpResponse::new(200, identity_json("bob"))),
            other => panic!("unexpected authorization {other:?}"),
        }
    }
}

/// Logs in as `a1`, then logs out and in again as `b1` while the first
/// identity lookup is still in flight. Returns once both lookups finished.
async fn relogin_during_lookup(first_login: HttpResponse) -> (Gateway, Arc<MemoryStore>) {
    let server = Arc::new(SlowFirstLookup {
        entered: Notify::new(),
        release: Notify::new(),
        first_login,
    });
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::new(
        server.clone(),
        Arc::new(CredentialManager::new(Arc::clone(&store))),
        LobbyClientConfig::new("http://test"),
    );

    let first = gateway
        .set_credentials(Credentials::new("a1", "r1"))
        .unwrap();
    server.entered.notified().await;

    assert_ok!(gateway.logout());
    let second = gateway
        .set_credentials(Credentials::new("b1", "r2"))
        .unwrap();
    assert_eq!(second.wait().await.unwrap().username, "bob");

    server.release.notify_one();
    assert!(first.wait().await.is_none());
    (gateway, store)
}

#[tokio::test]
async fn failed_lookup_for_an_earlier_login_keeps_the_current_one() {
    common::init_tracing();
    let (gateway, store) =
        relogin_during_lookup(HttpResponse::new(500, r#"{"error":"boom"}"#)).await;

    assert!(gateway.is_authenticated());
    assert_eq!(gateway.credentials().current_access().as_deref(), Some("b1"));
    assert_eq!(gateway.credentials().identity().unwrap().username, "bob");
    assert_eq!(store.snapshot()["access"], "b1");
    assert_eq!(store.snapshot()["refresh"], "r2");
}

#[tokio::test]
async fn late_identity_for_an_earlier_login_is_discarded() {
    let (gateway, _store) =
        relogin_during_lookup(HttpResponse::new(200, identity_json("alice"))).await;

    assert_eq!(gateway.credentials().current_access().as_deref(), Some("b1"));
    assert_eq!(gateway.credentials().identity().unwrap().username, "bob");
}

#[tokio::test]
async fn restore_picks_up_a_stored_pair_and_loads_identity() {
    let http = ScriptedHttp::new();
    http.on(IDENTITY, 200, &identity_json("sam"));
    let store = Arc::new(MemoryStore::with_entries([
        ("access", "a-stored"),
        ("refresh", "r-stored"),
    ]));
    let gateway = Gateway::new(
        http.clone(),
        Arc::new(CredentialManager::new(Arc::clone(&store))),
        LobbyClientConfig::new("http://test"),
    );

    let pending = gateway.restore().unwrap().expect("a stored pair");
    assert_eq!(pending.wait().await.unwrap().username, "sam");
    assert_eq!(
        gateway.credentials().current_refresh().as_deref(),
        Some("r-stored")
    );
}

#[tokio::test]
async fn restore_with_a_lone_token_erases_it() {
    let http = ScriptedHttp::new();
    let store = Arc::new(MemoryStore::with_entries([("access", "orphan")]));
    let gateway = Gateway::new(
        http.clone(),
        Arc::new(CredentialManager::new(Arc::clone(&store))),
        LobbyClientConfig::new("http://test"),
    );

    assert!(gateway.restore().unwrap().is_none());
    assert!(!gateway.is_authenticated());
    assert!(store.snapshot().is_empty());
    assert!(http.requests().is_empty());
}

#[tokio::test]
async fn logout_forgets_everything() {
    let http = ScriptedHttp::new();
    http.on(IDENTITY, 200, &identity_json("frodo"));
    let (gateway, store) = gateway(Arc::clone(&http));
    gateway
        .set_credentials(Credentials::new("a1", "r1"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_ok!(gateway.logout());
    assert!(!gateway.is_authenticated());
    assert!(gateway.credentials().identity().is_none());
    assert!(store.snapshot().is_empty());
}
