//! Authenticated request gateway.
//!
//! [`Gateway`] wraps every call to the game API. It attaches the current
//! access token, and when the server answers `401 Unauthorized` it renews the
//! token pair once and replays the original request once:
//!
//! ```text
//! request ──► send(Bearer access) ──► not 401 ──────────────────────► response
//!                     │
//!                     └─► 401 ─► no refresh token ──────────────────► 401 response
//!                           │
//!                           └─► renew ─► ok ─► send(Bearer new) ───► response (any status)
//!                                   │
//!                                   └─► failed ─► clear credentials ─► SessionExpired
//! ```
//!
//! Renewals are single-flight. Requests that were sent with the same
//! credential generation and all got a 401 share one renewal call: the first
//! one performs it while the others wait, then reuse its outcome.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LobbyClientConfig;
use crate::credentials::CredentialManager;
use crate::error::{LobbyClientError, Result};
use crate::protocol::{
    Credentials, ErrorBody, Identity, JoinRoomRequest, RefreshRequest, RefreshResponse,
};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

const AUTHORIZATION: &str = "Authorization";

struct GatewayInner {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialManager>,
    config: LobbyClientConfig,
    /// Held for the duration of a renewal.
    renewal: Mutex<()>,
}

/// Handle to a scheduled identity lookup.
///
/// Dropping the handle lets the lookup finish in the background. Awaiting
/// [`wait`](Self::wait) yields the identity once it is known, or `None` if the
/// lookup failed (which also cleared the credentials).
#[derive(Debug)]
pub struct IdentityRefresh {
    task: JoinHandle<Option<Identity>>,
}

impl IdentityRefresh {
    /// Wait for the lookup to finish.
    pub async fn wait(self) -> Option<Identity> {
        match self.task.await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "identity lookup task did not complete");
                None
            }
        }
    }
}

/// Authenticated request gateway. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Create a gateway over `transport` and `credentials`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<CredentialManager>,
        config: LobbyClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                transport,
                credentials,
                config,
                renewal: Mutex::new(()),
            }),
        }
    }

    /// Credential manager shared by every clone of this gateway.
    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.inner.credentials
    }

    /// Configuration the gateway was built with.
    pub fn config(&self) -> &LobbyClientConfig {
        &self.inner.config
    }

    /// Returns `true` while a token pair is held.
    pub fn is_authenticated(&self) -> bool {
        self.inner.credentials.is_authenticated()
    }

    // ── Credential lifecycle ────────────────────────────────────────

    /// Adopt a freshly issued token pair (after login) and schedule the
    /// identity lookup.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the pair cannot be persisted; no lookup is
    /// scheduled in that case.
    pub fn set_credentials(&self, credentials: Credentials) -> Result<IdentityRefresh> {
        let epoch = self.inner.credentials.login(credentials)?;
        Ok(self.spawn_identity_refresh(epoch))
    }

    /// Startup hook: restore the persisted pair and, if one was found,
    /// schedule the identity lookup.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn restore(&self) -> Result<Option<IdentityRefresh>> {
        Ok(self
            .inner
            .credentials
            .restore_login()?
            .map(|epoch| self.spawn_identity_refresh(epoch)))
    }

    /// Forget the credentials and the identity.
    ///
    /// # Errors
    ///
    /// Returns an error if durable storage could not be erased. Memory is
    /// cleared regardless.
    pub fn logout(&self) -> Result<()> {
        info!("logging out");
        self.inner.credentials.clear_credentials()
    }

    fn spawn_identity_refresh(&self, epoch: u64) -> IdentityRefresh {
        let gateway = self.clone();
        IdentityRefresh {
            task: tokio::spawn(async move { gateway.refresh_identity_for(epoch).await }),
        }
    }

    /// Look up the identity for the current credentials and record it.
    ///
    /// Any failure is treated as an invalid session: the credentials are
    /// cleared and `None` is returned. A lookup that outlives its login (the
    /// user logged out or logged in again meanwhile) changes nothing.
    pub async fn refresh_identity(&self) -> Option<Identity> {
        let epoch = self.inner.credentials.epoch();
        self.refresh_identity_for(epoch).await
    }

    async fn refresh_identity_for(&self, epoch: u64) -> Option<Identity> {
        match self.fetch_identity().await {
            Ok(identity) => {
                if self.inner.credentials.set_identity(epoch, identity.clone()) {
                    info!(username = %identity.username, "identity loaded");
                    Some(identity)
                } else {
                    debug!(epoch, "login changed before identity arrived; discarding");
                    None
                }
            }
            Err(e) => {
                match self.inner.credentials.clear_if_epoch(epoch) {
                    Ok(true) => warn!(error = %e, "identity lookup failed; credentials cleared"),
                    Ok(false) => debug!(error = %e, epoch, "stale identity lookup failed"),
                    Err(clear) => warn!(error = %clear, "failed to erase stored credentials"),
                }
                None
            }
        }
    }

    /// Authenticated self-lookup, without touching stored state.
    ///
    /// # Errors
    ///
    /// [`LobbyClientError::Http`] for a non-success status, plus anything
    /// [`request`](Self::request) returns.
    pub async fn fetch_identity(&self) -> Result<Identity> {
        let response = self
            .request(HttpRequest::get(self.inner.config.identity_path.clone()))
            .await?;
        if !response.is_success() {
            return Err(LobbyClientError::Http {
                status: response.status,
                message: ErrorBody::message_from(&response.body),
            });
        }
        response.json()
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Send `request` with the current credentials, renewing them once on a
    /// 401.
    ///
    /// Responses other than 401 are returned untouched, whatever their status.
    /// After a successful renewal the replayed request's response is returned
    /// even if it is another 401.
    ///
    /// # Errors
    ///
    /// - [`LobbyClientError::SessionExpired`] if the renewal failed; the
    ///   credentials have been cleared.
    /// - Transport errors from either attempt.
    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (generation, sent_with) = self.inner.credentials.snapshot();
        let response = self
            .send(&request, sent_with.as_ref().map(|c| c.access.as_str()))
            .await?;

        if !response.is_unauthorized() {
            return Ok(response);
        }
        if sent_with.is_none() {
            debug!(path = %request.path, "401 without a refresh token");
            return Ok(response);
        }

        let access = self.renew(generation).await?;
        debug!(path = %request.path, "replaying request with renewed credentials");
        self.send(&request, Some(&access)).await
    }

    /// Plain request without credentials and without renewal.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn request_anonymous(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.inner.transport.execute(request).await
    }

    /// Look up room `code`. Never authenticated.
    ///
    /// # Errors
    ///
    /// Transport errors only; a missing room is a non-success response.
    pub async fn verify_room(&self, code: &str) -> Result<HttpResponse> {
        let request =
            HttpRequest::get(self.inner.config.verify_path.clone()).with_query("code", code);
        self.request_anonymous(request).await
    }

    /// Join a room, authenticated when credentials are present.
    ///
    /// # Errors
    ///
    /// Anything [`request`](Self::request) returns.
    pub async fn join_room(&self, body: &JoinRoomRequest) -> Result<HttpResponse> {
        let request = HttpRequest::post(self.inner.config.join_path.clone()).with_json(body)?;
        self.request(request).await
    }

    async fn send(&self, request: &HttpRequest, access: Option<&str>) -> Result<HttpResponse> {
        let mut request = request.clone();
        if let Some(token) = access {
            request
                .headers
                .retain(|(name, _)| !name.eq_ignore_ascii_case(AUTHORIZATION));
            request
                .headers
                .push((AUTHORIZATION.to_string(), format!("Bearer {token}")));
        }
        self.inner.transport.execute(request).await
    }

    /// Renew the pair that was current at `seen_generation` and return the
    /// access token to retry with.
    async fn renew(&self, seen_generation: u64) -> Result<String> {
        let _renewal = self.inner.renewal.lock().await;

        let (generation, current) = self.inner.credentials.snapshot();
        if generation != seen_generation {
            // Someone else renewed (or cleared) while this request was in flight.
            return match current {
                Some(credentials) => {
                    debug!("reusing credentials renewed by a concurrent request");
                    Ok(credentials.access)
                }
                None => Err(LobbyClientError::SessionExpired),
            };
        }
        let Some(current) = current else {
            return Err(LobbyClientError::SessionExpired);
        };

        match self.exchange_refresh(&current.refresh).await {
            Ok(renewed) => {
                let access = renewed.access.clone();
                if let Err(e) = self.inner.credentials.rotate(renewed) {
                    warn!(error = %e, "could not persist renewed credentials");
                    self.expire();
                    return Err(LobbyClientError::SessionExpired);
                }
                info!("access token renewed");
                Ok(access)
            }
            Err(e) => {
                warn!(error = %e, "token renewal failed");
                self.expire();
                Err(LobbyClientError::SessionExpired)
            }
        }
    }

    fn expire(&self) {
        if let Err(e) = self.inner.credentials.clear_credentials() {
            warn!(error = %e, "failed to erase stored credentials");
        }
    }

    async fn exchange_refresh(&self, refresh: &str) -> Result<Credentials> {
        let request = HttpRequest::post(self.inner.config.refresh_path.clone()).with_json(
            &RefreshRequest {
                refresh: refresh.to_string(),
            },
        )?;
        let response = self.inner.transport.execute(request).await?;
        if !response.is_success() {
            return Err(LobbyClientError::Http {
                status: response.status,
                message: ErrorBody::message_from(&response.body),
            });
        }
        let renewed: RefreshResponse = response.json()?;
        Ok(Credentials {
            access: renewed.access,
            refresh: renewed.refresh.unwrap_or_else(|| refresh.to_string()),
        })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("base_url", &self.inner.config.base_url)
            .field("credentials", &self.inner.credentials)
            .finish()
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
    use crate::credentials::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Transport that answers from a fixed closure and records requests.
    struct FnTransport<F> {
        respond: F,
        seen: StdMutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl<F> HttpTransport for FnTransport<F>
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            let response = (self.respond)(&request);
            self.seen.lock().unwrap().push(request);
            Ok(response)
        }
    }

    fn gateway_with<F>(respond: F) -> (Gateway, Arc<FnTransport<F>>)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        let transport = Arc::new(FnTransport {
            respond,
            seen: StdMutex::new(Vec::new()),
        });
        let credentials = Arc::new(CredentialManager::new(MemoryStore::new()));
        let gateway = Gateway::new(
            transport.clone(),
            credentials,
            LobbyClientConfig::new("http://test"),
        );
        (gateway, transport)
    }

    #[tokio::test]
    async fn anonymous_requests_carry_no_authorization() {
        let (gateway, transport) = gateway_with(|_| HttpResponse::new(200, "{}"));
        gateway.request(HttpRequest::get("/x")).await.unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].header("authorization"), None);
    }

    #[tokio::test]
    async fn bearer_overrides_caller_authorization() {
        let (gateway, transport) = gateway_with(|_| HttpResponse::new(200, "{}"));
        gateway
            .credentials()
            .set_credentials(Credentials::new("acc", "ref"))
            .unwrap();
        gateway
            .request(
                HttpRequest::get("/x")
                    .with_header("authorization", "Basic abc")
                    .with_header("X-Trace", "1"),
            )
            .await
            .unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].header("Authorization"), Some("Bearer acc"));
        assert_eq!(seen[0].header("x-trace"), Some("1"));
        assert_eq!(
            seen[0]
                .headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case("authorization"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn verify_room_is_never_authenticated() {
        let (gateway, transport) =
            gateway_with(|_| HttpResponse::new(200, r#"{"code":"AB","status":"pending"}"#));
        gateway
            .credentials()
            .set_credentials(Credentials::new("acc", "ref"))
            .unwrap();
        gateway.verify_room("AB").await.unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].header("authorization"), None);
        assert_eq!(seen[0].query, vec![("code".to_string(), "AB".to_string())]);
    }

    #[tokio::test]
    async fn renewal_without_rotated_refresh_keeps_old_refresh() {
        let (gateway, _transport) = gateway_with(|req| match req.path.as_str() {
            "/api/token/refresh/" => HttpResponse::new(200, r#"{"access":"fresh"}"#),
            _ if req.header("authorization") == Some("Bearer fresh") => {
                HttpResponse::new(200, "{}")
            }
            _ => HttpResponse::new(401, "{}"),
        });
        gateway
            .credentials()
            .set_credentials(Credentials::new("stale", "keep-me"))
            .unwrap();

        let response = gateway.request(HttpRequest::get("/x")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(gateway.credentials().current_access().as_deref(), Some("fresh"));
        assert_eq!(
            gateway.credentials().current_refresh().as_deref(),
            Some("keep-me")
        );
    }
}
