//! Lobby session controller.
//!
//! [`LobbySession`] holds the lobby state for the room the client is currently
//! interested in and drives the verify-then-join protocol:
//!
//! ```text
//! enter(code) ──► verify ──► not found / not joinable ─────────► RoomUnavailable
//!                    │
//!                    ├─► seat held ──► join { code, participant_id, secret } ► Reconnected
//!                    ├─► authenticated ──► join { code } ───────► Joined
//!                    ├─► guest name known ─► join { code, guest_username } ► Joined
//!                    ├─► pending ──────────────────────────────► GuestNameRequired
//!                    └─► in_progress / guessing ───────────────► Resumed
//! ```
//!
//! Every state-producing call is tagged with its room code. When the response
//! arrives the tag is compared with the current interest; a mismatch means the
//! caller moved on and the response is discarded with
//! [`LobbyClientError::Superseded`]. The check also runs before every join
//! call, so an abandoned room never gets a new participant.
//!
//! A successful join hands out a seat (participant id and secret). The
//! session keeps it as a [`ParticipantRecord`] and uses it to reconnect as the
//! same participant the next time that room is entered.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{LobbyClientError, Result};
use crate::gateway::Gateway;
use crate::protocol::{
    ErrorBody, JoinRoomRequest, JoinRoomResponse, LobbyState, ParticipantId, RoomStatus,
};
use crate::view::{self, LobbyView};

/// How a successful [`LobbySession::enter`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnterOutcome {
    /// Joined the room; state adopted from the join response.
    Joined,
    /// Took back the seat held in this room; state adopted from the join
    /// response.
    Reconnected,
    /// Unauthenticated visitor re-entering a running game; state adopted from
    /// the lookup response without a join call.
    Resumed,
    /// The room is waiting for players and the visitor has no guest name yet.
    /// Nothing was adopted; call [`LobbySession::join_as_guest`] next.
    GuestNameRequired {
        /// The room as returned by the lookup.
        room: Box<LobbyState>,
    },
}

/// Seat this client holds in a room.
///
/// The server hands it out on a successful join; presenting `participant_id`
/// and `secret` again lets the client back in as the same participant, even
/// after the game has started.
#[derive(Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub code: String,
    pub participant_id: ParticipantId,
    pub secret: String,
    pub is_host: bool,
}

impl std::fmt::Debug for ParticipantRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantRecord")
            .field("code", &self.code)
            .field("participant_id", &self.participant_id)
            .field("secret", &"<redacted>")
            .field("is_host", &self.is_host)
            .finish()
    }
}

/// Controller for one client's view of one lobby at a time.
pub struct LobbySession {
    gateway: Gateway,
    guest_name: Option<String>,
    /// Room code whose responses are currently accepted.
    interest: Mutex<Option<String>>,
    participant: Mutex<Option<ParticipantRecord>>,
    state_tx: watch::Sender<LobbyState>,
}

impl LobbySession {
    /// Create a session with no room of interest and `join_create` state.
    pub fn new(gateway: Gateway) -> Self {
        let (state_tx, _) = watch::channel(LobbyState::default());
        Self {
            gateway,
            guest_name: None,
            interest: Mutex::new(None),
            participant: Mutex::new(None),
            state_tx,
        }
    }

    /// Use `name` as guest identity when an unauthenticated visitor enters a
    /// waiting room, instead of returning [`EnterOutcome::GuestNameRequired`].
    ///
    /// Blank names are ignored.
    #[must_use]
    pub fn with_guest_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        self.guest_name = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Start with a seat saved from an earlier run, so entering its room
    /// reconnects instead of joining anew.
    #[must_use]
    pub fn with_participant(self, record: ParticipantRecord) -> Self {
        *lock(&self.participant) = Some(record);
        self
    }

    /// Gateway used for every call this session makes.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Seat held from the most recent join, if any.
    pub fn participant(&self) -> Option<ParticipantRecord> {
        lock(&self.participant).clone()
    }

    /// Current lobby state (a clone).
    pub fn state(&self) -> LobbyState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state replacements.
    pub fn subscribe(&self) -> watch::Receiver<LobbyState> {
        self.state_tx.subscribe()
    }

    /// Room code this session is currently interested in.
    pub fn interest(&self) -> Option<String> {
        self.lock_interest().clone()
    }

    /// Derived view of the current state as of now.
    pub fn view(&self) -> LobbyView {
        view::project(&self.state_tx.borrow(), Utc::now())
    }

    /// Enter room `code`: look it up, then reconnect to a held seat, join,
    /// resume or ask for a guest name depending on the room status and on
    /// whether the caller is authenticated.
    ///
    /// A held seat the server refuses is dropped and entry continues as if
    /// there had been none.
    ///
    /// # Errors
    ///
    /// - [`LobbyClientError::InvalidInput`] for a blank code.
    /// - [`LobbyClientError::RoomUnavailable`] if the room does not exist or
    ///   is not joinable (the caller should redirect home).
    /// - [`LobbyClientError::JoinRejected`] if the join call was refused.
    /// - [`LobbyClientError::Superseded`] if another room was entered while
    ///   this call was in flight.
    /// - [`LobbyClientError::SessionExpired`] and transport errors from the
    ///   gateway.
    pub async fn enter(&self, code: &str) -> Result<EnterOutcome> {
        let code = normalize_code(code)?;
        self.set_interest(&code);

        let room = self.verify(&code).await?;
        if !room.status.is_joinable() {
            info!(code = %code, status = %room.status, "room is not joinable");
            return Err(LobbyClientError::RoomUnavailable {
                code,
                status: Some(room.status),
            });
        }

        if let Some(seat) = self.participant().filter(|p| p.code == code) {
            debug!(code = %code, participant_id = seat.participant_id, "reconnecting to held seat");
            let request = JoinRoomRequest::reconnect(code.clone(), seat.participant_id, seat.secret);
            match self.join_and_adopt(&code, request).await {
                Ok(()) => return Ok(EnterOutcome::Reconnected),
                Err(LobbyClientError::JoinRejected { status, message, .. }) => {
                    warn!(code = %code, status, error = ?message, "held seat refused; joining anew");
                    self.forget_participant(&code);
                }
                Err(e) => return Err(e),
            }
        }

        if self.gateway.is_authenticated() {
            debug!(code = %code, "joining as authenticated member");
            self.join_and_adopt(&code, JoinRoomRequest::member(code.clone()))
                .await?;
            return Ok(EnterOutcome::Joined);
        }

        match (room.status, &self.guest_name) {
            (RoomStatus::Pending, Some(name)) => {
                debug!(code = %code, "joining with remembered guest name");
                self.join_and_adopt(&code, JoinRoomRequest::guest(code.clone(), name))
                    .await?;
                Ok(EnterOutcome::Joined)
            }
            (RoomStatus::Pending, None) => {
                debug!(code = %code, "guest name required");
                self.ensure_interest(&code)?;
                Ok(EnterOutcome::GuestNameRequired {
                    room: Box::new(room),
                })
            }
            _ => {
                debug!(code = %code, status = %room.status, "resuming running game as guest");
                self.adopt(&code, room)?;
                Ok(EnterOutcome::Resumed)
            }
        }
    }

    /// Join room `code` under guest display name `name`.
    ///
    /// # Errors
    ///
    /// [`LobbyClientError::InvalidInput`] for a blank code or name, otherwise
    /// the same as [`enter`](Self::enter).
    pub async fn join_as_guest(&self, code: &str, name: &str) -> Result<()> {
        let code = normalize_code(code)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(LobbyClientError::InvalidInput(
                "guest name must not be empty".into(),
            ));
        }
        self.set_interest(&code);

        self.join_and_adopt(&code, JoinRoomRequest::guest(code.clone(), name))
            .await
    }

    /// Fetch the latest state of room `code` and adopt it, whatever its
    /// status.
    ///
    /// # Errors
    ///
    /// [`LobbyClientError::RoomUnavailable`] if the lookup fails,
    /// [`LobbyClientError::Superseded`] if the interest moved meanwhile.
    pub async fn refresh_state(&self, code: &str) -> Result<LobbyState> {
        let code = normalize_code(code)?;
        let state = self.verify(&code).await?;
        self.adopt(&code, state)?;
        Ok(self.state())
    }

    /// Adopt a snapshot pushed for room `code`.
    ///
    /// Returns `false` (and leaves state untouched) if `code` is not the
    /// current interest.
    pub fn apply_snapshot(&self, code: &str, state: LobbyState) -> bool {
        match self.adopt(code, state) {
            Ok(()) => true,
            Err(_) => {
                debug!(code = %code, "discarding snapshot for a room no longer of interest");
                false
            }
        }
    }

    /// Drop the current interest and reset to the empty `join_create` state.
    ///
    /// The held seat is kept, so entering the same room again reconnects.
    pub fn leave(&self) {
        let previous = self.lock_interest().take();
        self.state_tx.send_replace(LobbyState::default());
        if let Some(code) = previous {
            info!(code = %code, "left lobby");
        }
    }

    /// Spawn a task that recomputes the derived view every `period` and on
    /// every state change.
    ///
    /// Must be called from within a Tokio runtime. The task ends when the
    /// returned receiver and every other subscriber of the view are dropped,
    /// or when the session itself is dropped.
    pub fn spawn_view_ticker(
        &self,
        period: Duration,
    ) -> (JoinHandle<()>, watch::Receiver<LobbyView>) {
        let mut states = self.subscribe();
        let initial = view::project(&states.borrow_and_update(), Utc::now());
        let (view_tx, view_rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = states.changed() => {
                        if changed.is_err() {
                            debug!("lobby session dropped; stopping view ticker");
                            break;
                        }
                    }
                    () = view_tx.closed() => break,
                }
                let next = view::project(&states.borrow_and_update(), Utc::now());
                view_tx.send_if_modified(|current| {
                    if *current == next {
                        false
                    } else {
                        *current = next;
                        true
                    }
                });
            }
        });

        (task, view_rx)
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn verify(&self, code: &str) -> Result<LobbyState> {
        let response = self.gateway.verify_room(code).await?;
        if !response.is_success() {
            info!(
                code = %code,
                status = response.status,
                error = ?ErrorBody::message_from(&response.body),
                "room lookup failed"
            );
            return Err(LobbyClientError::RoomUnavailable {
                code: code.to_string(),
                status: None,
            });
        }
        let mut room: LobbyState = response.json()?;
        if room.code.is_empty() {
            room.code = code.to_string();
        }
        Ok(room)
    }

    /// Join `code` unless it stopped being the interest, then adopt the
    /// returned state and remember the seat.
    async fn join_and_adopt(&self, code: &str, request: JoinRoomRequest) -> Result<()> {
        self.ensure_interest(code)?;
        let response = self.join(request).await?;
        let is_host = response.is_host;
        let seat = response
            .participant_id
            .zip(response.secret)
            .map(|(participant_id, secret)| ParticipantRecord {
                code: code.to_string(),
                participant_id,
                secret,
                is_host,
            });
        self.adopt(code, response.state)?;
        self.remember_participant(code, seat);
        Ok(())
    }

    async fn join(&self, request: JoinRoomRequest) -> Result<JoinRoomResponse> {
        let response = self.gateway.join_room(&request).await?;
        if !response.is_success() {
            let message = ErrorBody::message_from(&response.body);
            warn!(
                code = %request.code,
                status = response.status,
                error = ?message,
                "join rejected"
            );
            return Err(LobbyClientError::JoinRejected {
                code: request.code,
                status: response.status,
                message,
            });
        }
        let mut joined: JoinRoomResponse = response.json()?;
        if joined.state.code.is_empty() {
            joined.state.code = request.code;
        }
        Ok(joined)
    }

    fn remember_participant(&self, code: &str, seat: Option<ParticipantRecord>) {
        let mut held = lock(&self.participant);
        match seat {
            Some(seat) => {
                debug!(code = %code, participant_id = seat.participant_id, "holding seat");
                *held = Some(seat);
            }
            None if held.as_ref().is_some_and(|p| p.code != code) => *held = None,
            None => {}
        }
    }

    fn forget_participant(&self, code: &str) {
        let mut held = lock(&self.participant);
        if held.as_ref().is_some_and(|p| p.code == code) {
            *held = None;
        }
    }

    /// Replace the state with `state` if `code` is still the interest.
    fn adopt(&self, code: &str, state: LobbyState) -> Result<()> {
        // The interest lock is held across the replacement so a concurrent
        // `set_interest` cannot slip between the check and the write.
        let interest = self.lock_interest();
        if interest.as_deref() != Some(code) {
            debug!(code = %code, current = ?interest.as_deref(), "response superseded");
            return Err(LobbyClientError::Superseded {
                code: code.to_string(),
            });
        }
        let state = state.normalized();
        debug!(code = %code, status = %state.status, "adopting lobby state");
        self.state_tx.send_replace(state);
        Ok(())
    }

    fn ensure_interest(&self, code: &str) -> Result<()> {
        if self.lock_interest().as_deref() == Some(code) {
            Ok(())
        } else {
            Err(LobbyClientError::Superseded {
                code: code.to_string(),
            })
        }
    }

    fn set_interest(&self, code: &str) {
        let mut interest = self.lock_interest();
        if interest.as_deref() != Some(code) {
            debug!(code = %code, previous = ?interest.as_deref(), "switching lobby interest");
            *interest = Some(code.to_string());
        }
    }

    fn lock_interest(&self) -> MutexGuard<'_, Option<String>> {
        lock(&self.interest)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for LobbySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbySession")
            .field("interest", &self.interest())
            .field("status", &self.state_tx.borrow().status)
            .field("has_guest_name", &self.guest_name.is_some())
            .field("participant", &self.participant())
            .finish()
    }
}

fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(LobbyClientError::InvalidInput(
            "room code must not be empty".into(),
        ));
    }
    Ok(code.to_string())
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
    use crate::config::LobbyClientConfig;
    use crate::credentials::{CredentialManager, MemoryStore};
    use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Fixed(HttpResponse);

    #[async_trait]
    impl HttpTransport for Fixed {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Ok(self.0.clone())
        }
    }

    fn session(response: HttpResponse) -> LobbySession {
        let gateway = Gateway::new(
            Arc::new(Fixed(response)),
            Arc::new(CredentialManager::new(MemoryStore::new())),
            LobbyClientConfig::new("http://test"),
        );
        LobbySession::new(gateway)
    }

    #[test]
    fn blank_guest_name_is_ignored() {
        let s = session(HttpResponse::new(200, "{}")).with_guest_name("   ");
        assert!(s.guest_name.is_none());
        let s = session(HttpResponse::new(200, "{}")).with_guest_name("  Bilbo ");
        assert_eq!(s.guest_name.as_deref(), Some("Bilbo"));
    }

    #[tokio::test]
    async fn blank_code_is_rejected_without_a_request() {
        let s = session(HttpResponse::new(500, ""));
        let err = s.enter("  ").await.unwrap_err();
        assert!(matches!(err, LobbyClientError::InvalidInput(_)));
        assert!(s.interest().is_none());
    }

    #[test]
    fn snapshot_without_interest_is_discarded() {
        let s = session(HttpResponse::new(200, "{}"));
        let state = LobbyState {
            code: "ABCDEF".into(),
            status: RoomStatus::Pending,
            ..LobbyState::default()
        };
        assert!(!s.apply_snapshot("ABCDEF", state));
        assert_eq!(s.state(), LobbyState::default());
    }

    #[tokio::test]
    async fn refresh_state_adopts_non_joinable_status() {
        let s = session(HttpResponse::new(
            200,
            r#"{"code":"ABCDEF","status":"completed"}"#,
        ));
        s.set_interest("ABCDEF");
        let state = s.refresh_state("ABCDEF").await.unwrap();
        assert_eq!(state.status, RoomStatus::Completed);
    }

    #[tokio::test]
    async fn leave_resets_state_and_interest() {
        let s = session(HttpResponse::new(
            200,
            r#"{"code":"ABCDEF","status":"guessing","guesses_needed":2}"#,
        ));
        assert_eq!(s.enter("ABCDEF").await.unwrap(), EnterOutcome::Resumed);
        assert_eq!(s.state().status, RoomStatus::Guessing);

        s.leave();
        assert!(s.interest().is_none());
        assert_eq!(s.state(), LobbyState::default());
        assert_eq!(s.view().status, RoomStatus::JoinCreate);
    }

    #[tokio::test]
    async fn verify_response_without_code_is_tagged_with_requested_code() {
        let s = session(HttpResponse::new(200, r#"{"status":"in_progress"}"#));
        s.enter("  XYZ123 ").await.unwrap();
        assert_eq!(s.state().code, "XYZ123");
        assert_eq!(s.interest().as_deref(), Some("XYZ123"));
    }
}
