//! Wire types exchanged with the game server.
//!
//! Field names match the server's JSON exactly. Timestamps are ISO 8601 strings
//! on the wire and [`DateTime<Utc>`] in memory.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side participant identifier.
pub type ParticipantId = i64;

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle status of a room.
///
/// `JoinCreate` never comes from the server; it is the client's state before
/// any room has been verified or joined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    JoinCreate,
    Pending,
    InProgress,
    Guessing,
    Completed,
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl RoomStatus {
    /// Returns `true` for statuses that can still be joined or resumed.
    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Guessing)
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinCreate => "join_create",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Guessing => "guessing",
            Self::Completed => "completed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Lobby state ─────────────────────────────────────────────────────

/// The round currently being played.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentRound {
    pub round_number: u32,
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Character assigned to this player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Character {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A participant as listed in the lobby.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerSummary {
    pub id: ParticipantId,
    pub username: String,
    #[serde(default, rename = "characterSelected")]
    pub character_selected: bool,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub is_npc: bool,
}

/// A question collection enabled for the room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionCollection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
}

/// Authoritative lobby snapshot.
///
/// Returned by the verify and join endpoints and pushed over the lobby feed.
/// Each snapshot replaces the previous one wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LobbyState {
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<CurrentRound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guess_deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_character: Option<Character>,
    #[serde(default)]
    pub players: Vec<PlayerSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<ParticipantId>,
    /// Round duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_count: Option<u32>,
    /// Guessing phase duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guess_timer: Option<u32>,
    #[serde(default)]
    pub guesses_submitted: u32,
    #[serde(default)]
    pub guesses_needed: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub question_collections: Vec<QuestionCollection>,
}

impl LobbyState {
    /// Drop timer fields that do not belong to the current status.
    ///
    /// `current_round` only exists while in progress and `guess_deadline` only
    /// while guessing, so at most one timer is ever active.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.status != RoomStatus::InProgress && self.current_round.take().is_some() {
            tracing::debug!(status = %self.status, "dropping current_round outside in_progress");
        }
        if self.status != RoomStatus::Guessing && self.guess_deadline.take().is_some() {
            tracing::debug!(status = %self.status, "dropping guess_deadline outside guessing");
        }
        self
    }

    /// Deadline of whichever timer is active for the current status.
    pub fn active_deadline(&self) -> Option<DateTime<Utc>> {
        match self.status {
            RoomStatus::InProgress => self.current_round.as_ref().and_then(|r| r.end_time),
            RoomStatus::Guessing => self.guess_deadline,
            _ => None,
        }
    }
}

// ── Credentials ─────────────────────────────────────────────────────

/// An access/refresh token pair.
///
/// Both halves always travel together; there is no way to hold one without
/// the other.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub access: String,
    pub refresh: String,
}

impl Credentials {
    /// Pair up an access and a refresh token.
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Body of the token renewal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Body of a successful token renewal.
///
/// Servers that do not rotate refresh tokens omit `refresh`; the previous
/// refresh token stays valid in that case.
#[derive(Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Body of a join request.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRoomRequest {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl fmt::Debug for JoinRoomRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinRoomRequest")
            .field("code", &self.code)
            .field("guest_username", &self.guest_username)
            .field("participant_id", &self.participant_id)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl JoinRoomRequest {
    /// Join as the authenticated user.
    pub fn member(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            guest_username: None,
            participant_id: None,
            secret: None,
        }
    }

    /// Join as a guest with a display name.
    pub fn guest(code: impl Into<String>, guest_username: impl Into<String>) -> Self {
        Self {
            guest_username: Some(guest_username.into()),
            ..Self::member(code)
        }
    }

    /// Take back a seat held earlier, as the same participant.
    pub fn reconnect(
        code: impl Into<String>,
        participant_id: ParticipantId,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: Some(participant_id),
            secret: Some(secret.into()),
            ..Self::member(code)
        }
    }
}

/// Body of a successful join: the lobby state plus the seat the server
/// assigned to this client.
#[derive(Clone, Deserialize)]
pub struct JoinRoomResponse {
    #[serde(flatten)]
    pub state: LobbyState,
    #[serde(default)]
    pub participant_id: Option<ParticipantId>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub is_host: bool,
}

/// Profile of the authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub username: String,
    /// Any other profile fields, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Error body returned by the server on non-success responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorBody {
    /// Best-effort extraction of the message from a raw response body.
    pub fn message_from(body: &str) -> Option<String> {
        let parsed: ErrorBody = serde_json::from_str(body).ok()?;
        parsed.error.or(parsed.detail)
    }
}

// ── Lobby feed ──────────────────────────────────────────────────────

/// Messages the client sends over the lobby feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedClientMessage {
    /// Liveness ping; refreshes the participant's `last_seen` on the server.
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        participant_id: Option<ParticipantId>,
    },
}

/// A frame received over the lobby feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    /// Full lobby snapshot (carries both `code` and `status`).
    Snapshot(Box<LobbyState>),
    /// Any other lobby update (chat, round events, ...), kept as raw JSON.
    Update(serde_json::Value),
}

impl FeedFrame {
    /// Classify and decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyClientError::Serialization`](crate::LobbyClientError::Serialization)
    /// if the frame is not valid JSON or a snapshot-shaped frame has malformed fields.
    pub fn parse(text: &str) -> crate::error::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let is_snapshot = value.get("code").is_some_and(serde_json::Value::is_string)
            && value.get("status").is_some_and(serde_json::Value::is_string);
        if is_snapshot {
            let state: LobbyState = serde_json::from_value(value)?;
            Ok(Self::Snapshot(Box::new(state)))
        } else {
            Ok(Self::Update(value))
        }
    }
}
