//! Error types for the lobby client.

use thiserror::Error;

use crate::protocol::RoomStatus;

/// Errors that can occur when using the lobby client.
#[derive(Debug, Error)]
pub enum LobbyClientError {
    /// The HTTP request could not be completed (network unreachable, connection reset, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// Failed to send a message through the lobby feed transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the lobby feed transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The feed transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a request or response body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server answered with an unexpected non-success status.
    #[error("unexpected HTTP status {status}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Server-provided error message, if any.
        message: Option<String>,
    },

    /// The access credential expired and could not be renewed.
    ///
    /// Credentials have already been cleared when this is returned.
    #[error("session expired")]
    SessionExpired,

    /// The room does not exist or is no longer joinable.
    #[error("room {code} is unavailable")]
    RoomUnavailable {
        /// Room code that was looked up.
        code: String,
        /// Status reported by the server, if the room exists.
        status: Option<RoomStatus>,
    },

    /// The server refused to let this caller join an existing room.
    #[error("join rejected for room {code} (HTTP {status})")]
    JoinRejected {
        /// Room code of the join attempt.
        code: String,
        /// HTTP status code of the rejection.
        status: u16,
        /// Server-provided error message, if any.
        message: Option<String>,
    },

    /// A response arrived for a room the session is no longer interested in.
    #[error("response for room {code} was superseded")]
    Superseded {
        /// Room code the discarded response belonged to.
        code: String,
    },

    /// Durable credential storage failed.
    #[error("credential storage error: {0}")]
    Storage(String),

    /// A caller-supplied value was rejected before any request was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Attempted a feed operation after the feed has shut down.
    #[error("lobby feed is not connected")]
    NotConnected,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LobbyClientError {
    /// Returns `true` if retrying the same operation later may succeed.
    ///
    /// Expired sessions, unavailable rooms, rejected joins and superseded
    /// responses are terminal: the caller has to re-authenticate, redirect or
    /// re-prompt instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500,
            Self::Transport(_)
            | Self::TransportSend(_)
            | Self::TransportReceive(_)
            | Self::TransportClosed
            | Self::Timeout
            | Self::Io(_) => true,
            _ => false,
        }
    }
}

/// A specialized [`Result`] type for lobby client operations.
pub type Result<T> = std::result::Result<T, LobbyClientError>;
