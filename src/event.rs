//! Events emitted by the lobby feed.

use crate::protocol::RoomStatus;

/// Something that happened on the lobby feed.
///
/// `Connected` is always the first event and `Disconnected` always the last.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    /// The feed task started.
    Connected,
    /// A full lobby snapshot was received and adopted by the session.
    Snapshot {
        code: String,
        status: RoomStatus,
    },
    /// A non-snapshot frame (chat, round events, ...), as raw JSON.
    Update(serde_json::Value),
    /// The feed ended. `reason` is `None` when the server closed cleanly.
    Disconnected { reason: Option<String> },
}
