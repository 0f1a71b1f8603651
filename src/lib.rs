//! # Guess Lobby Client
//!
//! Async client for the lobby of a multiplayer guessing game.
//!
//! The crate covers the client half of three concerns:
//!
//! - **Credentials**: an access/refresh token pair that is held both or
//!   neither, persisted through a pluggable [`CredentialStore`], plus the
//!   identity that belongs to it ([`CredentialManager`]).
//! - **Authenticated requests**: [`Gateway`] attaches the bearer token, renews
//!   it once on `401 Unauthorized` (coalescing concurrent renewals) and
//!   replays the original request.
//! - **Lobby state**: [`LobbySession`] runs the verify-then-join protocol,
//!   keeps the latest [`LobbyState`] and derives the presentation
//!   [`LobbyView`] (including the round countdown). [`LobbyFeed`] keeps it
//!   current from the server's live feed.
//!
//! HTTP and feed I/O go through the [`HttpTransport`] and [`FeedTransport`]
//! traits. Default implementations are [`ReqwestTransport`]
//! (`transport-reqwest` feature) and [`WebSocketTransport`]
//! (`transport-websocket` feature).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-reqwest")]
//! # async fn example() -> Result<(), guess_lobby_client::LobbyClientError> {
//! use std::sync::Arc;
//! use guess_lobby_client::{
//!     CredentialManager, EnterOutcome, FileStore, Gateway, LobbyClientConfig, LobbySession,
//!     ReqwestTransport,
//! };
//!
//! let config = LobbyClientConfig::from_env();
//! let credentials = Arc::new(CredentialManager::from_config(
//!     FileStore::new("credentials.json"),
//!     &config,
//! ));
//! let gateway = Gateway::new(
//!     Arc::new(ReqwestTransport::from_config(&config)),
//!     credentials,
//!     config,
//! );
//! gateway.restore()?;
//!
//! let session = LobbySession::new(gateway);
//! match session.enter("ABCDEF").await? {
//!     EnterOutcome::GuestNameRequired { .. } => session.join_as_guest("ABCDEF", "Bilbo").await?,
//!     EnterOutcome::Joined | EnterOutcome::Reconnected | EnterOutcome::Resumed => {}
//! }
//! println!("{}", session.view().time_left_formatted);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod feed;
pub mod gateway;
pub mod lobby;
pub mod protocol;
pub mod transport;
pub mod transports;
pub mod view;

pub use config::LobbyClientConfig;
pub use credentials::{CredentialManager, CredentialStore, FileStore, MemoryStore};
pub use error::LobbyClientError;
pub use event::LobbyEvent;
pub use feed::LobbyFeed;
pub use gateway::{Gateway, IdentityRefresh};
pub use lobby::{EnterOutcome, LobbySession, ParticipantRecord};
pub use protocol::{Credentials, Identity, LobbyState, RoomStatus};
pub use transport::{FeedTransport, HttpRequest, HttpResponse, HttpTransport};
pub use view::LobbyView;

#[cfg(feature = "transport-reqwest")]
pub use transports::ReqwestTransport;
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
