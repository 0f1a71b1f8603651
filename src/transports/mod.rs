//! Transport implementations.
//!
//! Concrete transports live behind feature gates. Enable the corresponding
//! Cargo feature to pull one in:
//!
//! | Feature               | Trait                                            | Transport              |
//! |-----------------------|--------------------------------------------------|------------------------|
//! | `transport-reqwest`   | [`HttpTransport`](crate::transport::HttpTransport) | [`ReqwestTransport`]   |
//! | `transport-websocket` | [`FeedTransport`](crate::transport::FeedTransport) | [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), guess_lobby_client::LobbyClientError> {
//! use guess_lobby_client::{LobbyClientConfig, ReqwestTransport, WebSocketTransport};
//!
//! let config = LobbyClientConfig::from_env();
//! let http = ReqwestTransport::from_config(&config);
//! let feed = WebSocketTransport::connect(&config.feed_url("ABCDEF")).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-reqwest")]
pub mod http;

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-reqwest")]
pub use http::ReqwestTransport;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
