//! Client configuration.

use std::time::Duration;

/// Environment variable read by [`LobbyClientConfig::from_env`].
pub const BASE_URL_ENV: &str = "LOBBY_API_BASE_URL";

/// Base URL used when [`BASE_URL_ENV`] is unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Default capacity of the bounded feed event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful feed shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default countdown recomputation period.
const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Configuration shared by the gateway, the lobby session and the lobby feed.
///
/// Only `base_url` is required; endpoint paths default to the game server's
/// routes.
///
/// # Example
///
/// ```
/// use guess_lobby_client::LobbyClientConfig;
/// use std::time::Duration;
///
/// let config = LobbyClientConfig::new("https://guess.example")
///     .with_refresh_path("/auth/refresh/")
///     .with_tick_period(Duration::from_millis(500));
/// assert_eq!(config.refresh_path, "/auth/refresh/");
/// assert_eq!(config.verify_path, "/api/verify_room/");
/// ```
#[derive(Debug, Clone)]
pub struct LobbyClientConfig {
    /// Scheme and host of the game API, without a trailing slash.
    pub base_url: String,
    /// Room lookup endpoint.
    pub verify_path: String,
    /// Room join endpoint.
    pub join_path: String,
    /// Token renewal endpoint.
    pub refresh_path: String,
    /// Current-user endpoint.
    pub identity_path: String,
    /// Lobby feed path prefix; the room code and a trailing `/` are appended.
    pub feed_path: String,
    /// Durable storage key of the access token.
    pub access_key: String,
    /// Durable storage key of the refresh token.
    pub refresh_key: String,
    /// Capacity of the bounded feed event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`LobbyFeed::shutdown`](crate::feed::LobbyFeed::shutdown) waits
    /// for the feed loop before aborting it.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Countdown recomputation period used by the view ticker.
    ///
    /// Defaults to **1 second**.
    pub tick_period: Duration,
}

impl LobbyClientConfig {
    /// Create a configuration for the given API base URL with default paths.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            verify_path: "/api/verify_room/".into(),
            join_path: "/api/join_room/".into(),
            refresh_path: "/api/token/refresh/".into(),
            identity_path: "/api/auth/user/".into(),
            feed_path: "/ws/lobby/".into(),
            access_key: "access".into(),
            refresh_key: "refresh".into(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            tick_period: DEFAULT_TICK_PERIOD,
        }
    }

    /// Build a configuration from [`BASE_URL_ENV`], falling back to
    /// [`DEFAULT_BASE_URL`].
    pub fn from_env() -> Self {
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// Set the room lookup endpoint.
    #[must_use]
    pub fn with_verify_path(mut self, path: impl Into<String>) -> Self {
        self.verify_path = path.into();
        self
    }

    /// Set the room join endpoint.
    #[must_use]
    pub fn with_join_path(mut self, path: impl Into<String>) -> Self {
        self.join_path = path.into();
        self
    }

    /// Set the token renewal endpoint.
    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Set the current-user endpoint.
    #[must_use]
    pub fn with_identity_path(mut self, path: impl Into<String>) -> Self {
        self.identity_path = path.into();
        self
    }

    /// Set the lobby feed path prefix.
    #[must_use]
    pub fn with_feed_path(mut self, path: impl Into<String>) -> Self {
        self.feed_path = path.into();
        self
    }

    /// Set the durable storage keys for the access and refresh tokens.
    #[must_use]
    pub fn with_storage_keys(
        mut self,
        access_key: impl Into<String>,
        refresh_key: impl Into<String>,
    ) -> Self {
        self.access_key = access_key.into();
        self.refresh_key = refresh_key.into();
        self
    }

    /// Set the capacity of the bounded feed event channel.
    ///
    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful feed shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the countdown recomputation period.
    #[must_use]
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// WebSocket URL of the lobby feed for `code`.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`.
    pub fn feed_url(&self, code: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}{}{code}/", self.feed_path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LobbyClientConfig::new("http://localhost:8000/");
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.join_path, "/api/join_room/");
        assert_eq!(config.access_key, "access");
        assert_eq!(config.refresh_key, "refresh");
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.tick_period, Duration::from_secs(1));
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = LobbyClientConfig::new("http://x").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn feed_url_switches_scheme() {
        let plain = LobbyClientConfig::new("http://localhost:8000");
        assert_eq!(plain.feed_url("ABCDEF"), "ws://localhost:8000/ws/lobby/ABCDEF/");

        let tls = LobbyClientConfig::new("https://guess.example");
        assert_eq!(tls.feed_url("QWERTY"), "wss://guess.example/ws/lobby/QWERTY/");
    }

    #[test]
    fn storage_keys_builder() {
        let config = LobbyClientConfig::new("http://x").with_storage_keys("a", "r");
        assert_eq!(config.access_key, "a");
        assert_eq!(config.refresh_key, "r");
    }
}
