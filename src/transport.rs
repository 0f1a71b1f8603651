//! Transport abstractions.
//!
//! Two seams separate the client logic from the network:
//!
//! - [`HttpTransport`] executes one request/response exchange against the game
//!   API. The [`Gateway`](crate::gateway::Gateway) layers credentials and
//!   renewal on top of it.
//! - [`FeedTransport`] is a bidirectional text message channel carrying the
//!   lobby feed. The [`LobbyFeed`](crate::feed::LobbyFeed) drives it.
//!
//! Connection setup is NOT part of either trait. Construct a transport
//! externally and hand it to the component that uses it.
//!
//! # Implementing a Custom HTTP Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use guess_lobby_client::error::LobbyClientError;
//! use guess_lobby_client::transport::{HttpRequest, HttpResponse, HttpTransport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl HttpTransport for MyTransport {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LobbyClientError> {
//!         // Send `request` and collect the status and body.
//!         Ok(HttpResponse::new(200, "{}"))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{LobbyClientError, Result};

/// HTTP status code the gateway treats as an expired access credential.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// HTTP method of a [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// An outgoing request relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path beginning with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Request with no query, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// `GET` request for `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// `POST` request for `path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyClientError::Serialization`] if `body` cannot be encoded.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response as seen by the client: status code plus raw body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// Response with `status` and raw `body` text.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns `true` for `401 Unauthorized`.
    pub fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyClientError::Serialization`] if the body does not decode as `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// A request/response transport for the game API.
///
/// Implementations resolve [`HttpRequest::path`] against their base URL and
/// return every HTTP response, success or not, as `Ok`. Only failures to
/// obtain a response at all (DNS, connection refused, reset, ...) are `Err`.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Execute one request.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyClientError::Transport`] if no response could be obtained.
    async fn execute(
        &self,
        request: HttpRequest,
    ) -> std::result::Result<HttpResponse, LobbyClientError>;
}

/// A bidirectional text message transport for the lobby feed.
///
/// Each call to [`send`](FeedTransport::send) transmits one complete JSON
/// message and each call to [`recv`](FeedTransport::recv) returns one.
///
/// # Cancel Safety
///
/// The [`recv`](FeedTransport::recv) method **MUST** be cancel-safe because it
/// is used inside `tokio::select!`. Channel-based implementations (e.g.,
/// wrapping `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait FeedTransport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyClientError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> std::result::Result<(), LobbyClientError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<std::result::Result<String, LobbyClientError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> std::result::Result<(), LobbyClientError>;
}
