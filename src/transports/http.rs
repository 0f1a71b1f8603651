//! HTTP transport implementation using `reqwest`.
//!
//! [`ReqwestTransport`] resolves request paths against a base URL and returns
//! every HTTP response, whatever its status, to the gateway. Only failures to
//! obtain a response become errors.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-reqwest` feature is enabled
//! (it is enabled by default).

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};

use crate::config::LobbyClientConfig;
use crate::error::LobbyClientError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// An [`HttpTransport`] backed by a shared [`reqwest::Client`].
///
/// No request timeout is configured; callers that need one should build their
/// own client and use [`ReqwestTransport::with_client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Create a transport with a default client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a transport from an existing client (custom TLS, proxy, timeouts).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a transport for [`LobbyClientConfig::base_url`].
    pub fn from_config(config: &LobbyClientConfig) -> Self {
        Self::new(config.base_url.clone())
    }

    /// Base URL every request path is appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LobbyClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), url.as_str());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = request.method.as_str(), path = %request.path, "sending request");

        let response = builder.send().await.map_err(|e| {
            error!(error = %e, path = %request.path, "request failed");
            LobbyClientError::Transport(e.to_string())
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| LobbyClientError::Transport(e.to_string()))?;

        debug!(status, path = %request.path, "received response");
        Ok(HttpResponse::new(status, body))
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, capture the raw request head and reply with
    /// `response`. Returns the base URL and a receiver for the captured head.
    async fn one_shot_server(
        response: &'static str,
    ) -> (String, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !String::from_utf8_lossy(&buf).contains("\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{addr}"), rx)
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let transport = ReqwestTransport::new("http://localhost:8000/");
        assert_eq!(transport.base_url(), "http://localhost:8000");
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let transport = ReqwestTransport::new("http://127.0.0.1:1");
        let err = transport
            .execute(HttpRequest::get("/api/verify_room/"))
            .await
            .unwrap_err();
        assert!(matches!(err, LobbyClientError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn non_success_status_is_returned_not_raised() {
        let (base, head) = one_shot_server(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        )
        .await;
        let transport = ReqwestTransport::new(base);

        let response = transport
            .execute(
                HttpRequest::get("/api/auth/user/")
                    .with_query("code", "ABC DEF")
                    .with_header("Authorization", "Bearer tok"),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(response.body, "{}");

        let head = head.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /api/auth/user/?code=abc+def"));
        assert!(head.contains("authorization: bearer tok"));
    }
}
