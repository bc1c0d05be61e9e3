//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted behind [`HttpClient`] so the same
//! transport runs over reqwest in production and over an in-process
//! loopback in tests.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use journal_sync_protocol::{
    BatchRequest, BatchResponse, Entry, ErrorBody, ManifestEntry, StatusResponse,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// HTTP method used by the sync endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST with a JSON body.
    Post,
}

/// A request as handed to an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Bearer token for the `Authorization` header.
    pub bearer_token: Option<String>,
    /// JSON body for POST requests.
    pub body: Option<Vec<u8>>,
}

/// A response as returned by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (connection refused,
/// reset, DNS failure). Non-2xx responses are `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends one request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// HTTP-based sync transport.
///
/// Every request is bounded by the configured timeout.
pub struct HttpTransport<C: HttpClient> {
    config: SyncConfig,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(config: SyncConfig, client: C) -> Self {
        Self {
            config,
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> SyncResult<HttpResponse> {
        let request = HttpRequest {
            method,
            url: self.config.url(path),
            bearer_token: self.config.bearer_token.clone(),
            body,
        };

        let outcome = tokio::time::timeout(self.config.timeout, self.client.send(request)).await;
        let result = match outcome {
            Err(_) => Err(SyncError::Timeout),
            Ok(Err(message)) => Err(SyncError::transport_retryable(message)),
            Ok(Ok(response)) => Ok(response),
        };

        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => {
                debug!(path, error = %e, "request failed");
                *self.last_error.write() = Some(e.to_string());
            }
        }
        result
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let response = self.send(HttpMethod::Get, path, None).await?;
        self.decode(path, response)
    }

    fn decode<T: DeserializeOwned>(&self, path: &str, response: HttpResponse) -> SyncResult<T> {
        if !response.is_success() {
            let err = server_error(&response);
            *self.last_error.write() = Some(err.to_string());
            return Err(err);
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::Protocol(format!("bad response from {path}: {e}")))
    }
}

fn server_error(response: &HttpResponse) -> SyncError {
    let message = match serde_json::from_slice::<ErrorBody>(&response.body) {
        Ok(body) => match body.details {
            Some(details) => format!("{}: {}", body.error, details),
            None => body.error,
        },
        Err(_) => String::from_utf8_lossy(&response.body).into_owned(),
    };
    SyncError::ServerError {
        status: response.status,
        message,
    }
}

#[async_trait]
impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    async fn get_global_hash(&self) -> SyncResult<String> {
        let status: StatusResponse = self.get_json("/sync/status").await?;
        Ok(status.global_hash)
    }

    async fn get_manifest(&self) -> SyncResult<Vec<ManifestEntry>> {
        self.get_json("/sync/manifest").await
    }

    async fn get_entry_body(&self, id: Uuid) -> SyncResult<Option<Entry>> {
        let path = format!("/sync/entries/{id}");
        let response = self.send(HttpMethod::Get, &path, None).await?;
        if response.status == 404 {
            return Ok(None);
        }
        self.decode(&path, response).map(Some)
    }

    async fn apply_batch(&self, batch: &BatchRequest) -> SyncResult<BatchResponse> {
        let body = batch.encode()?;
        let response = self
            .send(HttpMethod::Post, "/sync/batch", Some(body))
            .await?;
        self.decode("/sync/batch", response)
    }
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self
                .client
                .post(&request.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json"),
        };
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Trait for servers that can answer loopback requests.
///
/// `request.url` is reduced to its path before it reaches the server.
#[async_trait]
pub trait LoopbackServer: Send + Sync {
    /// Handles one request.
    async fn handle(&self, request: HttpRequest) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server in the
/// same process.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, String> {
        if let Some(i) = request.url.find("/sync/") {
            request.url = request.url[i..].to_string();
        }
        Ok(self.server.handle(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
        delay: Option<Duration>,
    }

    impl TestClient {
        fn answering(status: u16, body: &[u8]) -> Self {
            Self {
                response: Mutex::new(Some(HttpResponse {
                    status,
                    body: body.to_vec(),
                })),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.response
                .lock()
                .clone()
                .ok_or_else(|| "connection refused".to_string())
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::new("https://journal.example.com").with_bearer_token("tok")
    }

    #[tokio::test]
    async fn status_request_shape() {
        let client = TestClient::answering(200, br#"{"globalHash":"abc"}"#);
        let transport = HttpTransport::new(config(), client);

        assert_eq!(transport.get_global_hash().await.unwrap(), "abc");
        let requests = transport.client.requests.lock();
        assert_eq!(requests[0].method, HttpMethod::Get);
        assert_eq!(requests[0].url, "https://journal.example.com/sync/status");
        assert_eq!(requests[0].bearer_token.as_deref(), Some("tok"));
        assert!(transport.last_error().is_none());
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let client = TestClient::answering(404, br#"{"error":"Entry not found"}"#);
        let transport = HttpTransport::new(config(), client);
        assert!(transport
            .get_entry_body(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn server_error_carries_status_and_message() {
        let client = TestClient::answering(400, br#"{"error":"Invalid request","details":"bad"}"#);
        let transport = HttpTransport::new(config(), client);
        let batch = BatchRequest::new(vec![Entry::new("a", None, Utc::now())], vec![]);

        match transport.apply_batch(&batch).await {
            Err(SyncError::ServerError { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid request: bad");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(transport.last_error().is_some());
        let requests = transport.client.requests.lock();
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert!(requests[0].body.is_some());
    }

    #[tokio::test]
    async fn connection_failure_is_retryable() {
        let transport = HttpTransport::new(config(), TestClient::default());
        let err = transport.get_manifest().await.unwrap_err();
        assert!(matches!(err, SyncError::Transport { retryable: true, .. }));
    }

    #[tokio::test]
    async fn garbage_body_is_protocol_error() {
        let client = TestClient::answering(200, b"<html>");
        let transport = HttpTransport::new(config(), client);
        assert!(matches!(
            transport.get_manifest().await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn hung_request_times_out() {
        let client = TestClient {
            delay: Some(Duration::from_secs(60)),
            ..TestClient::answering(200, b"[]")
        };
        let config = config().with_timeout(Duration::from_millis(50));
        let transport = HttpTransport::new(config, client);
        assert_eq!(transport.timeout(), Duration::from_millis(50));
        assert!(matches!(
            transport.get_manifest().await,
            Err(SyncError::Timeout)
        ));
    }
}
