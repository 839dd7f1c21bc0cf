//! Pluggable HTTP transport.
//!
//! The interceptor never talks to the network directly; it goes through a
//! [`Transport`] so hosts can bring their own client and tests can script
//! responses. [`ReqwestTransport`] is the default, backed by a shared,
//! pooled [`reqwest::Client`].
//!
//! Nothing here retries. Retry and backoff belong to the player, which is
//! the only party that knows how urgent a request is.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Idle connections are kept this long for reuse across playlist refreshes.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Upper bound of idle connections per CDN host.
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Playlists and keys are small; anything past this is not something a
/// player should be buffering in memory.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// What came back from the wire, success or not.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Final URL after any upstream redirects
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP status.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("transport error: {0}")]
    Other(String),
}

/// A cancellable fetch capability.
///
/// Cancellation is by drop: the interceptor races the returned future
/// against the request's cancellation token and drops it when the player
/// abandons the request, so implementations must not detach work that
/// outlives the future.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn fetch(
        &self,
        url: &Url,
        headers: HeaderMap,
    ) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] over reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    /// Per-request timeout; `None` leaves it to the client
    timeout: Option<Duration>,
    max_body_bytes: usize,
}

impl ReqwestTransport {
    /// Build a transport with a pooled client.
    ///
    /// # Errors
    /// Returns the [`reqwest::Error`] if the TLS backend cannot be initialised.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()?;
        Ok(Self::with_client(client, timeout))
    }

    /// Wrap an existing client, e.g. one shared with the rest of the host.
    pub fn with_client(client: Client, timeout: Option<Duration>) -> Self {
        Self {
            client,
            timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(
        &self,
        url: &Url,
        headers: HeaderMap,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.get(url.clone()).headers(headers);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            warn!("HTTP fetch failed for {}: {}", url, e);
            classify(e)
        })?;

        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                warn!("Reading body failed for {}: {}", url, e);
                classify(e)
            })?;
            if body.len() + chunk.len() > self.max_body_bytes {
                warn!("Body of {} exceeds {} bytes, giving up", url, self.max_body_bytes);
                return Err(TransportError::BodyTooLarge(self.max_body_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        let body = body.freeze();

        debug!("Fetched {} -> {} ({} bytes)", url, status, body.len());

        Ok(TransportResponse {
            url: final_url,
            status,
            content_type,
            body,
        })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
