//! HTTP collaborator used by the download loop.
//!
//! The loop only needs `GET(url) -> { status, headers, body }`, expressed by the
//! [`HttpFetch`] trait so tests and embedders can substitute their own
//! transport. [`HttpClient`] is the reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// A fully received HTTP response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Entire response body.
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// Builds a response from its parts.
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network capability: fetch one URL in full.
///
/// Any returned error sends the download loop down its retry path.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Performs a GET request and reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on invalid URLs, network failures, timeouts,
    /// and (if the implementation chooses) non-success statuses.
    async fn get(&self, url: &str) -> Result<FetchedResponse, DownloadError>;
}

/// Settings for [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout, body included.
    pub read_timeout: Duration,
    /// Surface non-2xx responses as [`DownloadError::HttpStatus`] instead of
    /// returning them for saving.
    pub fail_on_status: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            fail_on_status: false,
        }
    }
}

/// reqwest-backed [`HttpFetch`].
///
/// Create once and reuse; the inner client pools connections.
///
/// # Example
///
/// ```no_run
/// use heist_core::download::{ClientConfig, HttpClient, HttpFetch};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new(ClientConfig::default())?;
/// let response = client.get("https://example.com/files/1.png").await?;
/// println!("{} bytes, status {}", response.body.len(), response.status);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    fail_on_status: bool,
}

impl HttpClient {
    /// Builds a client with the given timeouts and status policy.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend or system
    /// configuration cannot be initialized.
    #[instrument(level = "debug")]
    pub fn new(config: ClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self {
            client,
            fail_on_status: config.fail_on_status,
        })
    }
}

fn map_request_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

#[async_trait]
impl HttpFetch for HttpClient {
    #[instrument(level = "debug", skip_all, fields(url = %url))]
    async fn get(&self, url: &str) -> Result<FetchedResponse, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_request_error(url, e))?;

        let status = response.status().as_u16();
        if self.fail_on_status && !response.status().is_success() {
            return Err(DownloadError::http_status(url, status));
        }

        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_request_error(url, e))?;

        debug!(status, bytes = body.len(), "response received");
        Ok(FetchedResponse::new(status, headers, body.to_vec()))
    }
}
