//! HTTP fetcher implementation
//!
//! This module performs exactly one network round trip per call and
//! classifies the outcome. It holds no crawl state and never retries;
//! retrying is the job of [`RetryPolicy`](super::RetryPolicy).

use crate::config::{CrawlerConfig, UserAgentConfig};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Classified reasons a fetch did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("redirect chain too long: {0}")]
    TooManyRedirects(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Other(String),
}

/// Outcome classification of a single fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    /// 2xx response with its body
    Success {
        status: u16,
        /// Final URL after redirects
        final_url: String,
        body: String,
    },

    /// Transient failure worth another attempt
    Retryable(FetchError),

    /// Permanent failure for this page
    Fatal(FetchError),
}

impl FetchStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Success { .. } => None,
            Self::Retryable(e) | Self::Fatal(e) => Some(e),
        }
    }
}

/// Result of one fetch round trip
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub url: Url,
    pub status: FetchStatus,
    pub elapsed: Duration,
}

/// Capability performing a single HTTP GET
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> FetchResult;
}

/// Builds the HTTP client used for crawling
///
/// # Arguments
///
/// * `user_agent` - The user agent identification
/// * `crawler` - Connect timeout and redirect limit
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    crawler: &CrawlerConfig,
) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        user_agent.crawler_name,
        user_agent.crawler_version,
        user_agent.contact_url,
        user_agent.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(crawler.connect_timeout())
        .redirect(Policy::limited(crawler.max_redirects as usize))
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed [`Fetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(
        user_agent: &UserAgentConfig,
        crawler: &CrawlerConfig,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(user_agent, crawler)?))
    }

    async fn round_trip(&self, url: &Url, timeout: Duration) -> FetchStatus {
        let response = match self.client.get(url.clone()).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return classify_error(&e),
        };

        let status = response.status();
        if !status.is_success() {
            return classify_status(status);
        }

        let final_url = response.url().to_string();
        match response.text().await {
            Ok(body) => FetchStatus::Success {
                status: status.as_u16(),
                final_url,
                body,
            },
            Err(e) if e.is_timeout() => FetchStatus::Retryable(FetchError::Timeout),
            Err(e) => FetchStatus::Retryable(FetchError::Body(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> FetchResult {
        let started = Instant::now();
        let status = self.round_trip(url, timeout).await;
        let elapsed = started.elapsed();

        tracing::trace!("Fetched {} in {:?}: {:?}", url, elapsed, status.error());

        FetchResult {
            url: url.clone(),
            status,
            elapsed,
        }
    }
}

/// Maps a non-2xx status to its fetch outcome
///
/// | Status | Outcome |
/// |--------|---------|
/// | 429 | Retryable |
/// | 5xx | Retryable |
/// | other 4xx | Fatal |
/// | 1xx / unfollowed 3xx | Fatal |
pub fn classify_status(status: StatusCode) -> FetchStatus {
    let error = FetchError::HttpStatus(status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchStatus::Retryable(error)
    } else {
        FetchStatus::Fatal(error)
    }
}

/// Maps a transport error to its fetch outcome
fn classify_error(e: &reqwest::Error) -> FetchStatus {
    if e.is_redirect() {
        FetchStatus::Fatal(FetchError::TooManyRedirects(e.to_string()))
    } else if e.is_builder() {
        FetchStatus::Fatal(FetchError::InvalidUrl(e.to_string()))
    } else if e.is_timeout() {
        FetchStatus::Retryable(FetchError::Timeout)
    } else if e.is_connect() {
        FetchStatus::Retryable(FetchError::Connect(e.to_string()))
    } else if e.is_body() || e.is_decode() {
        FetchStatus::Retryable(FetchError::Body(e.to_string()))
    } else {
        FetchStatus::Retryable(FetchError::Other(e.to_string()))
    }
}
