//! Bounded retries with exponential backoff around a [`Fetcher`]

use super::fetcher::{FetchResult, FetchStatus, Fetcher};
use crate::config::{CrawlerConfig, RetryConfig};
use crate::CrawlError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Suspends the caller between attempts
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Passed to the fetcher on every attempt
    pub request_timeout: Duration,
}

impl RetrySettings {
    pub fn from_config(retry: &RetryConfig, crawler: &CrawlerConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            request_timeout: crawler.request_timeout(),
        }
    }
}

/// Final fetch result plus how many attempts it took
#[derive(Debug, Clone)]
pub struct Attempted {
    pub result: FetchResult,
    pub attempts: u32,
}

/// Backoff before retry number `attempt` (1-based, counting failed attempts)
///
/// `min(base * 2^(attempt-1) + jitter, cap)`
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration, jitter: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exp)
        .saturating_add(jitter)
        .min(cap)
}

/// Uniform jitter in `[0, base)`
fn random_jitter(base: Duration) -> Duration {
    let max = base.as_millis() as u64;
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max))
}

/// Wraps a fetcher with bounded retries
#[derive(Clone)]
pub struct RetryPolicy {
    fetcher: Arc<dyn Fetcher>,
    sleeper: Arc<dyn Sleeper>,
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: RetrySettings) -> Self {
        Self::with_sleeper(fetcher, Arc::new(TokioSleeper), settings)
    }

    pub fn with_sleeper(
        fetcher: Arc<dyn Fetcher>,
        sleeper: Arc<dyn Sleeper>,
        settings: RetrySettings,
    ) -> Self {
        Self {
            fetcher,
            sleeper,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Fetches `url`, retrying Retryable outcomes
    ///
    /// Fatal outcomes return at once. When attempts run out the last
    /// Retryable result is returned. Both the in-flight request and the
    /// backoff sleep are abandoned as soon as `cancel` fires.
    ///
    /// # Returns
    ///
    /// * `Ok(Attempted)` - The final result and the number of attempts made
    /// * `Err(CrawlError::Cancelled)` - The token fired first
    pub async fn execute(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Attempted, CrawlError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                result = self.fetcher.fetch(url, self.settings.request_timeout) => result,
            };

            let retry_error = match &result.status {
                FetchStatus::Retryable(e) => Some(e.to_string()),
                FetchStatus::Success { .. } | FetchStatus::Fatal(_) => None,
            };
            let Some(error) = retry_error else {
                return Ok(Attempted {
                    result,
                    attempts: attempt,
                });
            };

            if attempt >= self.settings.max_attempts {
                tracing::warn!(
                    "Giving up on {} after {} attempts: {}",
                    url,
                    attempt,
                    error
                );
                return Ok(Attempted {
                    result,
                    attempts: attempt,
                });
            }

            let delay = backoff_delay(
                attempt,
                self.settings.base_delay,
                self.settings.max_delay,
                random_jitter(self.settings.base_delay),
            );
            tracing::warn!(
                "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                attempt,
                self.settings.max_attempts,
                url,
                error,
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                _ = self.sleeper.sleep(delay) => {}
            }
        }
    }
}
