//! Alerting on repeated run failure
//!
//! The scheduler calls an [`Alerter`] once per failure-streak breach. Alert
//! errors are logged by the caller and never affect scheduling.

use crate::state::RunSummary;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Request timeout used by [`WebhookAlerter::new`]
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("Alert not delivered within {0:?}")]
    TimedOut(Duration),
}

#[async_trait::async_trait]
pub trait Alerter: Send + Sync {
    /// Reports that `streak` consecutive runs have failed, the last being `summary`
    async fn notify(&self, summary: &RunSummary, streak: u32) -> Result<(), AlertError>;
}

/// Writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerter;

#[async_trait::async_trait]
impl Alerter for LogAlerter {
    async fn notify(&self, summary: &RunSummary, streak: u32) -> Result<(), AlertError> {
        tracing::error!(
            "ALERT: {} consecutive failed runs; run {} ended {} ({} fetched, {} failed){}",
            streak,
            summary.run_id,
            summary.termination,
            summary.pages_fetched,
            summary.pages_failed,
            summary
                .error
                .as_deref()
                .map(|e| format!(": {}", e))
                .unwrap_or_default()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    consecutive_failures: u32,
    summary: &'a RunSummary,
}

/// Posts alerts as JSON to a webhook
///
/// Every POST carries its own timeout, independent of the client's.
#[derive(Debug, Clone)]
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookAlerter {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Alerter for WebhookAlerter {
    async fn notify(&self, summary: &RunSummary, streak: u32) -> Result<(), AlertError> {
        let payload = AlertPayload {
            consecutive_failures: streak,
            summary,
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AlertError::Status(response.status().as_u16()));
        }

        tracing::info!("Alert for run {} delivered to webhook", summary.run_id);
        Ok(())
    }
}

/// Sends every alert to each inner alerter, reporting the first error
pub struct FanoutAlerter {
    alerters: Vec<Box<dyn Alerter>>,
}

impl FanoutAlerter {
    pub fn new(alerters: Vec<Box<dyn Alerter>>) -> Self {
        Self { alerters }
    }
}

#[async_trait::async_trait]
impl Alerter for FanoutAlerter {
    async fn notify(&self, summary: &RunSummary, streak: u32) -> Result<(), AlertError> {
        let mut first_error = None;
        for alerter in &self.alerters {
            if let Err(e) = alerter.notify(summary, streak).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
