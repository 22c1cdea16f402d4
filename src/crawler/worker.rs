//! Worker pool for one crawl run
//!
//! Workers pull from the shared [`Frontier`]; there is no dispatcher. Each
//! worker keeps its own [`WorkerTally`] and returns it on exit, so nothing but
//! the frontier is mutated by more than one worker.

use super::frontier::{ClaimedUrl, Frontier, Next, PageOutcome};
use super::parser::PageParser;
use super::retry::RetryPolicy;
use super::fetcher::FetchStatus;
use crate::sink::RecordSink;
use crate::url::CrawlScope;
use crate::CrawlError;
use futures::FutureExt;
use std::any::Any;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Per-worker counters, summed by the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTally {
    /// Pages completed as Done
    pub pages_fetched: u64,
    /// Pages completed as Failed
    pub pages_failed: u64,
    /// Records the sink accepted
    pub records_emitted: u64,
    /// Records the sink rejected
    pub sink_errors: u64,
}

impl AddAssign for WorkerTally {
    fn add_assign(&mut self, other: Self) {
        self.pages_fetched += other.pages_fetched;
        self.pages_failed += other.pages_failed;
        self.records_emitted += other.records_emitted;
        self.sink_errors += other.sink_errors;
    }
}

/// Collaborators shared by every worker of a run
pub struct WorkerShared {
    pub frontier: Arc<Frontier>,
    pub retry: RetryPolicy,
    pub parser: Arc<dyn PageParser>,
    pub sink: Arc<dyn RecordSink>,
    pub scope: CrawlScope,
    pub idle_poll: Duration,
}

/// Combined result of all workers
#[derive(Debug, Default)]
pub struct PoolReport {
    pub tally: WorkerTally,
    /// First panic or coordination failure, if any
    pub error: Option<String>,
}

struct Worker {
    id: usize,
    shared: Arc<WorkerShared>,
    cancel: CancellationToken,
    tally: WorkerTally,
}

impl Worker {
    async fn run(&mut self) -> Result<(), CrawlError> {
        loop {
            let claimed = match self
                .shared
                .frontier
                .next(&self.cancel, self.shared.idle_poll)
                .await?
            {
                Next::Claimed(claimed) => claimed,
                Next::Quiescent | Next::BudgetExhausted | Next::Cancelled => {
                    tracing::trace!("Worker {} exiting", self.id);
                    return Ok(());
                }
            };

            if !self.process(&claimed).await? {
                return Ok(());
            }
        }
    }

    /// Fetches, parses and completes one page
    ///
    /// Returns `Ok(false)` when cancelled mid-page; the entry then stays
    /// InFlight.
    async fn process(&mut self, claimed: &ClaimedUrl) -> Result<bool, CrawlError> {
        tracing::debug!("Worker {} fetching {}", self.id, claimed.url);

        let attempted = match self.shared.retry.execute(&claimed.url, &self.cancel).await {
            Ok(attempted) => attempted,
            Err(CrawlError::Cancelled) => return Ok(false),
            Err(e) => return Err(e),
        };

        let outcome = match &attempted.result.status {
            FetchStatus::Success { final_url, body, .. } => {
                let base = Url::parse(final_url).unwrap_or_else(|_| claimed.url.clone());
                match self.handle_body(body, &base).await {
                    Some(outcome) => outcome,
                    None => return Ok(false),
                }
            }
            FetchStatus::Retryable(e) | FetchStatus::Fatal(e) => {
                tracing::warn!(
                    "Failed {} after {} attempt(s): {}",
                    claimed.url,
                    attempted.attempts,
                    e
                );
                PageOutcome::Failed
            }
        };

        self.shared
            .frontier
            .complete(&claimed.key, outcome, attempted.attempts)?;

        match outcome {
            PageOutcome::Done => self.tally.pages_fetched += 1,
            PageOutcome::Failed => self.tally.pages_failed += 1,
        }
        Ok(true)
    }

    /// Returns None when cancelled while handing records to the sink
    async fn handle_body(&mut self, body: &str, url: &Url) -> Option<PageOutcome> {
        let page = match self.shared.parser.parse(body, url) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("Parse failed for {}: {}", url, e);
                return Some(PageOutcome::Failed);
            }
        };

        for link in &page.links {
            self.discover(link);
        }

        for record in &page.records {
            let upserted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Worker {} cancelled while storing {}", self.id, record.key);
                    return None;
                }
                result = self.shared.sink.upsert(record) => result,
            };

            match upserted {
                Ok(()) => self.tally.records_emitted += 1,
                Err(e) => {
                    tracing::warn!("Sink rejected record {}: {}", record.key, e);
                    self.tally.sink_errors += 1;
                }
            }
        }

        Some(PageOutcome::Done)
    }

    fn discover(&self, link: &str) {
        let in_scope = Url::parse(link)
            .map(|url| self.shared.scope.allows(&url))
            .unwrap_or(false);
        if !in_scope {
            tracing::trace!("Skipping out-of-scope link {}", link);
            return;
        }

        if let Err(e) = self.shared.frontier.discover(link) {
            tracing::debug!("Ignoring link {}: {}", link, e);
        }
    }
}

/// A fixed number of workers for the lifetime of one run
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs all workers until the frontier is drained or `cancel` fires
    ///
    /// A worker that panics or hits a coordination failure cancels `cancel`
    /// so its siblings stop too; the first such error is reported.
    pub async fn run(&self, shared: Arc<WorkerShared>, cancel: CancellationToken) -> PoolReport {
        let handles: Vec<_> = (0..self.size)
            .map(|id| {
                let shared = shared.clone();
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    let mut worker = Worker {
                        id,
                        shared,
                        cancel: cancel.clone(),
                        tally: WorkerTally::default(),
                    };

                    let result = std::panic::AssertUnwindSafe(worker.run())
                        .catch_unwind()
                        .await;

                    let error = match result {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => {
                            tracing::error!("Worker {} exited with error: {}", id, err);
                            Some(format!("worker {} failed: {}", id, err))
                        }
                        Err(panic_payload) => {
                            let message = panic_message(panic_payload.as_ref());
                            tracing::error!("Worker {} panicked: {}", id, message);
                            Some(format!("worker {} panicked: {}", id, message))
                        }
                    };

                    if error.is_some() {
                        cancel.cancel();
                    }
                    (worker.tally, error)
                })
            })
            .collect();

        let mut report = PoolReport::default();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((tally, error)) => {
                    report.tally += tally;
                    if report.error.is_none() {
                        report.error = error;
                    }
                }
                Err(e) => {
                    cancel.cancel();
                    report.error.get_or_insert_with(|| format!("worker task failed: {}", e));
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
