//! One bounded crawl execution

use super::fetcher::Fetcher;
use super::frontier::Frontier;
use super::parser::PageParser;
use super::retry::{RetryPolicy, RetrySettings, Sleeper, TokioSleeper};
use super::worker::{PoolReport, WorkerPool, WorkerShared};
use crate::config::Config;
use crate::schedule::RunLauncher;
use crate::sink::RecordSink;
use crate::state::{RunSummary, TerminationReason};
use crate::url::{CrawlScope, NormalizationRules};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capabilities a run is built from
#[derive(Clone)]
pub struct CrawlDeps {
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn PageParser>,
    pub sink: Arc<dyn RecordSink>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl CrawlDeps {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn PageParser>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            sink,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Number of workers (W)
    pub concurrency: usize,
    pub retry: RetrySettings,
    pub idle_poll: Duration,
    pub scope: CrawlScope,
    pub rules: NormalizationRules,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.crawler.concurrency as usize,
            retry: RetrySettings::from_config(&config.retry, &config.crawler),
            idle_poll: config.crawler.idle_poll(),
            scope: CrawlScope::from_config(&config.crawler.allowed_domains, &config.crawler.seeds),
            rules: NormalizationRules::from(&config.normalization),
        }
    }
}

/// Ceilings that end a run early
#[derive(Debug, Clone, Copy, Default)]
pub struct RunBudget {
    /// Pages claimed before the run is aborted
    pub max_pages: Option<u64>,
    /// Wall-clock limit before the run times out
    pub max_duration: Option<Duration>,
}

impl RunBudget {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_pages: config.crawler.max_pages,
            max_duration: config.crawler.max_run_duration(),
        }
    }
}

/// A single crawl run: one frontier, one worker pool, one summary
///
/// `run` consumes the value, so a frontier never outlives its run.
pub struct CrawlRun {
    deps: CrawlDeps,
    settings: RunSettings,
    budget: RunBudget,
    frontier: Arc<Frontier>,
}

impl CrawlRun {
    pub fn new(deps: CrawlDeps, settings: RunSettings, budget: RunBudget) -> Self {
        let frontier = Arc::new(Frontier::with_budget(
            settings.rules.clone(),
            budget.max_pages,
        ));
        Self {
            deps,
            settings,
            budget,
            frontier,
        }
    }

    /// The run's frontier, for inspection
    pub fn frontier(&self) -> Arc<Frontier> {
        self.frontier.clone()
    }

    /// Crawls from `seeds` until quiescence or a ceiling
    ///
    /// # Termination
    ///
    /// | Condition | Reason |
    /// |-----------|--------|
    /// | Frontier quiescent | Completed |
    /// | Page budget spent with work left | Aborted |
    /// | `cancel` fired | Aborted |
    /// | Worker panic / coordination failure | Aborted |
    /// | Wall-clock ceiling hit | TimedOut |
    pub async fn run(self, run_id: i64, seeds: &[String], cancel: CancellationToken) -> RunSummary {
        let started_at = Utc::now();
        tracing::info!(
            "Starting run {} with {} seed(s) and {} worker(s)",
            run_id,
            seeds.len(),
            self.settings.concurrency
        );

        if let Err(e) = self.deps.sink.begin_run(run_id).await {
            tracing::warn!("Sink failed to prepare run {}: {}", run_id, e);
        }

        for seed in seeds {
            if let Err(e) = self.frontier.discover(seed) {
                tracing::warn!("Skipping invalid seed {}: {}", seed, e);
            }
        }

        let run_token = cancel.child_token();
        let shared = Arc::new(WorkerShared {
            frontier: self.frontier.clone(),
            retry: RetryPolicy::with_sleeper(
                self.deps.fetcher.clone(),
                self.deps.sleeper.clone(),
                self.settings.retry.clone(),
            ),
            parser: self.deps.parser.clone(),
            sink: self.deps.sink.clone(),
            scope: self.settings.scope.clone(),
            idle_poll: self.settings.idle_poll,
        });

        let workers = WorkerPool::new(self.settings.concurrency);
        let pool = workers.run(shared, run_token.clone());
        tokio::pin!(pool);

        let (report, timed_out) = match self.budget.max_duration {
            Some(limit) => match tokio::time::timeout(limit, &mut pool).await {
                Ok(report) => (report, false),
                Err(_) => {
                    tracing::warn!("Run {} hit its {:?} time limit", run_id, limit);
                    run_token.cancel();
                    (pool.await, true)
                }
            },
            None => (pool.await, false),
        };

        let termination = self.termination(&report, timed_out, &cancel);
        let snapshot = self.frontier.snapshot();
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            pages_fetched: report.tally.pages_fetched,
            pages_failed: report.tally.pages_failed,
            records_emitted: report.tally.records_emitted,
            sink_errors: report.tally.sink_errors,
            termination,
            error: report.error,
        };

        tracing::info!(
            "Run {} finished: {} ({} fetched, {} failed, {} records, {} left pending, {} in flight)",
            run_id,
            summary.termination,
            summary.pages_fetched,
            summary.pages_failed,
            summary.records_emitted,
            snapshot.pending,
            snapshot.in_flight
        );

        summary
    }

    fn termination(
        &self,
        report: &PoolReport,
        timed_out: bool,
        cancel: &CancellationToken,
    ) -> TerminationReason {
        if report.error.is_some() {
            TerminationReason::Aborted
        } else if timed_out {
            TerminationReason::TimedOut
        } else if cancel.is_cancelled() {
            TerminationReason::Aborted
        } else if self.frontier.budget_exhausted() && !self.frontier.is_quiescent() {
            TerminationReason::Aborted
        } else {
            TerminationReason::Completed
        }
    }
}

/// Launches a fresh [`CrawlRun`] from fixed seeds for every scheduled run
#[derive(Clone)]
pub struct CrawlRunner {
    deps: CrawlDeps,
    settings: RunSettings,
    budget: RunBudget,
    seeds: Vec<String>,
}

impl CrawlRunner {
    pub fn new(deps: CrawlDeps, settings: RunSettings, budget: RunBudget, seeds: Vec<String>) -> Self {
        Self {
            deps,
            settings,
            budget,
            seeds,
        }
    }

    pub fn from_config(deps: CrawlDeps, config: &Config) -> Self {
        Self::new(
            deps,
            RunSettings::from_config(config),
            RunBudget::from_config(config),
            config.crawler.seeds.clone(),
        )
    }
}

#[async_trait::async_trait]
impl RunLauncher for CrawlRunner {
    async fn launch(&self, run_id: i64, cancel: CancellationToken) -> RunSummary {
        CrawlRun::new(self.deps.clone(), self.settings.clone(), self.budget)
            .run(run_id, &self.seeds, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::{FetchError, FetchResult, FetchStatus};
    use crate::crawler::parser::{ParseError, ParsedPage};
    use crate::record::Record;
    use crate::sink::SinkError;
    use crate::state::PageState;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use url::Url;

    /// Serves a fixed site map: path -> (status, outgoing links)
    struct SiteFetcher {
        pages: HashMap<String, FetchStatus>,
        delay: Duration,
    }

    impl SiteFetcher {
        fn new(pages: &[(&str, FetchStatus)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(p, s)| (p.to_string(), s.clone()))
                    .collect(),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for SiteFetcher {
        async fn fetch(&self, url: &Url, _timeout: Duration) -> FetchResult {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let status = self
                .pages
                .get(url.path())
                .cloned()
                .unwrap_or(FetchStatus::Fatal(FetchError::HttpStatus(404)));
            FetchResult {
                url: url.clone(),
                status,
                elapsed: self.delay,
            }
        }
    }

    /// Body is a whitespace-separated list of links; every page is a record
    struct LinkListParser;

    impl PageParser for LinkListParser {
        fn parse(&self, body: &str, url: &Url) -> Result<ParsedPage, ParseError> {
            if body == "panic" {
                panic!("parser blew up");
            }
            Ok(ParsedPage {
                records: vec![Record::new(url.path(), url.as_str(), serde_json::json!({}))],
                links: body
                    .split_whitespace()
                    .filter_map(|l| url.join(l).ok())
                    .map(|u| u.to_string())
                    .collect(),
            })
        }
    }

    #[derive(Default)]
    struct VecSink {
        records: Mutex<Vec<Record>>,
        reject: bool,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl RecordSink for VecSink {
        async fn upsert(&self, record: &Record) -> Result<(), SinkError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.reject {
                return Err(SinkError::Rejected("read-only".to_string()));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn page(links: &str) -> FetchStatus {
        FetchStatus::Success {
            status: 200,
            final_url: String::new(),
            body: links.to_string(),
        }
    }

    fn settings(concurrency: usize) -> RunSettings {
        RunSettings {
            concurrency,
            retry: RetrySettings {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                request_timeout: Duration::from_secs(1),
            },
            idle_poll: Duration::from_millis(20),
            scope: CrawlScope::new(vec!["site.test".to_string()]),
            rules: NormalizationRules::default(),
        }
    }

    fn deps(fetcher: SiteFetcher, sink: Arc<VecSink>) -> CrawlDeps {
        CrawlDeps::new(Arc::new(fetcher), Arc::new(LinkListParser), sink)
    }

    fn seeds() -> Vec<String> {
        vec!["https://site.test/".to_string()]
    }

    #[tokio::test]
    async fn test_run_completes_on_cyclic_graph() {
        let fetcher = SiteFetcher::new(&[
            ("/", page("/a /b https://elsewhere.test/x")),
            ("/a", page("/b / /a#frag")),
            ("/b", page("/a /missing")),
        ]);
        let sink = Arc::new(VecSink::default());
        let run = CrawlRun::new(deps(fetcher, sink.clone()), settings(3), RunBudget::default());
        let frontier = run.frontier();

        let summary = run.run(1, &seeds(), CancellationToken::new()).await;

        assert_eq!(summary.termination, TerminationReason::Completed);
        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.records_emitted, 3);
        assert!(frontier.is_quiescent());
        assert!(frontier.entry("https://elsewhere.test/x").is_none());
        assert_eq!(
            frontier.entry("https://site.test/missing").unwrap().state,
            PageState::Failed
        );
        assert_eq!(sink.records.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_page_budget_aborts() {
        let fetcher = SiteFetcher::new(&[
            ("/", page("/1 /2 /3 /4")),
            ("/1", page("")),
            ("/2", page("")),
            ("/3", page("")),
            ("/4", page("")),
        ]);
        let budget = RunBudget {
            max_pages: Some(2),
            max_duration: None,
        };
        let run = CrawlRun::new(deps(fetcher, Arc::new(VecSink::default())), settings(1), budget);

        let summary = run.run(1, &seeds(), CancellationToken::new()).await;

        assert_eq!(summary.termination, TerminationReason::Aborted);
        assert_eq!(summary.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_time_limit_times_out() {
        let mut fetcher = SiteFetcher::new(&[("/", page(""))]);
        fetcher.delay = Duration::from_secs(30);
        let budget = RunBudget {
            max_pages: None,
            max_duration: Some(Duration::from_millis(50)),
        };
        let run = CrawlRun::new(deps(fetcher, Arc::new(VecSink::default())), settings(2), budget);
        let frontier = run.frontier();

        let started = std::time::Instant::now();
        let summary = run.run(1, &seeds(), CancellationToken::new()).await;

        assert_eq!(summary.termination, TerminationReason::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(frontier.snapshot().in_flight, 1);
    }

    #[tokio::test]
    async fn test_external_cancel_aborts() {
        let mut fetcher = SiteFetcher::new(&[("/", page(""))]);
        fetcher.delay = Duration::from_secs(30);
        let run = CrawlRun::new(
            deps(fetcher, Arc::new(VecSink::default())),
            settings(2),
            RunBudget::default(),
        );
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let summary = run.run(1, &seeds(), cancel).await;
        assert_eq!(summary.termination, TerminationReason::Aborted);
        assert!(summary.error.is_none());
    }

    #[tokio::test]
    async fn test_worker_panic_aborts_run() {
        let fetcher = SiteFetcher::new(&[("/", page("/a")), ("/a", page("panic"))]);
        let run = CrawlRun::new(
            deps(fetcher, Arc::new(VecSink::default())),
            settings(2),
            RunBudget::default(),
        );

        let summary = run.run(1, &seeds(), CancellationToken::new()).await;

        assert_eq!(summary.termination, TerminationReason::Aborted);
        assert!(summary.error.unwrap().contains("parser blew up"));
    }

    #[tokio::test]
    async fn test_sink_errors_do_not_fail_pages() {
        let fetcher = SiteFetcher::new(&[("/", page("/a")), ("/a", page(""))]);
        let sink = Arc::new(VecSink {
            reject: true,
            ..VecSink::default()
        });
        let run = CrawlRun::new(deps(fetcher, sink), settings(2), RunBudget::default());

        let summary = run.run(1, &seeds(), CancellationToken::new()).await;

        assert_eq!(summary.termination, TerminationReason::Completed);
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.pages_failed, 0);
        assert_eq!(summary.records_emitted, 0);
        assert_eq!(summary.sink_errors, 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_sink() {
        let fetcher = SiteFetcher::new(&[("/", page(""))]);
        let sink = Arc::new(VecSink {
            delay: Duration::from_secs(30),
            ..VecSink::default()
        });
        let run = CrawlRun::new(deps(fetcher, sink.clone()), settings(1), RunBudget::default());
        let frontier = run.frontier();
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let summary = run.run(1, &seeds(), cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(summary.termination, TerminationReason::Aborted);
        assert_eq!(summary.records_emitted, 0);
        assert_eq!(frontier.snapshot().in_flight, 1);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_valid_seeds_completes_empty() {
        let run = CrawlRun::new(
            deps(SiteFetcher::new(&[]), Arc::new(VecSink::default())),
            settings(2),
            RunBudget::default(),
        );

        let summary = run
            .run(1, &["ftp://site.test/".to_string()], CancellationToken::new())
            .await;

        assert_eq!(summary.termination, TerminationReason::Completed);
        assert_eq!(summary.pages_total(), 0);
    }
}
