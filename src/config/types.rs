use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure, read once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
}

/// Crawl run behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// URLs every run starts from
    pub seeds: Vec<String>,

    /// Domain patterns links must match to be followed (e.g., "*.example.com").
    /// Empty means "the hosts of the seed URLs".
    #[serde(rename = "allowed-domains", default)]
    pub allowed_domains: Vec<String>,

    /// Number of concurrent workers per run
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Timeout for a single HTTP request (milliseconds)
    #[serde(rename = "request-timeout-ms", default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for establishing a connection (milliseconds)
    #[serde(rename = "connect-timeout-ms", default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum redirect hops before a fetch is treated as fatal
    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Maximum pages claimed in one run
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u64>,

    /// Maximum wall-clock duration of one run (seconds)
    #[serde(rename = "max-run-duration-secs", default)]
    pub max_run_duration_secs: Option<u64>,

    /// How long an idle worker waits before re-checking the frontier (milliseconds)
    #[serde(rename = "idle-poll-ms", default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn max_run_duration(&self) -> Option<Duration> {
        self.max_run_duration_secs.map(Duration::from_secs)
    }
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per page, including the first one
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// When runs are triggered
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Fixed interval between runs (seconds)
    #[serde(rename = "interval-secs", default)]
    pub interval_secs: Option<u64>,

    /// Five-field cron expression, evaluated in UTC
    #[serde(default)]
    pub cron: Option<String>,

    /// Fire one run immediately when the scheduler starts
    #[serde(rename = "run-on-start", default)]
    pub run_on_start: bool,
}

/// Failure streak and alerting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Consecutive failed runs before an alert is sent
    #[serde(rename = "failure-threshold", default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failed/total page ratio above which a completed run counts as failed
    #[serde(rename = "failed-page-ratio", default = "default_failed_page_ratio")]
    pub failed_page_ratio: f64,

    /// Number of run summaries kept in memory
    #[serde(rename = "history-size", default = "default_history_size")]
    pub history_size: usize,

    /// Optional webhook receiving alert payloads as JSON
    #[serde(rename = "webhook-url", default)]
    pub webhook_url: Option<String>,

    /// Per-request timeout for webhook delivery (milliseconds)
    #[serde(rename = "webhook-timeout-ms", default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
}

impl AlertConfig {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failed_page_ratio: default_failed_page_ratio(),
            history_size: default_history_size(),
            webhook_url: None,
            webhook_timeout_ms: default_webhook_timeout_ms(),
        }
    }
}

/// URL key normalization rules
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizationConfig {
    #[serde(rename = "strip-trailing-slash", default = "default_true")]
    pub strip_trailing_slash: bool,

    #[serde(rename = "sort-query", default = "default_true")]
    pub sort_query: bool,

    #[serde(rename = "strip-www", default)]
    pub strip_www: bool,

    /// Query parameters dropped from URL keys; `None` keeps the built-in tracking list
    #[serde(rename = "ignored-params", default)]
    pub ignored_params: Option<Vec<String>>,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            strip_trailing_slash: true,
            sort_query: true,
            strip_www: false,
            ignored_params: None,
        }
    }
}

/// Selector-driven page parser configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    /// Elements whose `href` is followed
    #[serde(rename = "follow-selector", default = "default_follow_selector")]
    pub follow_selector: String,

    /// A page yields a record only when this selector matches
    #[serde(rename = "record-selector", default)]
    pub record_selector: Option<String>,

    /// Natural key = Nth path segment counted from the end; URL key when absent
    #[serde(rename = "record-key-segment", default)]
    pub record_key_segment: Option<usize>,

    /// Record field name -> CSS selector whose text becomes the value.
    /// A trailing `@attr` reads that attribute instead of the text.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            follow_selector: default_follow_selector(),
            record_selector: None,
            record_key_segment: None,
            fields: BTreeMap::new(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving change reports
    #[serde(rename = "report-dir", default = "default_report_dir")]
    pub report_dir: String,
}

fn default_concurrency() -> u32 {
    10
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_redirects() -> u32 {
    10
}

fn default_idle_poll_ms() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_failed_page_ratio() -> f64 {
    0.5
}

fn default_history_size() -> usize {
    50
}

fn default_webhook_timeout_ms() -> u64 {
    10000
}

fn default_true() -> bool {
    true
}

fn default_follow_selector() -> String {
    "a[href]".to_string()
}

fn default_report_dir() -> String {
    "./reports".to_string()
}
