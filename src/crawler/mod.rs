//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with status classification
//! - Retry with capped exponential backoff
//! - The deduplicating URL frontier
//! - HTML parsing into records and links
//! - The worker pool and the bounded crawl run that drives it

mod fetcher;
mod frontier;
mod parser;
mod retry;
mod run;
mod worker;

pub use fetcher::{
    build_http_client, classify_status, FetchError, FetchResult, FetchStatus, Fetcher, HttpFetcher,
};
pub use frontier::{
    Claim, ClaimedUrl, Frontier, FrontierEntry, FrontierSnapshot, Next, PageOutcome,
};
pub use parser::{
    record_key, FieldSelector, PageParser, ParseError, ParsedPage, SelectorParser,
};
pub use retry::{backoff_delay, Attempted, RetryPolicy, RetrySettings, Sleeper, TokioSleeper};
pub use run::{CrawlDeps, CrawlRun, CrawlRunner, RunBudget, RunSettings};
pub use worker::{PoolReport, WorkerPool, WorkerShared, WorkerTally};
