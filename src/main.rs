//! Catalog crawler main entry point
//!
//! This is the command-line interface for the scheduled catalog crawler.

use anyhow::Context;
use catalog_crawler::alert::{Alerter, FanoutAlerter, LogAlerter, WebhookAlerter};
use catalog_crawler::config::{load_config_with_hash, AlertConfig, Config};
use catalog_crawler::crawler::{build_http_client, CrawlDeps, CrawlRunner, HttpFetcher, SelectorParser};
use catalog_crawler::output::{load_statistics, print_statistics, write_change_report};
use catalog_crawler::schedule::{
    AlertPolicy, RunLauncher, Scheduler, Trigger, TriggerOutcome, TriggerSource,
};
use catalog_crawler::sink::SqliteSink;
use catalog_crawler::storage::{lock_storage, open_storage, SharedStorage, SqliteHistory};
use catalog_crawler::{RunSummary, TerminationReason};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Catalog crawler: periodic, single-flight crawls of a catalog site
///
/// Each run crawls outward from the configured seeds, extracts records with
/// CSS selectors, and stores them with change detection. Runs are fired on an
/// interval or cron schedule; a run that is still going when the next one is
/// due causes that trigger to be skipped.
#[derive(Parser, Debug)]
#[command(name = "catalog-crawler")]
#[command(version = "1.0.0")]
#[command(about = "A scheduled, single-flight catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run one crawl now and exit instead of following the schedule
    #[arg(long, conflicts_with_all = ["dry_run", "history", "report"])]
    once: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["history", "report"])]
    dry_run: bool,

    /// Show run history statistics from the database and exit
    #[arg(long, conflicts_with = "report")]
    history: bool,

    /// Write the change report for the latest run and exit
    #[arg(long)]
    report: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.history {
        handle_history(&config)
    } else if cli.report {
        handle_report(&config)
    } else {
        handle_schedule(config, cli.once).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_crawler=info,warn"),
            1 => EnvFilter::new("catalog_crawler=debug,info"),
            2 => EnvFilter::new("catalog_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Catalog Crawler Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers per run: {}", config.crawler.concurrency);
    println!("  Request timeout: {}ms", config.crawler.request_timeout_ms);
    println!(
        "  Max pages per run: {}",
        config
            .crawler
            .max_pages
            .map_or("unlimited".to_string(), |n| n.to_string())
    );
    println!(
        "  Max run duration: {}",
        config
            .crawler
            .max_run_duration_secs
            .map_or("unlimited".to_string(), |s| format!("{}s", s))
    );

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms base, {}ms cap",
        config.retry.base_delay_ms, config.retry.max_delay_ms
    );

    println!("\nSchedule:");
    match (&config.schedule.interval_secs, &config.schedule.cron) {
        (Some(secs), _) => println!("  Every {}s", secs),
        (_, Some(cron)) => println!("  Cron: {} (UTC)", cron),
        _ => println!("  (none)"),
    }
    println!("  Run on start: {}", config.schedule.run_on_start);

    println!("\nAlerts:");
    println!(
        "  After {} consecutive failed runs (failed page ratio > {})",
        config.alerts.failure_threshold, config.alerts.failed_page_ratio
    );
    if let Some(url) = &config.alerts.webhook_url {
        println!("  Webhook: {}", url);
    }

    println!("\nParser:");
    println!("  Follow: {}", config.parser.follow_selector);
    if let Some(selector) = &config.parser.record_selector {
        println!("  Records: {}", selector);
    }
    for (name, selector) in &config.parser.fields {
        println!("    {} <- {}", name, selector);
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Reports: {}", config.output.report_dir);

    println!("\nSeeds ({}):", config.crawler.seeds.len());
    for seed in &config.crawler.seeds {
        println!("  - {}", seed);
    }
    if !config.crawler.allowed_domains.is_empty() {
        println!("\nAllowed Domains ({}):", config.crawler.allowed_domains.len());
        for pattern in &config.crawler.allowed_domains {
            println!("  - {}", pattern);
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --history mode: shows run statistics from the database
fn handle_history(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(
        &storage,
        config.alerts.history_size,
        config.alerts.failed_page_ratio,
    )?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --report mode: writes the change report
fn handle_report(config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let outcome = write_change_report(&storage, Path::new(&config.output.report_dir))?;
    println!(
        "✓ Reports written to: {} and {}",
        outcome.path().display(),
        outcome.csv_path().display()
    );
    Ok(())
}

/// Writes the change report after every completed run
struct ReportingLauncher {
    inner: CrawlRunner,
    storage: SharedStorage,
    report_dir: PathBuf,
}

#[async_trait::async_trait]
impl RunLauncher for ReportingLauncher {
    async fn launch(&self, run_id: i64, cancel: CancellationToken) -> RunSummary {
        let summary = self.inner.launch(run_id, cancel).await;

        if summary.termination == TerminationReason::Completed {
            let storage = lock_storage(&self.storage);
            if let Err(e) = write_change_report(&*storage, &self.report_dir) {
                tracing::warn!("Failed to write change report for run {}: {}", run_id, e);
            }
        }

        summary
    }
}

fn build_alerter(config: &AlertConfig, client: reqwest::Client) -> Arc<dyn Alerter> {
    match &config.webhook_url {
        Some(url) => Arc::new(FanoutAlerter::new(vec![
            Box::new(LogAlerter),
            Box::new(
                WebhookAlerter::new(client, url.clone()).with_timeout(config.webhook_timeout()),
            ),
        ])),
        None => Arc::new(LogAlerter),
    }
}

/// Handles the default mode: runs on schedule until ctrl-c, or once with --once
async fn handle_schedule(config: Config, once: bool) -> anyhow::Result<()> {
    let storage: SharedStorage = Arc::new(Mutex::new(open_storage(Path::new(
        &config.output.database_path,
    ))?));

    let client = build_http_client(&config.user_agent, &config.crawler)
        .context("failed to build HTTP client")?;
    let deps = CrawlDeps::new(
        Arc::new(HttpFetcher::new(client.clone())),
        Arc::new(SelectorParser::from_config(&config.parser)?),
        Arc::new(SqliteSink::new(storage.clone())),
    );
    let launcher = ReportingLauncher {
        inner: CrawlRunner::from_config(deps, &config),
        storage: storage.clone(),
        report_dir: PathBuf::from(&config.output.report_dir),
    };

    let scheduler = Scheduler::new(
        Arc::new(launcher),
        build_alerter(&config.alerts, client),
        AlertPolicy::from_config(&config.alerts),
        config.alerts.history_size,
    )
    .with_history_log(Arc::new(SqliteHistory::new(storage.clone())))?;
    let scheduler = Arc::new(scheduler);

    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping");
                scheduler.shutdown();
            }
        });
    }

    if once {
        return match scheduler.trigger(TriggerSource::Manual).await {
            TriggerOutcome::Started(summary) => {
                tracing::info!(
                    "Run {} {}: {} fetched, {} failed, {} records",
                    summary.run_id,
                    summary.termination,
                    summary.pages_fetched,
                    summary.pages_failed,
                    summary.records_emitted
                );
                Ok(())
            }
            TriggerOutcome::Skipped => anyhow::bail!("run was skipped"),
        };
    }

    let trigger = Trigger::from_config(&config.schedule)?;
    tracing::info!(
        "Scheduler started with {} seed(s)",
        config.crawler.seeds.len()
    );

    scheduler
        .clone()
        .run_loop(trigger, config.schedule.run_on_start)
        .await;
    scheduler.wait_idle().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
