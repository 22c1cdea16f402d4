//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! full crawl runs end-to-end, from seed fetch to stored records.

use catalog_crawler::config::{parse_config, Config};
use catalog_crawler::crawler::{
    CrawlDeps, CrawlRun, CrawlRunner, HttpFetcher, RunBudget, RunSettings, SelectorParser,
};
use catalog_crawler::output::{write_change_report, ReportOutcome};
use catalog_crawler::schedule::{AlertPolicy, Scheduler, TriggerOutcome, TriggerSource};
use catalog_crawler::alert::LogAlerter;
use catalog_crawler::sink::SqliteSink;
use catalog_crawler::storage::{lock_storage, SharedStorage, SqliteHistory, SqliteStorage, Storage};
use catalog_crawler::{PageState, TerminationReason};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration crawling `seed` with `workers` workers
fn create_test_config(seed: &str, workers: u32, max_attempts: u32) -> Config {
    let toml = format!(
        r#"
[crawler]
seeds = ["{seed}"]
concurrency = {workers}
request-timeout-ms = 5000
idle-poll-ms = 20

[retry]
max-attempts = {max_attempts}
base-delay-ms = 1
max-delay-ms = 5

[schedule]
interval-secs = 3600

[parser]
record-selector = ".product"
record-key-segment = 1

[parser.fields]
title = "h1"
price = ".price"

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[output]
database-path = "./unused.db"
"#
    );
    parse_config(&toml).expect("test config should be valid")
}

fn product_page(title: &str, price: &str) -> String {
    format!(
        r#"<html><body><div class="product"><h1>{}</h1><p class="price">{}</p></div>
        <a href="/">Home</a></body></html>"#,
        title, price
    )
}

/// Mounts a catalog: `/` links to three product pages
async fn mount_catalog(server: &MockServer, price: &str) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <a href="/a">A</a> <a href="/b">B</a> <a href="/c">C</a>
                <a href="https://elsewhere.example.com/">Off-site</a>
            </body></html>"#,
        ))
        .mount(server)
        .await;

    for (p, title) in [("/a", "Alpha"), ("/b", "Beta"), ("/c", "Gamma")] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string(product_page(title, price)))
            .mount(server)
            .await;
    }
}

fn shared_storage() -> SharedStorage {
    Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()))
}

fn deps(config: &Config, storage: &SharedStorage) -> CrawlDeps {
    CrawlDeps::new(
        Arc::new(HttpFetcher::from_config(&config.user_agent, &config.crawler).unwrap()),
        Arc::new(SelectorParser::from_config(&config.parser).unwrap()),
        Arc::new(SqliteSink::new(storage.clone())),
    )
}

#[tokio::test]
async fn test_crawl_seed_and_three_links() {
    let server = MockServer::start().await;
    mount_catalog(&server, "£10.00").await;

    let seed = format!("{}/", server.uri());
    let config = create_test_config(&seed, 2, 3);
    let storage = shared_storage();

    let run = CrawlRun::new(
        deps(&config, &storage),
        RunSettings::from_config(&config),
        RunBudget::from_config(&config),
    );
    let frontier = run.frontier();
    let summary = run.run(1, &config.crawler.seeds, CancellationToken::new()).await;

    assert_eq!(summary.termination, TerminationReason::Completed);
    assert_eq!(summary.pages_fetched, 4);
    assert_eq!(summary.pages_failed, 0);
    assert_eq!(summary.records_emitted, 3);

    let snapshot = frontier.snapshot();
    assert_eq!(snapshot.done, 4);
    assert_eq!(snapshot.total(), 4);
    assert_eq!(frontier.entry(&seed).unwrap().state, PageState::Done);

    let storage = lock_storage(&storage);
    assert_eq!(storage.count_records().unwrap(), 3);
    let alpha = storage.get_record("a").unwrap().expect("record keyed by last segment");
    assert_eq!(alpha.payload["title"], "Alpha");
    assert_eq!(alpha.payload["price"], "£10.00");
}

#[tokio::test]
async fn test_seed_fails_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let config = create_test_config(&seed, 2, 3);
    let storage = shared_storage();

    let run = CrawlRun::new(
        deps(&config, &storage),
        RunSettings::from_config(&config),
        RunBudget::default(),
    );
    let frontier = run.frontier();
    let summary = run.run(1, &config.crawler.seeds, CancellationToken::new()).await;

    assert_eq!(summary.termination, TerminationReason::Completed);
    assert_eq!(summary.pages_fetched, 0);
    assert_eq!(summary.pages_failed, 1);

    let entry = frontier.entry(&seed).unwrap();
    assert_eq!(entry.state, PageState::Failed);
    assert_eq!(entry.attempts, 3);
}

#[tokio::test]
async fn test_seed_recovers_within_attempt_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let config = create_test_config(&seed, 1, 4);

    let run = CrawlRun::new(
        deps(&config, &shared_storage()),
        RunSettings::from_config(&config),
        RunBudget::default(),
    );
    let frontier = run.frontier();
    let summary = run.run(1, &config.crawler.seeds, CancellationToken::new()).await;

    assert_eq!(summary.pages_fetched, 1);
    let entry = frontier.entry(&seed).unwrap();
    assert_eq!(entry.state, PageState::Done);
    assert_eq!(entry.attempts, 4);
}

#[tokio::test]
async fn test_not_found_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let config = create_test_config(&seed, 2, 3);

    let run = CrawlRun::new(
        deps(&config, &shared_storage()),
        RunSettings::from_config(&config),
        RunBudget::default(),
    );
    let frontier = run.frontier();
    let summary = run.run(1, &config.crawler.seeds, CancellationToken::new()).await;

    assert_eq!(summary.termination, TerminationReason::Completed);
    assert_eq!(summary.pages_failed, 1);
    assert_eq!(frontier.entry(&seed).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_cancellation_aborts_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let config = create_test_config(&seed, 2, 3);
    let runner = CrawlRunner::from_config(deps(&config, &shared_storage()), &config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let started = Instant::now();
    let summary = catalog_crawler::schedule::RunLauncher::launch(&runner, 1, cancel).await;

    assert_eq!(summary.termination, TerminationReason::Aborted);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_page_budget_aborts_run() {
    let server = MockServer::start().await;
    mount_catalog(&server, "£1.00").await;

    let seed = format!("{}/", server.uri());
    let config = create_test_config(&seed, 1, 3);

    let run = CrawlRun::new(
        deps(&config, &shared_storage()),
        RunSettings::from_config(&config),
        RunBudget {
            max_pages: Some(2),
            max_duration: None,
        },
    );
    let summary = run.run(1, &config.crawler.seeds, CancellationToken::new()).await;

    assert_eq!(summary.termination, TerminationReason::Aborted);
    assert_eq!(summary.pages_total(), 2);
}

#[tokio::test]
async fn test_scheduler_single_flight_over_real_runs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let config = create_test_config(&seed, 2, 3);
    let storage = shared_storage();

    let scheduler = Scheduler::new(
        Arc::new(CrawlRunner::from_config(deps(&config, &storage), &config)),
        Arc::new(LogAlerter),
        AlertPolicy::from_config(&config.alerts),
        config.alerts.history_size,
    )
    .with_history_log(Arc::new(SqliteHistory::new(storage.clone())))
    .unwrap();

    let (first, second) = tokio::join!(
        scheduler.trigger(TriggerSource::Timer),
        scheduler.trigger(TriggerSource::Manual),
    );

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, TriggerOutcome::Started(_)))
            .count(),
        1
    );
    assert!(outcomes.contains(&TriggerOutcome::Skipped));

    let runs = lock_storage(&storage).recent_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, 1);
    assert_eq!(runs[0].termination, TerminationReason::Completed);
}

#[tokio::test]
async fn test_repeat_runs_detect_changes_and_report() {
    let reports = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let storage: SharedStorage = Arc::new(Mutex::new(
        SqliteStorage::new(&db_dir.path().join("catalog.db")).unwrap(),
    ));

    let server = MockServer::start().await;
    mount_catalog(&server, "£10.00").await;
    let seed = format!("{}/", server.uri());
    let config = create_test_config(&seed, 2, 3);

    let scheduler = Scheduler::new(
        Arc::new(CrawlRunner::from_config(deps(&config, &storage), &config)),
        Arc::new(LogAlerter),
        AlertPolicy::from_config(&config.alerts),
        config.alerts.history_size,
    )
    .with_history_log(Arc::new(SqliteHistory::new(storage.clone())))
    .unwrap();

    // First run: every record is new
    scheduler.trigger(TriggerSource::Manual).await;
    assert_eq!(lock_storage(&storage).recent_changes().unwrap().len(), 3);

    // Second run over identical pages: nothing changed
    scheduler.trigger(TriggerSource::Manual).await;
    {
        let storage = lock_storage(&storage);
        assert!(storage.recent_changes().unwrap().is_empty());
        let outcome = write_change_report(&*storage, reports.path()).unwrap();
        assert!(matches!(outcome, ReportOutcome::NoChanges { .. }));
    }

    // Third run after a price change
    server.reset().await;
    mount_catalog(&server, "£12.50").await;
    let TriggerOutcome::Started(summary) = scheduler.trigger(TriggerSource::Manual).await else {
        panic!("run should start");
    };
    assert_eq!(summary.run_id, 3);

    let storage = lock_storage(&storage);
    let changes = storage.recent_changes().unwrap();
    assert_eq!(changes.len(), 3);
    for change in &changes {
        assert_eq!(change.changed_fields.len(), 1);
        assert_eq!(change.changed_fields["price"].old, "£10.00");
        assert_eq!(change.changed_fields["price"].new, "£12.50");

        let record = storage.get_record(&change.record_key).unwrap().unwrap();
        let snapshot = storage
            .get_snapshot(record.raw_snapshot_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.run_id, 3);
        assert!(snapshot.html.contains("£12.50"));
    }

    let outcome = write_change_report(&*storage, reports.path()).unwrap();
    assert!(matches!(outcome, ReportOutcome::Written { changes: 3, .. }));
    assert!(outcome.csv_path().exists());
    assert_eq!(storage.recent_runs(10).unwrap().len(), 3);
}
