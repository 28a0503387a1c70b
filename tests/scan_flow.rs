//! End-to-end scan runs against an in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};

use oversold_screener::acquisition::{QuoteSource, Reachability, SourceChain, SyntheticSource};
use oversold_screener::config::ScanConfig;
use oversold_screener::error::{ScanError, SourceError};
use oversold_screener::models::{LogKind, PriceBar, ScanStatus};
use oversold_screener::scan::{ScanRunner, ScanTracker};
use oversold_screener::storage::Repository;

struct AlwaysFails;

#[async_trait]
impl QuoteSource for AlwaysFails {
    fn name(&self) -> &'static str {
        "broken-remote"
    }

    async fn fetch_price_history(&self, _symbol: &str) -> Result<Vec<PriceBar>, SourceError> {
        Err(SourceError::Status {
            status: 503,
            url: "http://remote.test".into(),
        })
    }
}

/// Returns a fixed-length, well-formed series without clearing any floor.
struct ShortHistory {
    sessions: usize,
}

#[async_trait]
impl QuoteSource for ShortHistory {
    fn name(&self) -> &'static str {
        "short-history"
    }

    fn remote(&self) -> bool {
        false
    }

    async fn fetch_price_history(&self, _symbol: &str) -> Result<Vec<PriceBar>, SourceError> {
        let start = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        Ok((0..self.sessions)
            .map(|i| PriceBar {
                date: start.checked_add_days(Days::new(i as u64)).unwrap(),
                close: 50.0 + i as f64,
            })
            .collect())
    }
}

struct Slow;

#[async_trait]
impl QuoteSource for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn remote(&self) -> bool {
        false
    }

    async fn fetch_price_history(&self, _symbol: &str) -> Result<Vec<PriceBar>, SourceError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Err(SourceError::Parse("slow source".into()))
    }
}

async fn repo_with(symbols: &[&str]) -> Arc<Repository> {
    let repo = Arc::new(Repository::open_in_memory().unwrap());
    repo.run_migrations().await.unwrap();
    let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
    repo.upsert_symbols(&symbols).await.unwrap();
    repo
}

fn runner(repo: &Arc<Repository>, chain: SourceChain, daily_skip: bool) -> Arc<ScanRunner> {
    Arc::new(ScanRunner::new(
        Arc::clone(repo),
        Arc::new(chain),
        Arc::new(ScanTracker::new()),
        ScanConfig {
            concurrency: 4,
            daily_skip,
        },
    ))
}

#[tokio::test]
async fn downed_remotes_still_produce_a_full_scan() {
    let repo = repo_with(&["TCS", "NMDC", "ZZTOP"]).await;
    let chain = SourceChain::new(
        vec![Arc::new(AlwaysFails), Arc::new(SyntheticSource::new(9))],
        Reachability::fixed(true),
    );
    let runner = runner(&repo, chain, false);

    let summary = runner.execute().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.errors, 0);

    let scan = repo.get_scan(summary.scan_id).await.unwrap().unwrap();
    assert_eq!(scan.status, ScanStatus::Completed);
    assert_eq!(scan.total_symbols, 3);
    assert!(scan.finished_at.is_some());

    let rows = repo.latest_recommendations(false).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.source.as_deref() == Some("synthetic")));
}

#[tokio::test]
async fn daily_skip_reuses_results_from_todays_completed_scan() {
    let repo = repo_with(&["TCS", "INFY"]).await;
    let chain = SourceChain::new(
        vec![Arc::new(SyntheticSource::new(9))],
        Reachability::fixed(true),
    );
    let runner = runner(&repo, chain, true);

    let first = runner.execute().await.unwrap();
    assert_eq!(first.completed, 2);

    let second = runner.execute().await.unwrap();
    assert_eq!(second.completed, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.errors, 0);

    // The rerun wrote no result rows, so the per-symbol latest still points
    // at the first scan.
    let rows = repo.latest_recommendations(false).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.scan_id == first.scan_id));

    let logs = repo.scan_logs(second.scan_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.kind == LogKind::Skip));
}

#[tokio::test]
async fn a_second_scan_is_refused_while_one_runs() {
    let repo = repo_with(&["TCS"]).await;
    let chain = SourceChain::new(
        vec![Arc::new(Slow), Arc::new(SyntheticSource::new(9))],
        Reachability::fixed(true),
    );
    let runner = runner(&repo, chain, false);

    let scan_id = runner.start_detached().await.unwrap();
    match runner.execute().await {
        Err(ScanError::AlreadyRunning(active)) => assert_eq!(active, scan_id),
        Ok(_) => panic!("second scan should be refused"),
        Err(e) => panic!("unexpected error {e}"),
    }
}

#[tokio::test]
async fn thin_history_is_ignored_not_failed() {
    let repo = repo_with(&["TCS"]).await;
    let chain = SourceChain::new(
        vec![Arc::new(ShortHistory { sessions: 20 })],
        Reachability::fixed(true),
    );
    let runner = runner(&repo, chain, false);

    let summary = runner.execute().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.errors, 0);

    let logs = repo.scan_logs(summary.scan_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, LogKind::Ignore);
    assert_eq!(logs[0].symbol.as_deref(), Some("TCS"));

    // The row is persisted with undefined indicators and no recommendation.
    let detail = repo
        .symbol_detail("TCS", Some(summary.scan_id))
        .await
        .unwrap()
        .unwrap();
    assert!(detail.close.is_some());
    assert!(detail.rsi14.is_none());
    assert!(detail.sma20.is_none());
    assert_eq!(detail.recommended, Some(false));
    assert_eq!(detail.score, Some(0));
}

#[tokio::test]
async fn sources_all_failing_counts_errors_and_persists_nothing() {
    let repo = repo_with(&["TCS", "INFY"]).await;
    let chain = SourceChain::new(vec![Arc::new(AlwaysFails)], Reachability::fixed(true));
    let runner = runner(&repo, chain, false);

    let summary = runner.execute().await.unwrap();
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.errors, 2);

    let scan = repo.get_scan(summary.scan_id).await.unwrap().unwrap();
    assert_eq!(scan.status, ScanStatus::Completed);
    assert_eq!(scan.error_count, 2);

    assert!(repo.latest_recommendations(false).await.unwrap().is_empty());
    let logs = repo.scan_logs(summary.scan_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.kind == LogKind::Error));
}

#[tokio::test]
async fn empty_universe_completes_with_zero_counts() {
    let repo = repo_with(&[]).await;
    let chain = SourceChain::new(
        vec![Arc::new(SyntheticSource::new(9))],
        Reachability::fixed(true),
    );
    let runner = runner(&repo, chain, false);

    let summary = runner.execute().await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.errors, 0);

    let scan = repo.get_scan(summary.scan_id).await.unwrap().unwrap();
    assert_eq!(scan.status, ScanStatus::Completed);
}
