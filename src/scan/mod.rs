//! Scan orchestration: walk the symbol universe, acquire data, compute
//! indicators and signals, persist per-symbol results.
//!
//! One scan is a numbered row in `scans`. Symbols fan out across a bounded
//! set of tasks; each task only computes. Persistence and counter updates
//! happen on the orchestrator side as handles are drained, so a panicked
//! task costs one error, never the scan.

pub mod tracker;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::acquisition::{Acquired, SourceChain};
use crate::config::ScanConfig;
use crate::error::{ScanError, SeriesError};
use crate::indicators::{self, IndicatorSeries};
use crate::models::{
    Fundamentals, LogKind, MacdPoint, PriceBar, RecommendationRecord, RsiPoint, SmaPoint,
    SymbolRecord, TechnicalRecord,
};
use crate::signals::{self, SignalSet};
use crate::storage::Repository;

pub use self::tracker::{ScanProgress, ScanTracker};

// ── Runner ────────────────────────────────────────────────────────────────────

pub struct ScanRunner {
    repo: Arc<Repository>,
    chain: Arc<SourceChain>,
    tracker: Arc<ScanTracker>,
    config: ScanConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scan_id: i64,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ScanRunner {
    pub fn new(
        repo: Arc<Repository>,
        chain: Arc<SourceChain>,
        tracker: Arc<ScanTracker>,
        config: ScanConfig,
    ) -> Self {
        Self {
            repo,
            chain,
            tracker,
            config,
        }
    }

    pub fn tracker(&self) -> &Arc<ScanTracker> {
        &self.tracker
    }

    /// Run a scan to completion on the caller's task. CLI entry point.
    pub async fn execute(&self) -> Result<ScanSummary, ScanError> {
        let (scan_id, symbols) = self.prepare().await?;
        self.run_and_finalize(scan_id, symbols).await
    }

    /// Start a scan in the background and return its id immediately.
    /// HTTP entry point.
    pub async fn start_detached(self: &Arc<Self>) -> Result<i64, ScanError> {
        let (scan_id, symbols) = self.prepare().await?;
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = runner.run_and_finalize(scan_id, symbols).await {
                error!("scan {scan_id} failed: {e:#}");
            }
        });
        Ok(scan_id)
    }

    /// Claim the single-flight tracker and create the scan row while still
    /// holding the claim, so a concurrent start sees either the active scan
    /// or the free tracker, never a half-started one.
    async fn prepare(&self) -> Result<(i64, Vec<String>), ScanError> {
        let symbols = self.repo.list_symbols().await?;
        let begin = self.tracker.try_begin().await?;
        let scan_id = self.repo.create_scan().await?;
        begin.activate(scan_id, symbols.len());
        Ok((scan_id, symbols))
    }

    async fn run_and_finalize(
        &self,
        scan_id: i64,
        symbols: Vec<String>,
    ) -> Result<ScanSummary, ScanError> {
        match self.run(scan_id, &symbols).await {
            Ok(summary) => {
                if let Err(e) = self
                    .repo
                    .finish_scan(scan_id, summary.completed, summary.skipped, summary.errors)
                    .await
                {
                    error!("scan {scan_id}: could not mark completed: {e:#}");
                }
                self.tracker.finish().await;
                info!(
                    "=== Scan {scan_id} done: {} completed | {} skipped | {} errors ===",
                    summary.completed, summary.skipped, summary.errors
                );
                Ok(summary)
            }
            Err(e) => {
                let message = format!("{e:#}");
                if let Err(persist) = self.repo.fail_scan(scan_id, &message).await {
                    error!("scan {scan_id}: could not mark failed: {persist:#}");
                }
                self.tracker.finish().await;
                Err(e)
            }
        }
    }

    async fn run(&self, scan_id: i64, symbols: &[String]) -> Result<ScanSummary, ScanError> {
        info!("=== Scan {scan_id}: {} symbols ===", symbols.len());
        if symbols.is_empty() {
            warn!("symbol universe is empty; nothing to scan");
        }
        self.repo.mark_scan_running(scan_id, symbols.len()).await?;

        let done_today: HashSet<String> = if self.config.daily_skip {
            self.repo
                .symbols_completed_on(Utc::now().date_naive())
                .await?
        } else {
            HashSet::new()
        };

        let sem = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::new();
        let mut completed = 0usize;
        let mut skipped = 0usize;
        let mut errors = 0usize;

        for symbol in symbols {
            if done_today.contains(symbol) {
                info!("{symbol}: already scanned today, skipping");
                // A failed log write costs the entry, never the scan.
                if let Err(e) = self
                    .repo
                    .insert_scan_log(scan_id, Some(symbol), LogKind::Skip, "already scanned today")
                    .await
                {
                    warn!("{symbol}: could not record skip: {e:#}");
                }
                self.tracker.record_skipped().await;
                skipped += 1;
                continue;
            }

            let worker_symbol = symbol.clone();
            let chain = Arc::clone(&self.chain);
            let tracker = Arc::clone(&self.tracker);
            let sem = Arc::clone(&sem);

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;
                tracker.set_current(&worker_symbol).await;
                Ok::<SymbolReport, anyhow::Error>(process_symbol(&chain, &worker_symbol).await)
            });
            handles.push((symbol.clone(), handle));
        }

        for (symbol, handle) in handles {
            match handle.await {
                Ok(Ok(SymbolReport::Completed(record))) => {
                    match self.repo.insert_symbol_record(scan_id, &record, None).await {
                        Ok(()) => {
                            info!("{symbol}: completed via {}", record.technicals.source);
                            self.tracker.record_completed().await;
                            completed += 1;
                        }
                        Err(e) => {
                            warn!("{symbol}: persist failed: {e:#}");
                            self.log_error(scan_id, &symbol, &format!("persist failed: {e:#}"))
                                .await;
                            errors += 1;
                        }
                    }
                }
                Ok(Ok(SymbolReport::Ignored(record, why))) => {
                    match self
                        .repo
                        .insert_symbol_record(scan_id, &record, Some((LogKind::Ignore, &why)))
                        .await
                    {
                        Ok(()) => {
                            info!("{symbol}: ignored ({why})");
                            self.tracker.record_completed().await;
                            completed += 1;
                        }
                        Err(e) => {
                            warn!("{symbol}: persist failed: {e:#}");
                            self.log_error(scan_id, &symbol, &format!("persist failed: {e:#}"))
                                .await;
                            errors += 1;
                        }
                    }
                }
                Ok(Ok(SymbolReport::Failed(why))) => {
                    warn!("{symbol}: {why}");
                    self.log_error(scan_id, &symbol, &why).await;
                    errors += 1;
                }
                Ok(Err(e)) => {
                    warn!("{symbol}: {e:#}");
                    self.log_error(scan_id, &symbol, &format!("{e:#}")).await;
                    errors += 1;
                }
                Err(e) => {
                    error!("Task panic for {symbol}: {e}");
                    self.log_error(scan_id, &symbol, &format!("task panicked: {e}"))
                        .await;
                    errors += 1;
                }
            }
        }

        Ok(ScanSummary {
            scan_id,
            total: symbols.len(),
            completed,
            skipped,
            errors,
        })
    }

    async fn log_error(&self, scan_id: i64, symbol: &str, message: &str) {
        self.tracker.record_error().await;
        self.repo
            .insert_scan_log(scan_id, Some(symbol), LogKind::Error, message)
            .await
            .ok();
    }
}

// ── Per-symbol work ───────────────────────────────────────────────────────────

enum SymbolReport {
    Completed(SymbolRecord),
    /// Series too short for indicators; rows persist with undefined values.
    Ignored(SymbolRecord, String),
    /// Nothing persisted beyond an error log entry.
    Failed(String),
}

async fn process_symbol(chain: &SourceChain, symbol: &str) -> SymbolReport {
    build_report(chain.fetch(symbol).await)
}

fn build_report(acquired: Acquired) -> SymbolReport {
    let Acquired {
        symbol,
        fundamentals,
        bars,
        source,
    } = acquired;

    if bars.is_empty() {
        return SymbolReport::Failed("no source supplied price data".into());
    }
    if let Err(e) = validate_series(&bars) {
        return SymbolReport::Failed(e.to_string());
    }
    if bars.len() < indicators::MIN_SESSIONS {
        let why = SeriesError::Insufficient {
            got: bars.len(),
            need: indicators::MIN_SESSIONS,
        }
        .to_string();
        return SymbolReport::Ignored(ignored_record(&symbol, fundamentals, &bars, source), why);
    }

    let ind = IndicatorSeries::compute(&bars);
    let sigs = signals::detect(&bars, &ind);
    let latest = signals::latest_values(&bars, &ind);
    let assessment = signals::score(&sigs, latest.rsi14);

    SymbolReport::Completed(SymbolRecord {
        symbol,
        fundamentals,
        technicals: TechnicalRecord {
            close: latest.close,
            rsi14: latest.rsi14,
            macd: latest.macd,
            macd_signal: latest.macd_signal,
            sma20: latest.sma20,
            source: source.to_string(),
            signals_json: to_json(&sigs),
            price_series_json: to_json(&bars),
            rsi_series_json: to_json(&rsi_series(&bars, &ind)),
            macd_series_json: to_json(&macd_series(&bars, &ind)),
            sma20_series_json: to_json(&sma_series(&bars, &ind)),
        },
        recommendation: RecommendationRecord {
            score: assessment.score,
            recommended: assessment.recommended,
            reason: assessment.reason,
        },
    })
}

/// Dates strictly ascending, closes finite and positive. Sources normalise
/// their output, so a violation here means a source bug worth failing loud.
fn validate_series(bars: &[PriceBar]) -> Result<(), SeriesError> {
    for pair in bars.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(SeriesError::Malformed(format!(
                "dates not strictly ascending at {}",
                pair[1].date
            )));
        }
    }
    for bar in bars {
        if !bar.close.is_finite() || bar.close <= 0.0 {
            return Err(SeriesError::Malformed(format!(
                "bad close {} on {}",
                bar.close, bar.date
            )));
        }
    }
    Ok(())
}

/// Row shape for a symbol whose history never warmed the indicators up:
/// close is known, everything derived stays undefined, nothing recommended.
fn ignored_record(
    symbol: &str,
    fundamentals: Option<Fundamentals>,
    bars: &[PriceBar],
    source: &'static str,
) -> SymbolRecord {
    SymbolRecord {
        symbol: symbol.to_string(),
        fundamentals,
        technicals: TechnicalRecord {
            close: bars.last().map(|b| b.close),
            rsi14: None,
            macd: None,
            macd_signal: None,
            sma20: None,
            source: source.to_string(),
            signals_json: to_json(&SignalSet::default()),
            price_series_json: to_json(&bars),
            rsi_series_json: "[]".into(),
            macd_series_json: "[]".into(),
            sma20_series_json: "[]".into(),
        },
        recommendation: RecommendationRecord {
            score: 0,
            recommended: false,
            reason: String::new(),
        },
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".into())
}

fn rsi_series(bars: &[PriceBar], ind: &IndicatorSeries) -> Vec<RsiPoint> {
    bars.iter()
        .zip(&ind.rsi)
        .filter_map(|(bar, rsi)| {
            rsi.map(|rsi| RsiPoint {
                date: bar.date,
                rsi,
            })
        })
        .collect()
}

fn macd_series(bars: &[PriceBar], ind: &IndicatorSeries) -> Vec<MacdPoint> {
    bars.iter()
        .enumerate()
        .filter_map(|(i, bar)| {
            ind.macd[i].map(|macd| MacdPoint {
                date: bar.date,
                macd,
                signal: ind.macd_signal[i],
                histogram: ind.macd_histogram[i],
            })
        })
        .collect()
}

fn sma_series(bars: &[PriceBar], ind: &IndicatorSeries) -> Vec<SmaPoint> {
    bars.iter()
        .zip(&ind.sma20)
        .filter_map(|(bar, sma)| {
            sma.map(|sma20| SmaPoint {
                date: bar.date,
                sma20,
            })
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
