//! Secondary quote source: a public chart API serving daily closes as JSON.
//! Price history only; it offers no fundamentals.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::acquisition::QuoteSource;
use crate::acquisition::cleaner;
use crate::acquisition::http_client::HttpClient;
use crate::config::AcquisitionConfig;
use crate::error::SourceError;
use crate::models::PriceBar;

pub struct YahooChartSource {
    client: Arc<HttpClient>,
    base_url: String,
    suffixes: Vec<String>,
    history_months: u32,
    min_sessions: usize,
}

impl YahooChartSource {
    pub fn new(client: Arc<HttpClient>, config: &AcquisitionConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.secondary_base_url).context("secondary_base_url")?;
        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            suffixes: config.secondary_suffixes.clone(),
            history_months: config.history_months,
            min_sessions: config.secondary_min_sessions,
        })
    }

    fn chart_url(&self, ticker: &str) -> Result<String, SourceError> {
        let now = Utc::now();
        let period2 = now.timestamp();
        // Falling back to epoch zero just widens the window.
        let period1 = now
            .checked_sub_months(Months::new(self.history_months))
            .map(|start| start.timestamp())
            .unwrap_or(0);
        let url = Url::parse_with_params(
            &format!("{}/v8/finance/chart/{}", self.base_url, ticker),
            &[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
            ],
        )
        .map_err(|e| SourceError::Parse(format!("chart url for {ticker}: {e}")))?;
        Ok(url.into())
    }
}

// ── Wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartNode,
}

#[derive(Debug, Deserialize)]
struct ChartNode {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Zip timestamps with closes, dropping null, non-finite and non-positive
/// entries. The API pads sessions it has no close for with nulls.
fn to_bars(result: &ChartResult) -> Vec<PriceBar> {
    let closes = result
        .indicators
        .quote
        .first()
        .map(|q| q.close.as_slice())
        .unwrap_or(&[]);
    let mut bars: Vec<PriceBar> = result
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            let close = (*close)?;
            if !close.is_finite() || close <= 0.0 {
                return None;
            }
            let date = DateTime::from_timestamp(*ts, 0)?.date_naive();
            Some(PriceBar { date, close })
        })
        .collect();
    cleaner::sort_dedup_bars(&mut bars);
    bars
}

#[async_trait]
impl QuoteSource for YahooChartSource {
    fn name(&self) -> &'static str {
        "yahoo-chart"
    }

    fn min_sessions(&self) -> usize {
        self.min_sessions
    }

    async fn fetch_price_history(&self, symbol: &str) -> Result<Vec<PriceBar>, SourceError> {
        let mut best: Vec<PriceBar> = Vec::new();
        let mut last = SourceError::Parse(format!("{symbol}: no chart variant answered"));
        for suffix in &self.suffixes {
            let ticker = format!("{symbol}{suffix}");
            let url = self.chart_url(&ticker)?;
            match self.client.get_json::<ChartEnvelope>(&url).await {
                Ok(envelope) => match envelope.chart.result.as_ref().and_then(|r| r.first()) {
                    Some(result) => {
                        let bars = to_bars(result);
                        if bars.len() >= self.min_sessions {
                            debug!("{symbol}: chart data via {ticker}");
                            return Ok(bars);
                        }
                        debug!("{symbol}: {ticker} carried only {} usable sessions", bars.len());
                        if bars.len() > best.len() {
                            best = bars;
                        }
                    }
                    None => {
                        last = SourceError::Parse(format!(
                            "{ticker}: empty chart result ({:?})",
                            envelope.chart.error
                        ));
                    }
                },
                Err(e) => {
                    debug!("{symbol}: {ticker} failed: {e}");
                    last = e;
                }
            }
        }
        // A short series is still worth handing back; the chain decides
        // whether it clears the floor.
        if !best.is_empty() {
            return Ok(best);
        }
        Err(last)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcquisitionConfig;

    fn source() -> YahooChartSource {
        let config = AcquisitionConfig::default();
        let client = Arc::new(HttpClient::new(&config).unwrap());
        YahooChartSource::new(client, &config).unwrap()
    }

    #[test]
    fn chart_url_carries_ticker_window_and_interval() {
        let url = source().chart_url("TCS.NS").unwrap();
        assert!(url.starts_with("https://query1.finance.yahoo.com/v8/finance/chart/TCS.NS?"));
        assert!(url.contains("period1="));
        assert!(url.contains("period2="));
        assert!(url.contains("interval=1d"));
    }

    #[test]
    fn chart_payload_maps_to_bars_skipping_null_closes() {
        let json = r#"{
            "chart": {
                "result": [{
                    "timestamp": [1755734400, 1755820800, 1755907200],
                    "indicators": { "quote": [{ "close": [101.5, null, 103.25] }] }
                }],
                "error": null
            }
        }"#;
        let envelope: ChartEnvelope = serde_json::from_str(json).unwrap();
        let result = &envelope.chart.result.unwrap()[0];
        let bars = to_bars(result);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date.to_string(), "2025-08-21");
        assert_eq!(bars[0].close, 101.5);
        assert_eq!(bars[1].date.to_string(), "2025-08-23");
    }

    #[test]
    fn error_payloads_deserialize_to_an_empty_result() {
        let json = r#"{
            "chart": { "result": null, "error": { "code": "Not Found" } }
        }"#;
        let envelope: ChartEnvelope = serde_json::from_str(json).unwrap();
        assert!(envelope.chart.result.is_none());
        assert!(envelope.chart.error.is_some());
    }

    #[test]
    fn non_positive_closes_are_dropped() {
        let result = ChartResult {
            timestamp: vec![1755734400, 1755820800],
            indicators: ChartIndicators {
                quote: vec![ChartQuote {
                    close: vec![Some(-1.0), Some(0.0)],
                }],
            },
        };
        assert!(to_bars(&result).is_empty());
    }
}
