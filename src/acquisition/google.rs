//! Primary quote source: scrapes public quote pages for fundamentals and,
//! when a page variant carries one, a daily-history table.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::acquisition::QuoteSource;
use crate::acquisition::cleaner::{self, clean_history_rows};
use crate::acquisition::http_client::HttpClient;
use crate::acquisition::parse::{parse_history_table, parse_quote_page};
use crate::config::AcquisitionConfig;
use crate::error::SourceError;
use crate::models::{Fundamentals, PriceBar, RawQuote};

// Keys the stat soup is probed with, in priority order.
const PE_KEYS: [&str; 3] = ["p/e ratio", "pe ratio", "p/e"];
const BOOK_VALUE_KEYS: [&str; 2] = ["book value", "book value per share"];
const ROCE_KEYS: [&str; 2] = ["roce", "return on capital employed"];
const DEBT_KEYS: [&str; 3] = ["total debt", "debt", "net debt"];
const INDUSTRY_KEYS: [&str; 2] = ["industry", "sector"];

pub struct GoogleFinanceSource {
    client: Arc<HttpClient>,
    base_url: String,
    exchanges: Vec<String>,
    min_sessions: usize,
    /// Pages that yielded fundamentals, keyed by symbol. The chain asks for
    /// fundamentals first and price history right after; the history fetch
    /// consumes the cached page instead of re-requesting the same variant.
    page_cache: Mutex<HashMap<String, String>>,
}

impl GoogleFinanceSource {
    pub fn new(client: Arc<HttpClient>, config: &AcquisitionConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.primary_base_url).context("primary_base_url")?;
        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            exchanges: config.primary_exchanges.clone(),
            min_sessions: config.primary_min_sessions,
            page_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Quote page variants for one symbol, tried in exchange order. The
    /// empty exchange produces the bare form used by cross-listed tickers.
    fn quote_urls(&self, symbol: &str) -> Vec<String> {
        self.exchanges
            .iter()
            .map(|exchange| {
                if exchange.is_empty() {
                    format!("{}/{}", self.base_url, symbol)
                } else {
                    format!("{}/{}:{}", self.base_url, symbol, exchange)
                }
            })
            .collect()
    }
}

/// Map the raw page soup onto typed fundamentals. A page that yielded
/// neither a company name nor a price is treated as a miss so the next
/// exchange variant gets tried.
fn to_fundamentals(symbol: &str, raw: &RawQuote) -> Option<Fundamentals> {
    let name = raw.name.clone();
    let cmp = raw.price.as_deref().and_then(cleaner::parse_number);
    if name.is_none() && cmp.is_none() {
        return None;
    }
    let industry = raw
        .industry
        .clone()
        .or_else(|| raw.lookup(&INDUSTRY_KEYS).map(str::to_string));
    Some(Fundamentals {
        symbol: symbol.to_string(),
        name,
        cmp,
        pe: raw.lookup(&PE_KEYS).and_then(cleaner::parse_number),
        roce: raw.lookup(&ROCE_KEYS).and_then(cleaner::parse_number),
        bv: raw.lookup(&BOOK_VALUE_KEYS).and_then(cleaner::parse_number),
        debt: raw.lookup(&DEBT_KEYS).and_then(cleaner::parse_number),
        industry,
    })
}

#[async_trait]
impl QuoteSource for GoogleFinanceSource {
    fn name(&self) -> &'static str {
        "google-finance"
    }

    fn min_sessions(&self) -> usize {
        self.min_sessions
    }

    fn offers_fundamentals(&self) -> bool {
        true
    }

    async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, SourceError> {
        let mut last = SourceError::Parse(format!("{symbol}: no quote page variant answered"));
        for url in self.quote_urls(symbol) {
            match self.client.get_text(&url).await {
                Ok(html) => {
                    let raw = parse_quote_page(&html)?;
                    if let Some(found) = to_fundamentals(symbol, &raw) {
                        debug!("{symbol}: fundamentals from {url}");
                        self.page_cache.lock().await.insert(symbol.to_string(), html);
                        return Ok(found);
                    }
                    last = SourceError::Parse(format!("{url}: page carried no usable figures"));
                }
                Err(e) => {
                    debug!("{symbol}: {url} failed: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }

    async fn fetch_price_history(&self, symbol: &str) -> Result<Vec<PriceBar>, SourceError> {
        if let Some(html) = self.page_cache.lock().await.remove(symbol) {
            let bars = clean_history_rows(&parse_history_table(&html)?);
            if !bars.is_empty() {
                debug!("{symbol}: history from the cached quote page");
                return Ok(bars);
            }
            // Cached variant had no table; another variant still might.
        }
        let mut last = SourceError::Parse(format!("{symbol}: no quote page variant answered"));
        for url in self.quote_urls(symbol) {
            match self.client.get_text(&url).await {
                Ok(html) => {
                    let bars = clean_history_rows(&parse_history_table(&html)?);
                    if !bars.is_empty() {
                        return Ok(bars);
                    }
                    last = SourceError::Parse(format!("{url}: no history table"));
                }
                Err(e) => {
                    debug!("{symbol}: {url} failed: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcquisitionConfig;

    fn source() -> GoogleFinanceSource {
        let config = AcquisitionConfig::default();
        let client = Arc::new(HttpClient::new(&config).unwrap());
        GoogleFinanceSource::new(client, &config).unwrap()
    }

    #[test]
    fn quote_urls_cover_each_exchange_and_the_bare_form() {
        let urls = source().quote_urls("TCS");
        assert_eq!(
            urls,
            vec![
                "https://www.google.com/finance/quote/TCS:NSE",
                "https://www.google.com/finance/quote/TCS:BOM",
                "https://www.google.com/finance/quote/TCS",
            ]
        );
    }

    #[test]
    fn soup_maps_onto_fundamentals_with_key_priorities() {
        let raw = RawQuote {
            name: Some("Tata Consultancy Services".into()),
            price: Some("₹3,852.40".into()),
            industry: None,
            kv: vec![
                ("p/e".into(), "10.0".into()),
                ("p/e ratio".into(), "28.54".into()),
                ("book value".into(), "285.20".into()),
                ("return on capital employed".into(), "52.3%".into()),
                ("net debt".into(), "12,000".into()),
                ("sector".into(), "IT Services".into()),
            ],
        };
        let f = to_fundamentals("TCS", &raw).unwrap();
        assert_eq!(f.symbol, "TCS");
        assert_eq!(f.name.as_deref(), Some("Tata Consultancy Services"));
        assert_eq!(f.cmp, Some(3852.40));
        assert_eq!(f.pe, Some(28.54));
        assert_eq!(f.bv, Some(285.20));
        assert_eq!(f.roce, Some(52.3));
        assert_eq!(f.debt, Some(12000.0));
        assert_eq!(f.industry.as_deref(), Some("IT Services"));
    }

    #[test]
    fn industry_link_outranks_the_sector_stat() {
        let raw = RawQuote {
            name: Some("NMDC Limited".into()),
            price: Some("127.30".into()),
            industry: Some("Mining & Minerals".into()),
            kv: vec![("sector".into(), "Metals".into())],
        };
        let f = to_fundamentals("NMDC", &raw).unwrap();
        assert_eq!(f.industry.as_deref(), Some("Mining & Minerals"));
    }

    #[tokio::test]
    async fn history_reuses_the_page_that_yielded_fundamentals() {
        let source = source();
        let html = r#"
            <html><body>
              <div class="zzDege">Tata Consultancy Services</div>
              <table id="t">
                <tr><th>Date</th><th>Close</th></tr>
                <tr><td>Aug 21, 2025</td><td>101.50</td></tr>
                <tr><td>Aug 22, 2025</td><td>102.25</td></tr>
              </table>
            </body></html>
        "#;
        source
            .page_cache
            .lock()
            .await
            .insert("TCS".into(), html.to_string());

        // Served from the cached page; no request goes out.
        let bars = source.fetch_price_history("TCS").await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 101.50);
        assert_eq!(bars[1].date.to_string(), "2025-08-22");

        // Consumed on use: the next symbol's fetch starts clean.
        assert!(source.page_cache.lock().await.is_empty());
    }

    #[test]
    fn a_page_without_name_or_price_is_a_miss() {
        let raw = RawQuote {
            kv: vec![("p/e ratio".into(), "28.54".into())],
            ..RawQuote::default()
        };
        assert!(to_fundamentals("TCS", &raw).is_none());
    }
}
