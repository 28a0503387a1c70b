//! Data acquisition: an ordered chain of quote sources ending in a
//! synthetic terminal.
//!
//! Remote sources scrape pages or call public endpoints and can fail or
//! come back thin. The chain walks them in order until one supplies a
//! history long enough to trust, collecting fundamentals from the first
//! source that has them. The synthetic terminal never fails, so
//! [`SourceChain::fetch`] is total.

pub mod cleaner;
pub mod google;
pub mod http_client;
pub mod parse;
pub mod synthetic;
pub mod yahoo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AcquisitionConfig;
use crate::error::SourceError;
use crate::models::{Fundamentals, PriceBar};

pub use self::google::GoogleFinanceSource;
pub use self::http_client::HttpClient;
pub use self::synthetic::SyntheticSource;
pub use self::yahoo::YahooChartSource;

/// One provider of market data, consulted in chain order.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Remote sources are skipped wholesale once the network probe fails.
    fn remote(&self) -> bool {
        true
    }

    /// Shortest history this source must return for the chain to accept it.
    fn min_sessions(&self) -> usize {
        0
    }

    fn offers_fundamentals(&self) -> bool {
        false
    }

    async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, SourceError> {
        let _ = symbol;
        Err(SourceError::FundamentalsUnsupported)
    }

    async fn fetch_price_history(&self, symbol: &str) -> Result<Vec<PriceBar>, SourceError>;
}

/// What one chain walk produced for a symbol.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub symbol: String,
    pub fundamentals: Option<Fundamentals>,
    pub bars: Vec<PriceBar>,
    /// Name of the source that supplied the accepted price history.
    pub source: &'static str,
}

// ── Reachability ──────────────────────────────────────────────────────────────

/// Lazily probed, cached network state. The first remote attempt pays for
/// one short probe; every later decision is a cache read, including the
/// negative one that keeps offline scans from stalling on every symbol.
pub struct Reachability {
    client: Option<Arc<HttpClient>>,
    url: String,
    timeout: Duration,
    state: OnceCell<bool>,
}

impl Reachability {
    pub fn new(client: Arc<HttpClient>, url: String, timeout: Duration) -> Self {
        Self {
            client: Some(client),
            url,
            timeout,
            state: OnceCell::new(),
        }
    }

    /// A reachability that never probes. Offline mode and tests.
    pub fn fixed(online: bool) -> Self {
        Self {
            client: None,
            url: String::new(),
            timeout: Duration::ZERO,
            state: OnceCell::new_with(Some(online)),
        }
    }

    pub async fn online(&self) -> bool {
        *self
            .state
            .get_or_init(|| async {
                match &self.client {
                    Some(client) => {
                        info!("probing {} for reachability", self.url);
                        let online = client.probe(&self.url, self.timeout).await;
                        if !online {
                            warn!("network unreachable, falling back to synthetic data");
                        }
                        online
                    }
                    None => true,
                }
            })
            .await
    }
}

// ── Source chain ──────────────────────────────────────────────────────────────

pub struct SourceChain {
    sources: Vec<Arc<dyn QuoteSource>>,
    reachability: Reachability,
}

impl SourceChain {
    /// Chain per configuration: scraped quote pages, then the chart API,
    /// then synthetic. `offline = true` drops the remote links entirely.
    pub fn from_config(config: &AcquisitionConfig) -> anyhow::Result<Self> {
        let mut sources: Vec<Arc<dyn QuoteSource>> = Vec::new();
        let reachability = if config.offline {
            Reachability::fixed(false)
        } else {
            let client = Arc::new(HttpClient::new(config)?);
            sources.push(Arc::new(GoogleFinanceSource::new(client.clone(), config)?));
            sources.push(Arc::new(YahooChartSource::new(client.clone(), config)?));
            Reachability::new(
                client,
                probe_url(&config.primary_base_url),
                Duration::from_secs(config.probe_timeout_secs),
            )
        };
        sources.push(Arc::new(SyntheticSource::new(config.history_months)));
        Ok(Self {
            sources,
            reachability,
        })
    }

    /// Assemble a custom chain. Callers own the ordering and the terminal.
    pub fn new(sources: Vec<Arc<dyn QuoteSource>>, reachability: Reachability) -> Self {
        Self {
            sources,
            reachability,
        }
    }

    /// Walk the chain for one symbol. Fundamentals come from the first
    /// source that yields them, the price history from the first source
    /// whose series clears its own floor. Scraped fundamentals survive a
    /// price fallback to a later source.
    pub async fn fetch(&self, symbol: &str) -> Acquired {
        let mut fundamentals: Option<Fundamentals> = None;
        for source in &self.sources {
            if source.remote() && !self.reachability.online().await {
                debug!("{symbol}: skipping {} (offline)", source.name());
                continue;
            }
            if fundamentals.is_none() && source.offers_fundamentals() {
                match source.fetch_fundamentals(symbol).await {
                    Ok(found) => fundamentals = Some(found),
                    Err(e) => debug!("{symbol}: no fundamentals from {}: {e}", source.name()),
                }
            }
            match source.fetch_price_history(symbol).await {
                Ok(bars) if bars.len() >= source.min_sessions() => {
                    debug!("{symbol}: {} supplied {} sessions", source.name(), bars.len());
                    return Acquired {
                        symbol: symbol.to_string(),
                        fundamentals,
                        bars,
                        source: source.name(),
                    };
                }
                Ok(bars) => warn!(
                    "{symbol}: {} returned {} sessions, floor is {}",
                    source.name(),
                    bars.len(),
                    source.min_sessions()
                ),
                Err(e) => warn!("{symbol}: {} failed: {e}", source.name()),
            }
        }
        // Only reachable on a caller-built chain without a terminal.
        Acquired {
            symbol: symbol.to_string(),
            fundamentals,
            bars: Vec::new(),
            source: "none",
        }
    }
}

fn probe_url(base: &str) -> String {
    Url::parse(base)
        .ok()
        .and_then(|url| url.join("./").ok())
        .map(String::from)
        .unwrap_or_else(|| base.to_string())
}
