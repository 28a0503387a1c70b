use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ── Price series ──────────────────────────────────────────────────────────────

/// One trading session. Close-only: the screener never looks at intraday range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub close: f64,
}

// ── Fundamentals snapshot ─────────────────────────────────────────────────────

/// Point-in-time fundamentals for one symbol. Any field may be unknown;
/// the screener only gates on price history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Fundamentals {
    pub symbol: String,
    pub name: Option<String>,
    pub cmp: Option<f64>,
    pub pe: Option<f64>,
    pub roce: Option<f64>,
    pub bv: Option<f64>,
    pub debt: Option<f64>,
    pub industry: Option<String>,
}

// ── Scan ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanRow {
    pub id: i64,
    pub status: ScanStatus,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub total_symbols: i64,
    pub completed_count: i64,
    pub skipped_count: i64,
    pub error_count: i64,
    pub error_message: Option<String>,
}

// ── Scan log ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Skip,
    Error,
    Ignore,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Skip => "skip",
            LogKind::Error => "error",
            LogKind::Ignore => "ignore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "skip" => Some(LogKind::Skip),
            "error" => Some(LogKind::Error),
            "ignore" => Some(LogKind::Ignore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanLogRow {
    pub id: i64,
    pub scan_id: i64,
    pub symbol: Option<String>,
    pub kind: LogKind,
    pub message: String,
    pub created_at: NaiveDateTime,
}

// ── Per-symbol persistence unit ───────────────────────────────────────────────

/// Latest indicator values plus the serialized series columns for charting.
/// `source` records which acquisition tier supplied the price data.
#[derive(Debug, Clone)]
pub struct TechnicalRecord {
    pub close: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub sma20: Option<f64>,
    pub source: String,
    pub signals_json: String,
    pub price_series_json: String,
    pub rsi_series_json: String,
    pub macd_series_json: String,
    pub sma20_series_json: String,
}

#[derive(Debug, Clone)]
pub struct RecommendationRecord {
    pub score: i32,
    pub recommended: bool,
    pub reason: String,
}

/// Everything the scan persists for one symbol, written in one transaction.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub symbol: String,
    pub fundamentals: Option<Fundamentals>,
    pub technicals: TechnicalRecord,
    pub recommendation: RecommendationRecord,
}

// ── Read-side composites ──────────────────────────────────────────────────────

/// One row of the recommendations listing: the symbol's most recent
/// Recommendation joined with its fundamentals/technicals snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationSummary {
    pub scan_id: i64,
    pub symbol: String,
    pub recommended: bool,
    pub score: i32,
    pub reason: String,
    pub created_at: NaiveDateTime,
    pub name: Option<String>,
    pub cmp: Option<f64>,
    pub pe: Option<f64>,
    pub roce: Option<f64>,
    pub bv: Option<f64>,
    pub debt: Option<f64>,
    pub industry: Option<String>,
    pub close: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub sma20: Option<f64>,
    pub source: Option<String>,
    pub signals: serde_json::Value,
}

/// Full per-symbol detail for one scan, series included.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolDetail {
    pub scan_id: i64,
    pub symbol: String,
    pub fundamentals: Option<Fundamentals>,
    pub close: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub sma20: Option<f64>,
    pub source: Option<String>,
    pub signals: serde_json::Value,
    pub price_series: serde_json::Value,
    pub rsi_series: serde_json::Value,
    pub macd_series: serde_json::Value,
    pub sma20_series: serde_json::Value,
    pub recommended: Option<bool>,
    pub score: Option<i32>,
    pub reason: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

/// Per-table row counts for delete endpoints.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeletedCounts {
    pub fundamentals: usize,
    pub technicals: usize,
    pub recommendations: usize,
    pub logs: usize,
}

/// Per-table row counts for the clear-all admin operation.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ClearedCounts {
    pub scans: usize,
    pub symbols: usize,
    pub fundamentals: usize,
    pub technicals: usize,
    pub recommendations: usize,
    pub logs: usize,
}

// ── Raw scrape rows ───────────────────────────────────────────────────────────

/// Key/value soup lifted from a quote page before cleaning. `kv` keeps
/// insertion order; later entries win on duplicate keys.
#[derive(Debug, Clone, Default)]
pub struct RawQuote {
    pub name: Option<String>,
    pub price: Option<String>,
    pub industry: Option<String>,
    pub kv: Vec<(String, String)>,
}

impl RawQuote {
    /// First key in `keys` that has a value, checked in priority order.
    pub fn lookup(&self, keys: &[&str]) -> Option<&str> {
        for key in keys {
            if let Some((_, v)) = self.kv.iter().rev().find(|(k, _)| k == key) {
                return Some(v.as_str());
            }
        }
        None
    }
}

/// One row of a quote page's daily-history table.
#[derive(Debug, Clone, Default)]
pub struct RawHistoryRow {
    pub date: Option<String>,
    pub close: Option<String>,
}

// ── Chart points ──────────────────────────────────────────────────────────────

// Series columns hold arrays of these; undefined leading entries are simply
// absent, so chart consumers never see null-padded prefixes.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RsiPoint {
    pub date: NaiveDate,
    pub rsi: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MacdPoint {
    pub date: NaiveDate,
    pub macd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmaPoint {
    pub date: NaiveDate,
    pub sma20: f64,
}
