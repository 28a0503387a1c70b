use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::{Connection, params};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{
    ClearedCounts, DeletedCounts, Fundamentals, LogKind, RecommendationSummary, ScanLogRow,
    ScanRow, ScanStatus, SymbolDetail, SymbolRecord,
};

// ── Schema ────────────────────────────────────────────────────────────────────

// DuckDB has no autoincrement; ids come from sequences.
const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS scan_id_seq;
CREATE SEQUENCE IF NOT EXISTS scan_log_id_seq;

CREATE TABLE IF NOT EXISTS symbols (
    symbol      VARCHAR PRIMARY KEY,
    added_at    TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS scans (
    id               BIGINT PRIMARY KEY DEFAULT nextval('scan_id_seq'),
    status           VARCHAR NOT NULL DEFAULT 'pending',
    started_at       TIMESTAMP NOT NULL,
    finished_at      TIMESTAMP,
    total_symbols    INTEGER NOT NULL DEFAULT 0,
    completed_count  INTEGER NOT NULL DEFAULT 0,
    skipped_count    INTEGER NOT NULL DEFAULT 0,
    error_count      INTEGER NOT NULL DEFAULT 0,
    error_message    VARCHAR
);

CREATE TABLE IF NOT EXISTS fundamentals (
    scan_id     BIGINT  NOT NULL,
    symbol      VARCHAR NOT NULL,
    name        VARCHAR,
    cmp         DOUBLE,
    pe          DOUBLE,
    roce        DOUBLE,
    bv          DOUBLE,
    debt        DOUBLE,
    industry    VARCHAR,
    created_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (scan_id, symbol)
);

CREATE TABLE IF NOT EXISTS technicals (
    scan_id            BIGINT  NOT NULL,
    symbol             VARCHAR NOT NULL,
    -- Latest defined value of each indicator; NULL when the series never
    -- warmed up.
    close              DOUBLE,
    rsi14              DOUBLE,
    macd               DOUBLE,
    macd_signal        DOUBLE,
    sma20              DOUBLE,
    source             VARCHAR NOT NULL,
    signals_json       VARCHAR NOT NULL,
    price_series_json  VARCHAR NOT NULL,
    rsi_series_json    VARCHAR NOT NULL,
    macd_series_json   VARCHAR NOT NULL,
    sma20_series_json  VARCHAR NOT NULL,
    created_at         TIMESTAMP NOT NULL,
    PRIMARY KEY (scan_id, symbol)
);

CREATE TABLE IF NOT EXISTS recommendations (
    scan_id     BIGINT  NOT NULL,
    symbol      VARCHAR NOT NULL,
    score       INTEGER NOT NULL DEFAULT 0,
    recommended BOOLEAN NOT NULL DEFAULT FALSE,
    reason      VARCHAR NOT NULL DEFAULT '',
    created_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (scan_id, symbol)
);

CREATE TABLE IF NOT EXISTS scan_logs (
    id          BIGINT  PRIMARY KEY DEFAULT nextval('scan_log_id_seq'),
    scan_id     BIGINT  NOT NULL,
    symbol      VARCHAR,
    kind        VARCHAR NOT NULL,
    message     VARCHAR NOT NULL,
    created_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_recs_symbol  ON recommendations (symbol);
CREATE INDEX IF NOT EXISTS idx_recs_scan    ON recommendations (scan_id);
CREATE INDEX IF NOT EXISTS idx_tech_scan    ON technicals (scan_id);
CREATE INDEX IF NOT EXISTS idx_fund_scan    ON fundamentals (scan_id);
CREATE INDEX IF NOT EXISTS idx_logs_scan    ON scan_logs (scan_id);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

/// All persistence behind one DuckDB connection. The connection is `Send`
/// but not `Sync`, so it lives behind an async mutex and the whole
/// repository is shared as `Arc<Repository>`.
pub struct Repository {
    db: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Connection::open_in_memory()?),
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.db.lock().await;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES)
            .context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Symbols ───────────────────────────────────────────────────────────────

    /// Insert any symbols not already present. Returns how many were new.
    pub async fn upsert_symbols(&self, symbols: &[String]) -> Result<usize> {
        let conn = self.db.lock().await;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().naive_utc();
        let mut inserted = 0;
        for symbol in symbols {
            inserted += tx
                .execute(
                    "INSERT INTO symbols (symbol, added_at) VALUES (?, ?)
                     ON CONFLICT (symbol) DO NOTHING",
                    params![symbol, now],
                )
                .with_context(|| format!("upsert symbol {symbol}"))?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub async fn list_symbols(&self) -> Result<Vec<String>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare("SELECT symbol FROM symbols ORDER BY symbol")?;
        let symbols: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(symbols)
    }

    pub async fn symbol_count(&self) -> Result<i64> {
        let conn = self.db.lock().await;
        let mut s = conn.prepare("SELECT COUNT(*) FROM symbols")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Scan lifecycle ────────────────────────────────────────────────────────

    pub async fn create_scan(&self) -> Result<i64> {
        let conn = self.db.lock().await;
        let id: i64 = conn.query_row(
            "INSERT INTO scans (status, started_at) VALUES ('pending', ?) RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub async fn mark_scan_running(&self, scan_id: i64, total_symbols: usize) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE scans SET status = 'running', total_symbols = ? WHERE id = ?",
            params![total_symbols as i64, scan_id],
        )?;
        Ok(())
    }

    pub async fn finish_scan(
        &self,
        scan_id: i64,
        completed: usize,
        skipped: usize,
        errors: usize,
    ) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            r#"UPDATE scans SET
               status = 'completed', finished_at = ?,
               completed_count = ?, skipped_count = ?, error_count = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                completed as i64,
                skipped as i64,
                errors as i64,
                scan_id,
            ],
        )?;
        Ok(())
    }

    pub async fn fail_scan(&self, scan_id: i64, message: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE scans SET status = 'failed', finished_at = ?, error_message = ? WHERE id = ?",
            params![Utc::now().naive_utc(), message, scan_id],
        )?;
        Ok(())
    }

    pub async fn get_scan(&self, scan_id: i64) -> Result<Option<ScanRow>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, status, started_at, finished_at, total_symbols,
                    completed_count, skipped_count, error_count, error_message
             FROM scans WHERE id = ?",
        )?;
        optional_row(stmt.query_row(params![scan_id], scan_row))
    }

    pub async fn latest_scan(&self) -> Result<Option<ScanRow>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, status, started_at, finished_at, total_symbols,
                    completed_count, skipped_count, error_count, error_message
             FROM scans ORDER BY id DESC LIMIT 1",
        )?;
        optional_row(stmt.query_row([], scan_row))
    }

    pub async fn scan_count(&self) -> Result<i64> {
        let conn = self.db.lock().await;
        let mut s = conn.prepare("SELECT COUNT(*) FROM scans")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// Symbols already carrying results from a scan completed on `day`.
    pub async fn symbols_completed_on(&self, day: NaiveDate) -> Result<HashSet<String>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT DISTINCT r.symbol
               FROM recommendations r
               JOIN scans s ON s.id = r.scan_id
               WHERE s.status = 'completed' AND CAST(r.created_at AS DATE) = ?"#,
        )?;
        let symbols: HashSet<String> = stmt
            .query_map(params![day], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(symbols)
    }

    // ── Per-symbol results ────────────────────────────────────────────────────

    /// Persist everything one symbol produced, atomically: fundamentals when
    /// scraped, the technicals row, the recommendation row and an optional
    /// log entry.
    pub async fn insert_symbol_record(
        &self,
        scan_id: i64,
        record: &SymbolRecord,
        note: Option<(LogKind, &str)>,
    ) -> Result<()> {
        let conn = self.db.lock().await;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().naive_utc();

        if let Some(f) = &record.fundamentals {
            tx.execute(
                r#"INSERT INTO fundamentals
                       (scan_id, symbol, name, cmp, pe, roce, bv, debt, industry, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    scan_id, record.symbol, f.name, f.cmp, f.pe, f.roce, f.bv, f.debt,
                    f.industry, now,
                ],
            )
            .with_context(|| format!("insert fundamentals {}", record.symbol))?;
        }

        let t = &record.technicals;
        tx.execute(
            r#"INSERT INTO technicals
                   (scan_id, symbol, close, rsi14, macd, macd_signal, sma20, source,
                    signals_json, price_series_json, rsi_series_json, macd_series_json,
                    sma20_series_json, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                scan_id,
                record.symbol,
                t.close,
                t.rsi14,
                t.macd,
                t.macd_signal,
                t.sma20,
                t.source,
                t.signals_json,
                t.price_series_json,
                t.rsi_series_json,
                t.macd_series_json,
                t.sma20_series_json,
                now,
            ],
        )
        .with_context(|| format!("insert technicals {}", record.symbol))?;

        let rec = &record.recommendation;
        tx.execute(
            r#"INSERT INTO recommendations (scan_id, symbol, score, recommended, reason, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                scan_id,
                record.symbol,
                rec.score,
                rec.recommended,
                rec.reason,
                now,
            ],
        )
        .with_context(|| format!("insert recommendation {}", record.symbol))?;

        if let Some((kind, message)) = note {
            tx.execute(
                r#"INSERT INTO scan_logs (scan_id, symbol, kind, message, created_at)
                   VALUES (?, ?, ?, ?, ?)"#,
                params![scan_id, record.symbol, kind.as_str(), message, now],
            )
            .with_context(|| format!("insert log {}", record.symbol))?;
        }

        tx.commit()?;
        Ok(())
    }

    // ── Scan logs ─────────────────────────────────────────────────────────────

    pub async fn insert_scan_log(
        &self,
        scan_id: i64,
        symbol: Option<&str>,
        kind: LogKind,
        message: &str,
    ) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            r#"INSERT INTO scan_logs (scan_id, symbol, kind, message, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
            params![
                scan_id,
                symbol,
                kind.as_str(),
                message,
                Utc::now().naive_utc()
            ],
        )?;
        Ok(())
    }

    pub async fn scan_logs(&self, scan_id: i64) -> Result<Vec<ScanLogRow>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, scan_id, symbol, kind, message, created_at
             FROM scan_logs WHERE scan_id = ? ORDER BY id",
        )?;
        let logs: Vec<ScanLogRow> = stmt
            .query_map(params![scan_id], |r| {
                Ok(ScanLogRow {
                    id: r.get(0)?,
                    scan_id: r.get(1)?,
                    symbol: r.get(2)?,
                    kind: LogKind::parse(&r.get::<_, String>(3)?).unwrap_or(LogKind::Error),
                    message: r.get(4)?,
                    created_at: r.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(logs)
    }

    pub async fn log_count(&self) -> Result<i64> {
        let conn = self.db.lock().await;
        let mut s = conn.prepare("SELECT COUNT(*) FROM scan_logs")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Recommendations ───────────────────────────────────────────────────────

    /// Each symbol's newest result across all scans, best score first.
    /// `only_recommended` narrows to actionable rows.
    pub async fn latest_recommendations(
        &self,
        only_recommended: bool,
    ) -> Result<Vec<RecommendationSummary>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            r#"WITH latest AS (
                   SELECT symbol, MAX(scan_id) AS scan_id
                   FROM recommendations
                   GROUP BY symbol
               )
               SELECT r.scan_id, r.symbol, r.recommended, r.score, r.reason, r.created_at,
                      f.name, f.cmp, f.pe, f.roce, f.bv, f.debt, f.industry,
                      t.close, t.rsi14, t.macd, t.macd_signal, t.sma20, t.source,
                      t.signals_json
               FROM latest l
               JOIN recommendations r ON r.scan_id = l.scan_id AND r.symbol = l.symbol
               LEFT JOIN fundamentals f ON f.scan_id = l.scan_id AND f.symbol = l.symbol
               LEFT JOIN technicals t   ON t.scan_id = l.scan_id AND t.symbol = l.symbol
               WHERE (? = FALSE OR r.recommended)
               ORDER BY r.score DESC, r.symbol"#,
        )?;
        let rows: Vec<(RecommendationSummary, Option<String>)> = stmt
            .query_map(params![only_recommended], |r| {
                let summary = RecommendationSummary {
                    scan_id: r.get(0)?,
                    symbol: r.get(1)?,
                    recommended: r.get(2)?,
                    score: r.get(3)?,
                    reason: r.get(4)?,
                    created_at: r.get(5)?,
                    name: r.get(6)?,
                    cmp: r.get(7)?,
                    pe: r.get(8)?,
                    roce: r.get(9)?,
                    bv: r.get(10)?,
                    debt: r.get(11)?,
                    industry: r.get(12)?,
                    close: r.get(13)?,
                    rsi14: r.get(14)?,
                    macd: r.get(15)?,
                    macd_signal: r.get(16)?,
                    sma20: r.get(17)?,
                    source: r.get(18)?,
                    signals: Value::Null,
                };
                Ok((summary, r.get(19)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows
            .into_iter()
            .map(|(mut summary, signals_json)| {
                summary.signals = parse_json_column(signals_json);
                summary
            })
            .collect())
    }

    /// Recommended rows one scan produced.
    pub async fn recommended_count_for(&self, scan_id: i64) -> Result<i64> {
        let conn = self.db.lock().await;
        let mut s = conn
            .prepare("SELECT COUNT(*) FROM recommendations WHERE scan_id = ? AND recommended")?;
        Ok(s.query_row(params![scan_id], |r| r.get(0))?)
    }

    pub async fn recommendation_count(&self) -> Result<i64> {
        let conn = self.db.lock().await;
        let mut s = conn.prepare("SELECT COUNT(*) FROM recommendations")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// Full stored detail for one symbol, from `scan_id` or its newest scan.
    pub async fn symbol_detail(
        &self,
        symbol: &str,
        scan_id: Option<i64>,
    ) -> Result<Option<SymbolDetail>> {
        let conn = self.db.lock().await;
        let scan_id = match scan_id {
            Some(id) => id,
            None => {
                let latest: Option<i64> = conn.query_row(
                    "SELECT MAX(scan_id) FROM recommendations WHERE symbol = ?",
                    params![symbol],
                    |r| r.get(0),
                )?;
                match latest {
                    Some(id) => id,
                    None => return Ok(None),
                }
            }
        };

        let mut stmt = conn.prepare(
            r#"SELECT r.scan_id, r.symbol, r.recommended, r.score, r.reason, r.created_at,
                      f.symbol, f.name, f.cmp, f.pe, f.roce, f.bv, f.debt, f.industry,
                      t.close, t.rsi14, t.macd, t.macd_signal, t.sma20, t.source,
                      t.signals_json, t.price_series_json, t.rsi_series_json,
                      t.macd_series_json, t.sma20_series_json
               FROM recommendations r
               LEFT JOIN fundamentals f ON f.scan_id = r.scan_id AND f.symbol = r.symbol
               LEFT JOIN technicals t   ON t.scan_id = r.scan_id AND t.symbol = r.symbol
               WHERE r.scan_id = ? AND r.symbol = ?"#,
        )?;
        type JsonColumns = (
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        );
        let row: Option<(SymbolDetail, JsonColumns)> = optional_row(
            stmt.query_row(params![scan_id, symbol], |r| {
                let fundamentals = match r.get::<_, Option<String>>(6)? {
                    Some(f_symbol) => Some(Fundamentals {
                        symbol: f_symbol,
                        name: r.get(7)?,
                        cmp: r.get(8)?,
                        pe: r.get(9)?,
                        roce: r.get(10)?,
                        bv: r.get(11)?,
                        debt: r.get(12)?,
                        industry: r.get(13)?,
                    }),
                    None => None,
                };
                let detail = SymbolDetail {
                    scan_id: r.get(0)?,
                    symbol: r.get(1)?,
                    fundamentals,
                    close: r.get(14)?,
                    rsi14: r.get(15)?,
                    macd: r.get(16)?,
                    macd_signal: r.get(17)?,
                    sma20: r.get(18)?,
                    source: r.get(19)?,
                    signals: Value::Null,
                    price_series: Value::Null,
                    rsi_series: Value::Null,
                    macd_series: Value::Null,
                    sma20_series: Value::Null,
                    recommended: r.get(2)?,
                    score: r.get(3)?,
                    reason: r.get(4)?,
                    created_at: r.get(5)?,
                };
                let json: JsonColumns = (
                    r.get(20)?,
                    r.get(21)?,
                    r.get(22)?,
                    r.get(23)?,
                    r.get(24)?,
                );
                Ok((detail, json))
            }),
        )?;

        Ok(row.map(|(mut detail, json)| {
            detail.signals = parse_json_column(json.0);
            detail.price_series = parse_json_column(json.1);
            detail.rsi_series = parse_json_column(json.2);
            detail.macd_series = parse_json_column(json.3);
            detail.sma20_series = parse_json_column(json.4);
            detail
        }))
    }

    // ── Deletion ──────────────────────────────────────────────────────────────

    /// Remove one symbol's rows from one scan.
    pub async fn delete_symbol_records(
        &self,
        scan_id: i64,
        symbol: &str,
    ) -> Result<DeletedCounts> {
        let conn = self.db.lock().await;
        let tx = conn.unchecked_transaction()?;
        let counts = DeletedCounts {
            fundamentals: tx.execute(
                "DELETE FROM fundamentals WHERE scan_id = ? AND symbol = ?",
                params![scan_id, symbol],
            )?,
            technicals: tx.execute(
                "DELETE FROM technicals WHERE scan_id = ? AND symbol = ?",
                params![scan_id, symbol],
            )?,
            recommendations: tx.execute(
                "DELETE FROM recommendations WHERE scan_id = ? AND symbol = ?",
                params![scan_id, symbol],
            )?,
            logs: tx.execute(
                "DELETE FROM scan_logs WHERE scan_id = ? AND symbol = ?",
                params![scan_id, symbol],
            )?,
        };
        tx.commit()?;
        Ok(counts)
    }

    /// Wipe every stored row, including the symbol universe.
    pub async fn clear_all(&self) -> Result<ClearedCounts> {
        let conn = self.db.lock().await;
        let tx = conn.unchecked_transaction()?;
        let counts = ClearedCounts {
            recommendations: tx.execute("DELETE FROM recommendations", [])?,
            technicals: tx.execute("DELETE FROM technicals", [])?,
            fundamentals: tx.execute("DELETE FROM fundamentals", [])?,
            logs: tx.execute("DELETE FROM scan_logs", [])?,
            scans: tx.execute("DELETE FROM scans", [])?,
            symbols: tx.execute("DELETE FROM symbols", [])?,
        };
        tx.commit()?;
        Ok(counts)
    }
}

/// Absent rows become `None`; every other query failure propagates, so a
/// broken database surfaces as an error rather than a 404.
fn optional_row<T>(result: duckdb::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(row) => Ok(Some(row)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
impl Repository {
    /// Fault injection for tests: run raw statements against the live
    /// connection, e.g. dropping a table out from under the repository.
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

fn scan_row(r: &duckdb::Row<'_>) -> duckdb::Result<ScanRow> {
    Ok(ScanRow {
        id: r.get(0)?,
        status: ScanStatus::parse(&r.get::<_, String>(1)?).unwrap_or(ScanStatus::Failed),
        started_at: r.get(2)?,
        finished_at: r.get(3)?,
        total_symbols: r.get(4)?,
        completed_count: r.get(5)?,
        skipped_count: r.get(6)?,
        error_count: r.get(7)?,
        error_message: r.get(8)?,
    })
}

fn parse_json_column(raw: Option<String>) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
