//! HTTP API over the repository and scan runner.
//!
//! Handlers are plain async functions taking extractors, so tests can call
//! them directly without standing up a listener. Anything fallible returns
//! [`ApiError`], which maps onto 4xx/5xx JSON bodies.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::acquisition::cleaner;
use crate::config::{ServerConfig, UniverseConfig};
use crate::error::ApiError;
use crate::models::{
    ClearedCounts, DeletedCounts, RecommendationSummary, ScanLogRow, ScanRow, SymbolDetail,
};
use crate::scan::{ScanProgress, ScanRunner};
use crate::storage::Repository;
use crate::universe;

#[derive(Clone)]
pub struct ServerState {
    pub repo: Arc<Repository>,
    pub runner: Arc<ScanRunner>,
    pub universe: UniverseConfig,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/scan/run", post(run_scan))
        .route("/api/scan/active", get(active_scan))
        .route("/api/scan/{scan_id}", get(scan_status))
        .route("/api/scan/{scan_id}/logs", get(scan_logs))
        .route("/api/scan/latest/logs", get(latest_scan_logs))
        .route("/api/recommendations/latest", get(latest_recommendations))
        .route("/api/recommendations/latest/all", get(all_recommendations))
        .route("/api/symbol/{symbol}/details", get(symbol_details))
        .route("/api/scan/{scan_id}/symbol/{symbol}", delete(delete_symbol))
        .route("/api/scan/latest/symbol/{symbol}", delete(delete_symbol_latest))
        .route("/api/admin/clear-all", delete(clear_all))
        .route("/api/symbols/reload", post(reload_symbols))
        .with_state(state)
}

pub async fn serve(state: ServerState, server: &ServerConfig) -> Result<()> {
    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("HTTP API listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ScanStartedResponse {
    pub scan_id: i64,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ActiveScanResponse {
    pub active: Option<ScanProgress>,
}

#[derive(Debug, Serialize)]
pub struct ScanStatusResponse {
    #[serde(flatten)]
    pub scan: ScanRow,
    pub recommended_count: i64,
    /// Live counters, present while this scan is the one running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ScanProgress>,
}

#[derive(Debug, Serialize)]
pub struct ScanLogsResponse {
    pub scan_id: i64,
    pub logs: Vec<ScanLogRow>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub count: usize,
    pub recommendations: Vec<RecommendationSummary>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub scan_id: i64,
    pub symbol: String,
    pub deleted: DeletedCounts,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: ClearedCounts,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub total: usize,
    pub added: usize,
}

#[derive(Debug, Deserialize)]
pub struct DetailsQuery {
    pub scan_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    #[serde(default)]
    pub confirm: bool,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Kick off a scan in the background. 409 when one is already running.
pub async fn run_scan(
    State(state): State<ServerState>,
) -> Result<Json<ScanStartedResponse>, ApiError> {
    let scan_id = state.runner.start_detached().await?;
    Ok(Json(ScanStartedResponse {
        scan_id,
        status: "started",
    }))
}

pub async fn active_scan(State(state): State<ServerState>) -> Json<ActiveScanResponse> {
    Json(ActiveScanResponse {
        active: state.runner.tracker().snapshot().await,
    })
}

pub async fn scan_status(
    State(state): State<ServerState>,
    Path(scan_id): Path<i64>,
) -> Result<Json<ScanStatusResponse>, ApiError> {
    let scan = state
        .repo
        .get_scan(scan_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("scan {scan_id} not found")))?;
    let recommended_count = state.repo.recommended_count_for(scan_id).await?;
    let progress = state
        .runner
        .tracker()
        .snapshot()
        .await
        .filter(|p| p.scan_id == scan_id);
    Ok(Json(ScanStatusResponse {
        scan,
        recommended_count,
        progress,
    }))
}

pub async fn scan_logs(
    State(state): State<ServerState>,
    Path(scan_id): Path<i64>,
) -> Result<Json<ScanLogsResponse>, ApiError> {
    if state.repo.get_scan(scan_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("scan {scan_id} not found")));
    }
    let logs = state.repo.scan_logs(scan_id).await?;
    Ok(Json(ScanLogsResponse { scan_id, logs }))
}

pub async fn latest_scan_logs(
    State(state): State<ServerState>,
) -> Result<Json<ScanLogsResponse>, ApiError> {
    let scan = state
        .repo
        .latest_scan()
        .await?
        .ok_or_else(|| ApiError::NotFound("no scans recorded yet".into()))?;
    let logs = state.repo.scan_logs(scan.id).await?;
    Ok(Json(ScanLogsResponse {
        scan_id: scan.id,
        logs,
    }))
}

/// Actionable picks only: each symbol's newest result where recommended.
pub async fn latest_recommendations(
    State(state): State<ServerState>,
) -> Result<Json<RecommendationsResponse>, ApiError> {
    let recommendations = state.repo.latest_recommendations(true).await?;
    Ok(Json(RecommendationsResponse {
        count: recommendations.len(),
        recommendations,
    }))
}

/// Every symbol's newest result, recommended or not.
pub async fn all_recommendations(
    State(state): State<ServerState>,
) -> Result<Json<RecommendationsResponse>, ApiError> {
    let recommendations = state.repo.latest_recommendations(false).await?;
    Ok(Json(RecommendationsResponse {
        count: recommendations.len(),
        recommendations,
    }))
}

pub async fn symbol_details(
    State(state): State<ServerState>,
    Path(symbol): Path<String>,
    Query(query): Query<DetailsQuery>,
) -> Result<Json<SymbolDetail>, ApiError> {
    let symbol = cleaner::normalise_symbol(&symbol);
    state
        .repo
        .symbol_detail(&symbol, query.scan_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no results for {symbol}")))
}

pub async fn delete_symbol(
    State(state): State<ServerState>,
    Path((scan_id, symbol)): Path<(i64, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    delete_symbol_from(&state, scan_id, &symbol).await
}

pub async fn delete_symbol_latest(
    State(state): State<ServerState>,
    Path(symbol): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let scan = state
        .repo
        .latest_scan()
        .await?
        .ok_or_else(|| ApiError::NotFound("no scans recorded yet".into()))?;
    delete_symbol_from(&state, scan.id, &symbol).await
}

async fn delete_symbol_from(
    state: &ServerState,
    scan_id: i64,
    symbol: &str,
) -> Result<Json<DeleteResponse>, ApiError> {
    let symbol = cleaner::normalise_symbol(symbol);
    let deleted = state.repo.delete_symbol_records(scan_id, &symbol).await?;
    if deleted.fundamentals == 0
        && deleted.technicals == 0
        && deleted.recommendations == 0
        && deleted.logs == 0
    {
        return Err(ApiError::NotFound(format!(
            "no rows for {symbol} in scan {scan_id}"
        )));
    }
    Ok(Json(DeleteResponse {
        scan_id,
        symbol,
        deleted,
    }))
}

/// Wipe everything. Requires `confirm=true` and refuses while a scan runs.
pub async fn clear_all(
    State(state): State<ServerState>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ClearResponse>, ApiError> {
    if !query.confirm {
        return Err(ApiError::BadRequest(
            "pass confirm=true to wipe all stored data".into(),
        ));
    }
    if let Some(progress) = state.runner.tracker().snapshot().await {
        return Err(ApiError::Conflict(format!(
            "scan {} is running; wait for it to finish",
            progress.scan_id
        )));
    }
    let cleared = state.repo.clear_all().await?;
    Ok(Json(ClearResponse { cleared }))
}

/// Re-read the symbols file and add anything new to the universe.
pub async fn reload_symbols(
    State(state): State<ServerState>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let symbols = universe::read_symbols_file(&state.universe.symbols_file)?;
    let added = state.repo.upsert_symbols(&symbols).await?;
    Ok(Json(ReloadResponse {
        total: symbols.len(),
        added,
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{Reachability, SourceChain, SyntheticSource};
    use crate::config::ScanConfig;
    use crate::scan::ScanTracker;

    async fn state() -> ServerState {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        repo.run_migrations().await.unwrap();
        let chain = Arc::new(SourceChain::new(
            vec![Arc::new(SyntheticSource::new(3))],
            Reachability::fixed(true),
        ));
        let tracker = Arc::new(ScanTracker::new());
        let runner = Arc::new(ScanRunner::new(
            Arc::clone(&repo),
            chain,
            tracker,
            ScanConfig {
                concurrency: 2,
                daily_skip: false,
            },
        ));
        ServerState {
            repo,
            runner,
            universe: UniverseConfig {
                symbols_file: "/nonexistent/symbols.txt".into(),
            },
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = health().await;
        assert_eq!(response.0.status, "ok");
    }

    #[tokio::test]
    async fn unknown_scan_is_not_found() {
        let state = state().await;
        match scan_status(State(state), Path(42)).await {
            Err(ApiError::NotFound(_)) => {}
            _ => panic!("expected 404"),
        }
    }

    #[tokio::test]
    async fn clear_all_requires_confirmation() {
        let state = state().await;
        match clear_all(State(state), Query(ClearQuery { confirm: false })).await {
            Err(ApiError::BadRequest(_)) => {}
            _ => panic!("expected 400"),
        }
    }

    #[tokio::test]
    async fn active_scan_is_null_when_idle() {
        let state = state().await;
        let response = active_scan(State(state)).await;
        assert!(response.0.active.is_none());
    }
}
