//! Live visibility into the scan in flight, shared between the runner and
//! the HTTP handlers.

use serde::Serialize;
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::error::ScanError;

/// Counters for the scan in flight. Snapshots are cheap clones.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub scan_id: i64,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub current_symbol: Option<String>,
}

#[derive(Debug)]
enum TrackerState {
    Idle,
    Active(ScanProgress),
}

/// Single-flight guard plus progress counters. Only one scan may be active
/// at a time; `try_begin` hands out a guard that keeps the tracker locked
/// until the caller has created its scan row, so two concurrent starts
/// cannot both win.
pub struct ScanTracker {
    state: RwLock<TrackerState>,
}

impl ScanTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TrackerState::Idle),
        }
    }

    /// Claim the tracker for a new scan, or report the scan already holding
    /// it. Dropping the guard without calling [`StartGuard::activate`]
    /// leaves the tracker idle.
    pub async fn try_begin(&self) -> Result<StartGuard<'_>, ScanError> {
        let guard = self.state.write().await;
        if let TrackerState::Active(progress) = &*guard {
            return Err(ScanError::AlreadyRunning(progress.scan_id));
        }
        Ok(StartGuard { guard })
    }

    pub async fn snapshot(&self) -> Option<ScanProgress> {
        match &*self.state.read().await {
            TrackerState::Idle => None,
            TrackerState::Active(progress) => Some(progress.clone()),
        }
    }

    /// Last writer wins; this is a hint for progress displays, not a queue.
    pub async fn set_current(&self, symbol: &str) {
        if let TrackerState::Active(progress) = &mut *self.state.write().await {
            progress.current_symbol = Some(symbol.to_string());
        }
    }

    pub async fn record_completed(&self) {
        if let TrackerState::Active(progress) = &mut *self.state.write().await {
            progress.completed += 1;
        }
    }

    pub async fn record_skipped(&self) {
        if let TrackerState::Active(progress) = &mut *self.state.write().await {
            progress.skipped += 1;
        }
    }

    pub async fn record_error(&self) {
        if let TrackerState::Active(progress) = &mut *self.state.write().await {
            progress.errors += 1;
        }
    }

    /// Back to idle. Terminal status lives on the scan row; the tracker
    /// only answers "is one running right now".
    pub async fn finish(&self) {
        *self.state.write().await = TrackerState::Idle;
    }
}

impl Default for ScanTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Write lock held between claiming the tracker and publishing the scan.
pub struct StartGuard<'a> {
    guard: RwLockWriteGuard<'a, TrackerState>,
}

impl StartGuard<'_> {
    /// Publish the scan as active and release the start lock.
    pub fn activate(mut self, scan_id: i64, total: usize) {
        *self.guard = TrackerState::Active(ScanProgress {
            scan_id,
            total,
            completed: 0,
            skipped: 0,
            errors: 0,
            current_symbol: None,
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
