use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

// ── Acquisition ───────────────────────────────────────────────────────────────

/// Failure from one remote source. Never fatal: the chain advances to the
/// next source, so these only surface as debug/warn logs and the data-quality
/// `source` note on the persisted record.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("unparseable response: {0}")]
    Parse(String),

    #[error("source does not offer fundamentals")]
    FundamentalsUnsupported,
}

impl SourceError {
    /// Worth one more attempt before the chain moves on. Client-side 4xx and
    /// parse failures are not: the same request will fail the same way.
    pub fn retryable(&self) -> bool {
        match self {
            SourceError::Transport(e) => e.is_timeout() || e.is_connect(),
            SourceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

// ── Series shape ──────────────────────────────────────────────────────────────

/// Why an accepted price series could not be screened normally. `Insufficient`
/// maps to an `ignore` log entry, `Malformed` to an `error` entry.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("insufficient history: {got} sessions, need {need}")]
    Insufficient { got: usize, need: usize },

    #[error("malformed series: {0}")]
    Malformed(String),
}

// ── Orchestration ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan {0} is already running")]
    AlreadyRunning(i64),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// ── API boundary ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::AlreadyRunning(id) => {
                ApiError::Conflict(format!("scan {id} is already running"))
            }
            ScanError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(e) => {
                tracing::error!("request failed: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
