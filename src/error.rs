use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

/// Reason recorded on downloads that were still running when the service
/// last stopped.
pub const RESTART_REASON: &str = "Server restarted";

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Missing required field: {0}")]
    InvalidRequest(&'static str),
    #[error("Could not start download: {0}")]
    FetchSetup(String),
    #[error("Fetch failed: {0}")]
    Fetch(String),
    #[error("{0}")]
    Stream(String),
    #[error("{}", RESTART_REASON)]
    RestartInterruption,
    #[error("Failed to access download ledger: {0}")]
    LedgerIo(#[from] std::io::Error),
    #[error("Download ledger is corrupt: {0}")]
    LedgerFormat(#[from] serde_json::Error),
}

impl DownloadError {
    /// For I/O failures while a transfer is writing to disk. They must not be
    /// confused with ledger failures, which `?` would produce.
    pub fn stream(err: impl std::fmt::Display) -> Self {
        DownloadError::Stream(err.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    /// Errors raised while reading the body of a response. Errors sending the
    /// request are mapped to `Fetch` where the request is made.
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Stream(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for DownloadError {
    fn status_code(&self) -> StatusCode {
        match self {
            DownloadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}
