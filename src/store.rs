use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Appended to the destination path while a transfer is in progress.
pub const PART_SUFFIX: &str = ".part";

/// Where the in-progress data for `path` is written.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Error,
}

/// The tracked state of one transfer, as served to pollers and stored in
/// the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub id: String,
    pub filename: String,
    /// Final destination, never the `.part` file.
    pub path: PathBuf,
    /// Zero when the server did not advertise a length.
    pub total: u64,
    pub received: u64,
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    /// Bytes per second.
    #[serde(default)]
    pub speed: f64,
}

impl DownloadRecord {
    pub fn new(id: String, filename: String, path: PathBuf) -> Self {
        DownloadRecord {
            id,
            filename,
            path,
            total: 0,
            received: 0,
            status: DownloadStatus::Downloading,
            error: None,
            // The ledger keeps milliseconds, so a reloaded record compares equal.
            start_time: Utc::now().trunc_subsecs(3),
            speed: 0f64,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DownloadStatus::Downloading
    }

    /// Returns false, leaving the record untouched, if it already reached a
    /// terminal status.
    pub fn complete(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = DownloadStatus::Completed;
        self.speed = 0f64;
        true
    }

    /// Returns false, leaving the record untouched, if it already reached a
    /// terminal status.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if !self.is_active() {
            return false;
        }
        let reason = reason.into();
        self.status = DownloadStatus::Error;
        self.error = Some(if reason.is_empty() {
            "Unknown error".to_string()
        } else {
            reason
        });
        self.speed = 0f64;
        true
    }
}
