use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{fs, sync::Mutex};
use tracing::{debug, error, info, warn};

use crate::{
    error::DownloadError,
    ledger::{self, Ledger, Records},
    store::{part_path, DownloadRecord},
};

/// Every download this process knows about. Cloning gives another handle to
/// the same registry.
#[derive(Debug, Clone)]
pub struct Downloads {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    records: Mutex<Records>,
    ledger: Ledger,
}

impl Downloads {
    /// Load the ledger at `path`, failing any download the previous run left
    /// unfinished.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let ledger = Ledger::new(path);
        if let Some(parent) = ledger.path().parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut records = match ledger.load().await {
            Ok(records) => records,
            Err(DownloadError::LedgerFormat(err)) => {
                warn!(
                    "Ignoring unreadable ledger {}: {}",
                    ledger.path().display(),
                    err
                );
                Records::new()
            }
            Err(err) => return Err(err),
        };

        let interrupted = ledger::reconcile(&mut records);
        for record in &interrupted {
            warn!("Download {} was interrupted by a restart", record.id);
            remove_part_file(&record.path).await;
        }

        let downloads = Downloads {
            inner: Arc::new(Inner {
                records: Mutex::new(records),
                ledger,
            }),
        };
        if !interrupted.is_empty() {
            downloads.persist().await?;
        }
        Ok(downloads)
    }

    pub async fn insert(&self, record: DownloadRecord) {
        self.inner
            .records
            .lock()
            .await
            .insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &str) -> Option<DownloadRecord> {
        self.inner.records.lock().await.get(id).cloned()
    }

    /// Apply `f` to the record under one lock. `None` if the id is unknown,
    /// e.g. because the record was cleared.
    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut DownloadRecord) -> R) -> Option<R> {
        self.inner.records.lock().await.get_mut(id).map(f)
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<DownloadRecord> {
        let records = self.inner.records.lock().await;
        let mut list = records.values().cloned().collect::<Vec<_>>();
        list.sort_by(ledger::newest_first);
        list
    }

    /// Drop every finished or failed record. Running downloads are kept.
    /// Returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let removed = {
            let mut records = self.inner.records.lock().await;
            let before = records.len();
            records.retain(|_, record| record.is_active());
            before - records.len()
        };
        info!("Cleared {} finished downloads", removed);
        self.persist_or_log().await;
        removed
    }

    /// Write the most recent records to the ledger. Finished records that
    /// fall out of the history are dropped from the registry too.
    pub async fn persist(&self) -> Result<(), DownloadError> {
        let writer = self.inner.ledger.lock().await;
        let snapshot = {
            let mut records = self.inner.records.lock().await;
            let dropped = ledger::trim(&mut records);
            if dropped > 0 {
                debug!("Dropped {} old records", dropped);
            }
            ledger::history(&records)
                .into_iter()
                .cloned()
                .collect::<Vec<_>>()
        };
        writer.write(&snapshot).await
    }

    /// Like `persist`, for callers that have no one to report a failure to.
    /// The registry stays authoritative, the next write catches up.
    pub async fn persist_or_log(&self) {
        if let Err(err) = self.persist().await {
            error!("Failed to persist downloads: {}", err);
        }
    }
}

/// Delete the in-progress file belonging to the destination `path`, if any.
pub async fn remove_part_file(path: &Path) {
    let part = part_path(path);
    match fs::remove_file(&part).await {
        Ok(()) => info!("Removed partial file {}", part.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove partial file {}: {}", part.display(), err),
    }
}
