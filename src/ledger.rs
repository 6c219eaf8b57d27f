//! On-disk history of downloads, so progress survives a restart.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    ffi::OsString,
    path::{Path, PathBuf},
};

use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};
use tracing::debug;

use crate::{
    error::DownloadError,
    store::{DownloadRecord, DownloadStatus},
};

/// How many records the ledger keeps. The oldest are dropped first.
pub const LEDGER_CAPACITY: usize = 50;

pub type Records = HashMap<String, DownloadRecord>;

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    /// Held for the whole snapshot-and-write so writes never interleave, and
    /// an older snapshot never lands after a newer one.
    writer: Mutex<()>,
}

pub struct LedgerWriter<'a> {
    ledger: &'a Ledger,
    _guard: MutexGuard<'a, ()>,
}

impl LedgerWriter<'_> {
    pub async fn write(&self, records: &[DownloadRecord]) -> Result<(), DownloadError> {
        self.ledger.write_locked(records).await
    }
}

/// Orders records newest first. Ids break ties, they are ULIDs so they sort
/// by creation time too.
pub fn newest_first(a: &DownloadRecord, b: &DownloadRecord) -> std::cmp::Ordering {
    b.start_time
        .cmp(&a.start_time)
        .then_with(|| b.id.cmp(&a.id))
}

/// The records that fit in the ledger: the most recently started ones.
pub fn history(records: &Records) -> Vec<&DownloadRecord> {
    let mut history = records.values().collect::<Vec<_>>();
    history.sort_by(|a, b| newest_first(a, b));
    history.truncate(LEDGER_CAPACITY);
    history
}

/// Forget finished records that no longer fit in the history, so the registry
/// lists the same records after a restart as before. Running downloads are
/// always kept. Returns how many were dropped.
pub fn trim(records: &mut Records) -> usize {
    let keep = history(records)
        .into_iter()
        .map(|record| record.id.clone())
        .collect::<HashSet<_>>();
    let before = records.len();
    records.retain(|id, record| record.is_active() || keep.contains(id));
    before - records.len()
}

/// Marks every download that was running when the ledger was written as
/// failed. Nothing can still be writing to them. Returns the records that
/// changed.
pub fn reconcile(records: &mut Records) -> Vec<DownloadRecord> {
    records
        .values_mut()
        .filter(|record| record.status == DownloadStatus::Downloading)
        .filter_map(|record| {
            record
                .fail(DownloadError::RestartInterruption.to_string())
                .then(|| record.clone())
        })
        .collect()
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Ledger {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing ledger is an empty one.
    pub async fn load(&self) -> Result<Records, DownloadError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No ledger at {}, starting empty", self.path.display());
                return Ok(Records::new());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Takes the writer lock. Snapshot the records only after this returns,
    /// so an older snapshot can never land after a newer one.
    pub async fn lock(&self) -> LedgerWriter<'_> {
        LedgerWriter {
            ledger: self,
            _guard: self.writer.lock().await,
        }
    }

    async fn write_locked(&self, records: &[DownloadRecord]) -> Result<(), DownloadError> {
        let document = records
            .iter()
            .map(|record| (record.id.as_str(), record))
            .collect::<BTreeMap<_, _>>();
        let data = serde_json::to_vec_pretty(&document)?;

        // Write next to the ledger then swap it in, so a reader never sees a
        // half-written file.
        let mut tmp_name = OsString::from(self.path.as_os_str());
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &self.path).await?;
        debug!(
            "Wrote {} records to {}",
            document.len(),
            self.path.display()
        );
        Ok(())
    }
}
