use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures::StreamExt;
use ractor::{
    concurrency::JoinHandle, rpc::CallResult, Actor, ActorId, ActorProcessingErr, ActorRef,
    RpcReplyPort, SupervisionEvent,
};
use reqwest::Client;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::DownloadError,
    registry::{remove_part_file, Downloads},
    speed::MovingAverage,
    store::part_path,
};

/// How often the speed estimate is refreshed.
const SPEED_SAMPLE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Coordinator {
    pub downloads: Downloads,
    pub client: Client,
    /// Minimum time between ledger writes from one downloader.
    pub persist_interval: Duration,
}

impl Coordinator {
    pub fn new(downloads: Downloads, persist_interval: Duration) -> Self {
        Coordinator {
            downloads,
            client: Client::new(),
            persist_interval,
        }
    }
}

#[derive(Debug)]
pub struct CoordinatorState {
    pub children: HashMap<ActorId, DownloaderRef>,
}

#[derive(Debug)]
pub struct DownloaderRef {
    pub download_id: String,
    pub path: PathBuf,
    /// Taken when the coordinator is drained.
    pub handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone)]
pub struct StartDownload {
    pub id: String,
    pub url: String,
    pub path: PathBuf,
}

pub enum CoordinatorMsg {
    StartDownload(StartDownload),
    /// Wait for every running download to end, replying with how many there
    /// were.
    Drain(RpcReplyPort<usize>),
}

/// An actor that downloads one file. It does all of its work while starting,
/// then stops itself.
#[derive(Debug)]
pub struct Downloader {
    pub id: String,
    pub url: String,
    pub path: PathBuf,
    pub client: Client,
    pub downloads: Downloads,
    pub persist_interval: Duration,
}

impl Downloader {
    /// Stream the response into the `.part` file, then move it into place.
    async fn transfer(&self) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| DownloadError::Fetch(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Fetch(format!("HTTP {}", status)));
        }

        let total = response.content_length().unwrap_or(0);
        self.downloads
            .update(&self.id, |record| record.total = total)
            .await;

        let part = part_path(&self.path);
        debug!("Writing {} to {}", self.url, part.display());
        let mut file = File::create(&part).await.map_err(DownloadError::stream)?;

        let mut last_persist = Instant::now();
        let mut last_sample = Instant::now();
        let mut bytes_since_sample = 0u64;
        let mut average = MovingAverage::new();

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let received = chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(DownloadError::stream)?;
            bytes_since_sample += received;

            let elapsed = last_sample.elapsed();
            let speed = if elapsed >= SPEED_SAMPLE {
                average.add(bytes_since_sample, elapsed);
                bytes_since_sample = 0;
                last_sample = Instant::now();
                Some(average.bytes_per_second())
            } else {
                None
            };
            self.downloads
                .update(&self.id, |record| {
                    record.received += received;
                    if let Some(speed) = speed {
                        record.speed = speed;
                    }
                })
                .await;

            if last_persist.elapsed() >= self.persist_interval {
                self.downloads.persist_or_log().await;
                last_persist = Instant::now();
            }
        }

        // Make sure the data is written to disk before we call the download complete
        file.flush().await.map_err(DownloadError::stream)?;
        file.sync_all().await.map_err(DownloadError::stream)?;
        drop(file);

        fs::rename(&part, &self.path)
            .await
            .map_err(DownloadError::stream)?;
        Ok(())
    }

    /// Record how the transfer ended. The `.part` file is gone before the
    /// record leaves `downloading`.
    async fn finish(&self, outcome: Result<(), DownloadError>) {
        match outcome {
            Ok(()) => {
                info!("Download {} saved to {}", self.id, self.path.display());
                self.downloads
                    .update(&self.id, |record| record.complete())
                    .await;
            }
            Err(err) => {
                warn!("Download {} of {} failed: {}", self.id, self.url, err);
                remove_part_file(&self.path).await;
                self.downloads
                    .update(&self.id, |record| record.fail(err.to_string()))
                    .await;
            }
        }
        self.downloads.persist_or_log().await;
    }
}

#[async_trait::async_trait]
impl Actor for Downloader {
    /// Downloader does not accept any messages, you start a download and let it finish.
    type Msg = ();

    type State = ();
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self>,
        _: (),
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(())
    }

    /// Run the download to the end. Failures are written to the record rather
    /// than returned, so one broken download never disturbs the coordinator.
    async fn post_start(
        &self,
        myself: ActorRef<Self>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!("Downloading {} to {}", self.url, self.path.display());
        let outcome = self.transfer().await;
        self.finish(outcome).await;
        myself.stop(None);
        Ok(())
    }
}

impl Coordinator {
    async fn start_download(
        &self,
        myself: &ActorRef<Self>,
        state: &mut CoordinatorState,
        start: StartDownload,
    ) {
        let downloader = Downloader {
            id: start.id.clone(),
            url: start.url,
            path: start.path.clone(),
            client: self.client.clone(),
            downloads: self.downloads.clone(),
            persist_interval: self.persist_interval,
        };
        match Actor::spawn_linked(None, downloader, (), myself.get_cell()).await {
            Ok((actor, handle)) => {
                state.children.insert(
                    actor.get_id(),
                    DownloaderRef {
                        download_id: start.id,
                        path: start.path,
                        handle: Some(handle),
                    },
                );
            }
            Err(err) => {
                error!("Could not start downloader for {}: {}", start.id, err);
                self.downloads
                    .update(&start.id, |record| {
                        record.fail(format!("Could not start download: {}", err))
                    })
                    .await;
                self.downloads.persist_or_log().await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Actor for Coordinator {
    type Msg = CoordinatorMsg;
    type State = CoordinatorState;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self>,
        _: (),
    ) -> Result<Self::State, ActorProcessingErr> {
        debug!("Starting coordinator");
        Ok(CoordinatorState {
            children: HashMap::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMsg::StartDownload(download) => {
                self.start_download(&myself, state, download).await;
            }
            CoordinatorMsg::Drain(reply) => {
                let handles = state
                    .children
                    .values_mut()
                    .filter_map(|child| child.handle.take())
                    .collect::<Vec<_>>();
                let count = handles.len();
                info!("Waiting for {} downloads to finish", count);
                for handle in handles {
                    if let Err(err) = handle.await {
                        warn!("Downloader ended abnormally: {}", err);
                    }
                }
                if reply.send(count).is_err() {
                    debug!("Nobody is waiting for the drain to finish");
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(child, _state, _reason) => {
                if let Some(child) = state.children.remove(&child.get_id()) {
                    debug!("Downloader for {} stopped", child.download_id);
                }
                Ok(())
            }
            SupervisionEvent::ActorPanicked(child, err) => {
                let Some(child) = state.children.remove(&child.get_id()) else {
                    return Ok(());
                };
                error!("Downloader for {} crashed: {:?}", child.download_id, err);
                remove_part_file(&child.path).await;
                self.downloads
                    .update(&child.download_id, |record| {
                        record.fail(format!("Download crashed: {}", err))
                    })
                    .await;
                self.downloads.persist_or_log().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Wait up to `grace` for running downloads to end. Returns how many were
/// waited for, or `None` if they did not all finish in time.
pub async fn drain(coordinator: &ActorRef<Coordinator>, grace: Duration) -> Option<usize> {
    match coordinator.call(CoordinatorMsg::Drain, Some(grace)).await {
        Ok(CallResult::Success(count)) => Some(count),
        Ok(CallResult::Timeout) => {
            warn!("Downloads still running after {:?}, giving up", grace);
            None
        }
        Ok(CallResult::SenderError) => {
            warn!("Coordinator stopped before replying");
            None
        }
        Err(err) => {
            warn!("Could not reach the coordinator: {}", err);
            None
        }
    }
}
