use std::{
    env,
    path::{Component, Path, PathBuf},
};

use lazy_static::lazy_static;
use ractor::{cast, ActorRef};
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};
use ulid::Ulid;

use crate::{
    download_actor::{Coordinator, CoordinatorMsg, StartDownload},
    error::DownloadError,
    registry::Downloads,
    store::DownloadRecord,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub url: Option<String>,
    pub target_path: Option<String>,
    pub filename: Option<String>,
}

/// Replace characters that are path separators or invalid in file names with
/// `-`. Names made only of dots would point at a directory, so their dots go
/// too.
pub fn sanitize_filename(name: &str) -> String {
    lazy_static! {
        static ref FORBIDDEN: Regex = Regex::new(r#"[/\\?%*:|"<>]"#).unwrap();
    }
    let name = FORBIDDEN.replace_all(name, "-");
    if !name.is_empty() && name.chars().all(|c| c == '.') {
        return "-".repeat(name.len());
    }
    name.into_owned()
}

/// Normalise `.` and `..` without touching the filesystem. `..` never climbs
/// above the root.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// The absolute directory a download goes to. Clients send `"undefined"` when
/// they have no directory selected.
pub fn resolve_target(root: &Path, target: Option<&str>) -> Result<PathBuf, DownloadError> {
    let target = match target {
        None | Some("") | Some("undefined") => root,
        Some(target) => Path::new(target),
    };
    if target.is_absolute() {
        return Ok(normalize(target));
    }
    let cwd = env::current_dir().map_err(|err| {
        DownloadError::FetchSetup(format!("cannot resolve {}: {}", target.display(), err))
    })?;
    Ok(normalize(&cwd.join(target)))
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, DownloadError> {
    match value.as_deref() {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DownloadError::InvalidRequest(field)),
    }
}

/// Validate a request, record it and hand it to the coordinator. Returns the
/// new download's id without waiting for any data.
#[tracing::instrument(level = "debug", skip(root, downloads, coordinator))]
pub async fn accept(
    request: DownloadRequest,
    root: &Path,
    downloads: &Downloads,
    coordinator: &ActorRef<Coordinator>,
) -> Result<String, DownloadError> {
    let url = required(&request.url, "url")?;
    let filename = required(&request.filename, "filename")?;

    let url = Url::parse(url).map_err(|err| DownloadError::FetchSetup(format!("{url}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DownloadError::FetchSetup(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }

    let filename = sanitize_filename(filename);
    let path = resolve_target(root, request.target_path.as_deref())?.join(&filename);
    let id = Ulid::new().to_string();
    debug!("Accepted {} as {} into {}", url, id, path.display());

    downloads
        .insert(DownloadRecord::new(id.clone(), filename, path.clone()))
        .await;
    downloads.persist_or_log().await;

    let msg = CoordinatorMsg::StartDownload(StartDownload {
        id: id.clone(),
        url: url.to_string(),
        path,
    });
    if let Err(err) = cast!(coordinator, msg) {
        let reason = format!("coordinator is not running: {}", err);
        downloads
            .update(&id, |record| record.fail(reason.clone()))
            .await;
        downloads.persist_or_log().await;
        return Err(DownloadError::FetchSetup(reason));
    }
    info!("Queued download {}", id);
    Ok(id)
}
