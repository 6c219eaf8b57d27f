//! HTTP endpoints the browser extension polls and posts to.

use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::{
    get, post,
    web::{self, Data, Json},
    HttpResponse, Responder,
};
use ractor::ActorRef;
use serde::Serialize;
use tracing::debug;

use crate::{
    config::Config,
    download_actor::Coordinator,
    error::DownloadError,
    intake::{self, DownloadRequest},
    registry::Downloads,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    success: bool,
    download_id: String,
}

#[derive(Debug, Serialize)]
struct Success {
    success: bool,
}

/// Conventional folders under the root, offered as download targets.
#[derive(Debug, Serialize)]
pub struct SystemPaths {
    pub home: PathBuf,
    pub desktop: PathBuf,
    pub documents: PathBuf,
    pub downloads: PathBuf,
    pub music: PathBuf,
    pub pictures: PathBuf,
    pub videos: PathBuf,
}

impl SystemPaths {
    pub fn under(root: PathBuf) -> Self {
        SystemPaths {
            desktop: root.join("Desktop"),
            documents: root.join("Documents"),
            downloads: root.join("Downloads"),
            music: root.join("Music"),
            pictures: root.join("Pictures"),
            videos: root.join("Videos"),
            home: root,
        }
    }
}

#[post("/download-from-url")]
#[tracing::instrument(level = "info", skip(downloads, coordinator, config))]
async fn download_from_url(
    request: Json<DownloadRequest>,
    downloads: Data<Downloads>,
    coordinator: Data<ActorRef<Coordinator>>,
    config: Data<Config>,
) -> Result<HttpResponse, DownloadError> {
    let download_id = intake::accept(
        request.into_inner(),
        &config.root,
        &downloads,
        &coordinator,
    )
    .await?;
    Ok(HttpResponse::Ok().json(Accepted {
        success: true,
        download_id,
    }))
}

#[get("/downloads")]
#[tracing::instrument(level = "debug", skip(downloads))]
async fn list_downloads(downloads: Data<Downloads>) -> impl Responder {
    HttpResponse::Ok().json(downloads.list().await)
}

#[post("/clear-downloads")]
#[tracing::instrument(level = "info", skip(downloads))]
async fn clear_downloads(downloads: Data<Downloads>) -> impl Responder {
    let removed = downloads.clear_finished().await;
    debug!("Removed {} records", removed);
    HttpResponse::Ok().json(Success { success: true })
}

#[get("/system-paths")]
#[tracing::instrument(level = "debug", skip(config))]
async fn system_paths(config: Data<Config>) -> impl Responder {
    HttpResponse::Ok().json(SystemPaths::under(config.root.clone()))
}

/// Cross-origin policy for every endpoint. The extension page has its own
/// origin and sends JSON, so preflight requests must be answered.
pub fn cors() -> Cors {
    Cors::permissive()
}

/// Register every endpoint. The app must provide `Data<Downloads>`,
/// `Data<ActorRef<Coordinator>>` and `Data<Config>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(download_from_url)
        .service(list_downloads)
        .service(clear_downloads)
        .service(system_paths);
}
