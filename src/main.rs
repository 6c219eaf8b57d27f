use actix_web::{web::Data, App, HttpServer};
use ractor::Actor;
use stowaway::{
    api,
    config::Config,
    download_actor::{self, Coordinator},
    registry::Downloads,
};
use tracing::{error, info};
use tracing_subscriber::{
    fmt::format::FmtSpan, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_span_events(FmtSpan::NEW | FmtSpan::CLOSE))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    info!("Download root is {}", config.root.display());

    // Progress is kept in a ledger file so the download history survives a
    // restart.
    let downloads = match Downloads::open(&config.ledger_path).await {
        Ok(downloads) => downloads,
        Err(err) => {
            error!(
                "Could not open ledger {}: {}",
                config.ledger_path.display(),
                err
            );
            return Err(std::io::Error::new(std::io::ErrorKind::Other, err));
        }
    };

    // The download coordinator runs every download concurrently.
    let coordinator = Coordinator::new(downloads.clone(), config.persist_interval);
    let (actor, handle) = Actor::spawn(Some("coordinator".to_string()), coordinator, ())
        .await
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;

    let bind = config.bind.clone();
    let grace = config.shutdown_grace;
    let server_downloads = downloads.clone();
    let server_actor = actor.clone();
    let server_config = config.clone();
    info!("Listening on http://{}", bind);
    HttpServer::new(move || {
        App::new()
            .wrap(api::cors())
            .app_data(Data::new(server_downloads.clone()))
            .app_data(Data::new(server_actor.clone()))
            .app_data(Data::new(server_config.clone()))
            .configure(api::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    info!("Server stopped, waiting for running downloads");
    let drained = download_actor::drain(&actor, grace).await;
    downloads.persist_or_log().await;
    // Anything still running is reconciled on the next start.
    match drained {
        Some(count) => {
            info!("{} downloads finished before shutdown", count);
            actor.stop(None);
        }
        None => actor.kill(),
    }
    if let Err(err) = handle.await {
        error!("Coordinator ended abnormally: {}", err);
    }
    Ok(())
}
