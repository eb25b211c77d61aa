use std::process;

use simplecache::{
    cache::{CacheError, FileStore, ResponseCache, sweep_once},
    config::{self, Settings},
    infra::{error::InfraError, http, telemetry, upstream::Upstream},
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const INSTANCE_NAME: &str = "simplecache";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn run_serve(settings: Settings) -> Result<(), InfraError> {
    let upstream = Upstream::from_settings(&settings.upstream)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let cache = ResponseCache::new(settings.cache.clone(), INSTANCE_NAME, shutdown_rx.clone())?;
    let router = http::build_router(cache.clone(), upstream.clone());

    let listener = tokio::net::TcpListener::bind(settings.server.addr).await?;
    info!(
        addr = %settings.server.addr,
        upstream = %upstream.base_url(),
        "simplecache listening"
    );

    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        },
    );
    let mut server = tokio::spawn(server.into_future());

    let result = tokio::select! {
        joined = &mut server => flatten_server_result(joined),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received; draining connections");
            let _ = shutdown_tx.send(true);

            match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
                Ok(joined) => flatten_server_result(joined),
                Err(_) => {
                    warn!(
                        timeout_secs = settings.server.graceful_shutdown.as_secs(),
                        "graceful shutdown timed out; aborting open connections"
                    );
                    server.abort();
                    Ok(())
                }
            }
        }
    };

    let _ = shutdown_tx.send(true);
    cache.shutdown().await;
    info!("simplecache stopped");

    result
}

fn flatten_server_result(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), InfraError> {
    match joined {
        Ok(result) => result.map_err(InfraError::from),
        Err(err) => Err(InfraError::Io(std::io::Error::other(err))),
    }
}

async fn run_sweep(settings: Settings) -> Result<(), InfraError> {
    let path = settings.cache.path.clone();
    let store = FileStore::open(&path)
        .map_err(|err| CacheError::store_open(&path, err))?;

    match sweep_once(INSTANCE_NAME, &store).await {
        Some(stats) => {
            info!(
                path = %path.display(),
                scanned = stats.scanned,
                removed = stats.removed,
                bytes_reclaimed = stats.bytes_reclaimed,
                "sweep finished"
            );
            Ok(())
        }
        None => Err(InfraError::Io(std::io::Error::other(format!(
            "sweep of {} failed",
            path.display()
        )))),
    }
}
