mod api;
mod config;
mod coordinator;
mod error;
mod generator;
mod messages;
mod pagination;
mod parser;
mod room;
mod scheduler;
mod server;
mod store;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use thiserror::Error;
use tokio::sync::watch;
use warp::Filter;

use config::{load_config, AppConfig};
use coordinator::GenerationCoordinator;
use generator::{CharModel, GeneratorError};
use room::Room;
use scheduler::Scheduler;
use server::Server;
use store::{MessageStore, StoreError};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
enum StartupError {
    #[error("room {room}: {source}")]
    Corpus {
        room: String,
        source: GeneratorError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: warp::Error,
    },
    #[error("final flush to {} failed: {source}", path.display())]
    Flush { path: PathBuf, source: StoreError },
}

#[derive(Parser, Debug)]
#[command(about = "A chat room that keeps talking to itself")]
struct Args {
    /// Path to the JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override the configured port
    #[arg(long)]
    port: Option<u16>,
}

fn build_rooms(config: &AppConfig) -> Result<Vec<Room>, StartupError> {
    config
        .rooms
        .iter()
        .map(|room| {
            let model = CharModel::from_corpus(&room.corpus, room.order)
                .map_err(|source| StartupError::Corpus {
                    room: room.id.clone(),
                    source,
                })?;
            info!(
                "Room {} ready (corpus {}, order {})",
                room.id,
                room.corpus.display(),
                room.order
            );
            Ok(Room::new(
                room.id.clone(),
                room.display_name.clone(),
                room.description.clone(),
                room.system_sender.clone(),
                Arc::new(model),
            ))
        })
        .collect()
}

/// Flips the shutdown channel once `signal` fires. If the signal handler
/// cannot be installed the sender is held open, so the server keeps running.
async fn forward_shutdown_signal<F>(signal: F, shutdown_tx: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn run(config: AppConfig) -> Result<(), StartupError> {
    let rooms = build_rooms(&config)?;

    let store = Arc::new(MessageStore::new(
        config.data_file.clone(),
        config.rooms.iter().map(|room| room.id.clone()),
    ));
    store.load().await;

    let coordinator = Arc::new(GenerationCoordinator::new(
        rooms,
        Arc::clone(&store),
        config.generation.settings(),
    ));
    let scheduler = Scheduler::new(Arc::clone(&coordinator), config.tick_interval());
    let server = Arc::new(Server::new(
        Arc::clone(&coordinator),
        scheduler.clone(),
        config.default_page_size,
        config.max_page_size,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_shutdown_signal(tokio::signal::ctrl_c(), shutdown_tx));

    scheduler.start_empty_rooms().await;
    let scheduler_handle = scheduler.spawn(shutdown_rx.clone());

    let routes = api::routes(server)
        .or(warp::fs::dir(config.static_dir.clone()))
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST", "OPTIONS"])
                .allow_headers(vec!["Content-Type"]),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let mut server_shutdown = shutdown_rx;
    let (bound, serving) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .map_err(|source| StartupError::Bind { addr, source })?;

    info!("Serving {} rooms on {}", config.rooms.len(), bound);
    serving.await;

    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }
    coordinator.shutdown(SHUTDOWN_GRACE).await;

    store.save().await.map_err(|source| StartupError::Flush {
        path: store.path().to_path_buf(),
        source,
    })?;
    info!("Messages flushed to {}", store.path().display());
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let mut config = load_config(&args.config);
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
