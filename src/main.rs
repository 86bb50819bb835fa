use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod config;
mod detector;
mod errors;
mod jobs;
mod metrics;
mod models;
mod pipeline;
mod sim;
mod store;

use metrics::Metrics;
use pipeline::{ContextRegistry, IngestQueue};
use store::SqliteStore;

/// Shared application state passed to handlers.
pub struct AppState {
    pub store: SqliteStore,
    pub queue: IngestQueue,
    pub metrics: Arc<Metrics>,
    pub config: config::Config,
    pub started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "driftwatch=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Simulate(sim_args)) => sim::run(sim_args).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Opening store at {}", cfg.database_url);
    let store = SqliteStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    store.migrate().await?;

    let (queue, receivers) = IngestQueue::with_shards(cfg.queue_capacity, cfg.worker_count);
    let registry = Arc::new(ContextRegistry::new(cfg.detection.clone()));
    let metrics = Arc::new(Metrics::default());
    let shared_cfg = Arc::new(cfg.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workers = pipeline::worker::spawn_workers(
        receivers,
        store.clone(),
        registry.clone(),
        shared_cfg.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    );
    tracing::info!(
        workers = workers.len(),
        queue_capacity = cfg.queue_capacity,
        "worker pool started"
    );

    let sweeper = jobs::retention::spawn(store.clone(), shared_cfg, shutdown_rx);
    tracing::info!(
        interval_secs = cfg.sweep_interval.as_secs(),
        "retention sweeper started"
    );

    let state = Arc::new(AppState {
        store,
        queue,
        metrics,
        config: cfg,
        started_at: Instant::now(),
    });

    let app = api::router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("DriftWatch listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Lifecycle: running → draining → stopped. Stop accepting, let workers
    // clear what they can within the drain deadline, then exit.
    tracing::info!("Shutting down: draining ingest queue");
    state.queue.close();
    let _ = shutdown_tx.send(true);

    let deadline = state.config.drain_timeout + Duration::from_secs(1);
    for handle in workers {
        if tokio::time::timeout(deadline, handle).await.is_err() {
            tracing::warn!("worker did not stop within the drain deadline");
        }
    }
    sweeper.abort();
    tracing::info!("DriftWatch stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
