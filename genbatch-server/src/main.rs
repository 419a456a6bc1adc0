mod clients;
mod config;
mod routes;
mod state;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use genbatch::{store::memory::InMemoryStore, store::Store, Orchestrator};
use genbatch_sqlx::PgStore;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{load_config, validate_config, Config, StoreKind};
use clients::{HttpGenerationWorker, HttpWorkItemRepository};
use routes::create_router;
use state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("GENBATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("genbatch.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let store = create_store(&config).await?;
    let worker = HttpGenerationWorker::new(&config.worker.url, config.worker.timeout())
        .context("Failed to create the generation worker client")?;
    info!("Generation worker at {}", config.worker.url);
    let repository = HttpWorkItemRepository::new(&config.repository.url);
    info!("Work item repository at {}", config.repository.url);

    let orchestrator = Orchestrator::new(store, Arc::new(repository), Arc::new(worker))
        .with_config(config.orchestrator());
    let app = create_router(Arc::new(AppState::new(orchestrator)));

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn create_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.store.kind {
        StoreKind::Memory => {
            info!("Using the in memory store, jobs will not survive a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreKind::Postgres => {
            let url = config
                .store
                .url
                .as_deref()
                .context("store.url is required for the postgres store")?;
            let pool = PgPoolOptions::new()
                .max_connections(config.store.max_connections)
                .connect(url)
                .await
                .context("Failed to connect to the database")?;
            let store = PgStore::from(pool);
            store
                .migrate()
                .await
                .context("Failed to run database migrations")?;
            info!("Postgres store initialized");
            Ok(Arc::new(store))
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
