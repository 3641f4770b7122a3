//! GameDB Server - Main entry point

use anyhow::{Context, Result};
use gamedb_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, warn};

use gamedb_server::{
    api,
    config::Config,
    db::{self, PgGameStore},
    features::FeatureState,
    ingest::{JsonGamesImporter, PgJobQueue, WorkerSettings},
    middleware::TokenAuthorizer,
    storage::{self, StorageConfig},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables take precedence over these defaults
    let log_config = LogConfig::default()
        .with_prefix("gamedb-server")
        .with_filter("gamedb_server=debug,tower_http=debug,sqlx=warn")
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting GameDB Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );
    if config.admin.tokens.is_empty() {
        warn!("GAMEDB_ADMIN_TOKENS is empty; every admin endpoint will answer 401");
    }

    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to the database")?;
    db::health_check(&db_pool)
        .await
        .context("Database health check failed")?;
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run migrations")?;

    let staging = storage::init(&StorageConfig::from_env()?).await?;
    info!("Staging store initialized");

    let games = Arc::new(PgGameStore::new(db_pool.clone()));
    let state = FeatureState::new(
        staging,
        Arc::new(PgJobQueue::new(db_pool.clone())),
        games.clone(),
        Arc::new(JsonGamesImporter::new(games)),
        Arc::new(TokenAuthorizer::new(config.admin.tokens.clone())),
        &config.import,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = Arc::new(state.worker_pool(WorkerSettings::from_config(&config.import)));
    let mut background = pool.spawn(shutdown_rx.clone());
    background.push(state.cleanup.clone().spawn_sweeper(
        config.import.orphan_ttl(),
        config.import.sweep_interval(),
        shutdown_rx,
    ));

    let app = api::router(&config, state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(api::shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("HTTP server stopped, waiting for import workers");
    let _ = shutdown_tx.send(true);

    let workers = futures::future::join_all(background);
    let wait = Duration::from_secs(config.server.shutdown_timeout_secs);
    if tokio::time::timeout(wait, workers).await.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Import workers did not stop in time; unfinished jobs will be redelivered"
        );
    }

    info!("Server shut down gracefully");

    Ok(())
}
