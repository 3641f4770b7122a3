pub mod response;

use crate::config::Config;
use crate::error::AppError;
use crate::features::{self, FeatureState};
use crate::middleware;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::{future::Future, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

/// Full application router: `/health` plus the feature routes under `/api/v1`
pub fn router(config: &Config, state: FeatureState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", features::router(state))
        .fallback(not_found)
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

async fn not_found() -> AppError {
    AppError::NotFound("No such route".to_string())
}

/// Resolves on Ctrl+C or SIGTERM, then waits briefly for in-flight requests
pub async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = signal_or_pending("Ctrl+C", signal::ctrl_c());

    #[cfg(unix)]
    let terminate = signal_or_pending("SIGTERM", async {
        signal::unix::signal(signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        Ok::<(), std::io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}

/// Waits for `signal`; a handler that cannot be installed never fires.
async fn signal_or_pending<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!("Failed to install {} handler: {}", name, e);
        std::future::pending::<()>().await;
    }
}
