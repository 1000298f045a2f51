//! Liveness endpoint.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the HTTP router.
pub fn build_router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
}

/// Serve the liveness endpoint until the process exits.
pub async fn run_server(addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind liveness listener on {addr}"))?;
    info!("Service alerter listening on {addr}");

    axum::serve(listener, build_router())
        .await
        .context("liveness server stopped")?;

    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}
