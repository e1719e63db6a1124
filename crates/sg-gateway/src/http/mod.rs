//! HTTP surface
//!
//! Thin adapters from HTTP requests onto the dispatcher, pairing broker,
//! status reporter and supervisor handle.

mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::state::GatewayState;

/// Build the gateway router
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/send", post(routes::send))
        .route("/qr", get(routes::qr))
        .route("/status", get(routes::status))
        .route("/connect", post(routes::connect))
        .route("/logout", post(routes::logout))
        .route("/health", get(routes::health))
        .with_state(state)
}

/// Serve the API on `listener` until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    tracing::info!("HTTP API listening on {}", addr);

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("HTTP server failed")?;

    tracing::info!("HTTP API stopped");
    Ok(())
}
