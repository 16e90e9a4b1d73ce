// src/server/metrics_server.rs

//! Serves the Prometheus registry over HTTP when `metrics.enabled` is set.

use crate::core::metrics::{self, gather_metrics};
use crate::core::state::ServerState;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::{Router, routing::get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

async fn scrape(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    // Resynced with the live set on every scrape.
    metrics::CONNECTED_CLIENTS.set(state.clients.len() as f64);
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], gather_metrics())
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(state)
}

/// Runs until the server-wide shutdown signal fires. Bind failures are logged and
/// leave the WebSocket listener running.
pub async fn run_metrics_server(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let (host, port) = (state.config.host.clone(), state.config.metrics.port);
    let listener = match TcpListener::bind((host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Metrics endpoint could not bind {}:{}: {}", host, port, e);
            return;
        }
    };
    if let Ok(local) = listener.local_addr() {
        info!("Serving Prometheus metrics on http://{}/metrics", local);
    }

    let shutdown = async move {
        let _ = shutdown_rx.recv().await;
        info!("Metrics endpoint stopping.");
    };
    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Metrics endpoint failed: {}", e);
    }
}
