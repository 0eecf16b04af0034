//! Axum HTTP server for the probe endpoints

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::controller::{metrics, ControllerState};
use crate::error::{Error, Result};

/// Source of the readiness verdict reported on `/readyz`
pub trait Readiness: Send + Sync {
    fn is_ready(&self) -> bool;
}

impl Readiness for ControllerState {
    fn is_ready(&self) -> bool {
        ControllerState::is_ready(self)
    }
}

#[derive(Debug, Serialize)]
struct ProbeResponse {
    status: &'static str,
}

async fn healthz() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "ok" })
}

async fn readyz(State(state): State<Arc<dyn Readiness>>) -> (StatusCode, Json<ProbeResponse>) {
    if state.is_ready() {
        (StatusCode::OK, Json(ProbeResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse { status: "not ready" }),
        )
    }
}

async fn metrics_handler() -> (StatusCode, String) {
    match metrics::encode() {
        Ok(buffer) => (StatusCode::OK, buffer),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Build the probe router
pub fn router(state: Arc<dyn Readiness>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the probe endpoints on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<dyn Readiness>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::ConfigError(format!("Probe server error: {}", e)))
}

/// Bind `addr` and serve the probe endpoints until `shutdown` resolves
pub async fn run_probe_server<F>(
    addr: SocketAddr,
    state: Arc<dyn Readiness>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("Probe server listening on {}", addr);
    serve(listener, state, shutdown).await
}
