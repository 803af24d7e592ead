//! Local status endpoint.
//!
//! Read-only view over the supervisor's shared accessors and the store;
//! safe to serve concurrently with state transitions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::StateStore;
use crate::supervisor::SupervisorHandle;

/// Shared state for the status routes.
#[derive(Clone)]
pub struct StatusState {
    pub supervisor: SupervisorHandle,
    pub store: Arc<StateStore>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Liveness probe. Returns ok as long as the process serves requests.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Watcher status response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    connection: String,
    attempts: u32,
    last_event_at: Option<DateTime<Utc>>,
    entities: usize,
}

async fn watch_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let status = state.supervisor.status();
    Json(StatusResponse {
        connection: status.state.to_string(),
        attempts: status.attempts,
        last_event_at: status.last_event_at,
        entities: state.store.len(),
    })
}

/// Build the status router.
pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/status", get(watch_status))
        .with_state(state)
}

/// Serve the status endpoint in the background.
pub async fn start_status_server(port: u16, state: StatusState) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status server listening on http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(state)).await {
            tracing::error!("Status server error: {}", e);
        }
    });

    Ok(())
}
