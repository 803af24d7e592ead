//! Prometheus metrics helpers for the vigil watcher.
//!
//! Centralized metrics initialization and the metric descriptions used
//! across the watcher components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vigil_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     use metrics::counter;
//!     counter!("feed_events_total").increment(1);
//! }
//! ```

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded.
/// Returns a handle for [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port. Spawns a background
/// task and returns once the listener is bound.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics used across the watcher.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Feed connection metrics
    // =========================================================================

    describe_counter!(
        "feed_connects_total",
        "Successful connections to the upstream feed"
    );
    describe_counter!(
        "feed_connect_failures_total",
        "Failed connection attempts (label: class)"
    );
    describe_counter!(
        "feed_disconnects_total",
        "Connections lost after being established"
    );
    describe_counter!(
        "feed_staleness_warnings_total",
        "Watchdog warnings about a quiet feed"
    );
    describe_gauge!(
        "feed_connected",
        "Whether the feed connection is live (1=yes, 0=no)"
    );

    // =========================================================================
    // Event pipeline metrics
    // =========================================================================

    describe_counter!("feed_events_total", "Raw events received from the feed");
    describe_counter!(
        "feed_events_invalid_total",
        "Events rejected at the decode boundary"
    );
    describe_counter!(
        "presence_transitions_total",
        "True presence transitions detected"
    );
    describe_counter!(
        "notify_failures_total",
        "Transition notices that failed to deliver"
    );

    // =========================================================================
    // State store metrics
    // =========================================================================

    describe_counter!("store_persists_total", "Snapshot writes to durable storage");
    describe_counter!(
        "store_persist_failures_total",
        "Snapshot writes that failed"
    );
    describe_gauge!("watched_entities", "Entities tracked by the state store");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_metrics_idempotent() {
        // First call may or may not succeed (depends on test order)
        let handle1 = try_init_metrics();

        // Second call should definitely return None (already installed)
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_idempotent() {
        let _ = try_init_metrics();
        // Re-registering descriptions must not panic
        register_common_metrics();
        register_common_metrics();
    }
}
