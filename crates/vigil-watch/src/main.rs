//! Vigil presence watcher daemon.
//!
//! Watches a set of remote entities through the upstream presence feed,
//! detects location/presence transitions, notifies each exactly once, and
//! persists last-known state across restarts.
//!
//! # Usage
//!
//! ```bash
//! # Run with default settings (feed endpoints from VIGIL_* env vars)
//! VIGIL_FEED_TOKEN=... vigil-watch
//!
//! # Run with a custom snapshot path and ports
//! VIGIL_FEED_TOKEN=... vigil-watch \
//!     --snapshot-path /var/lib/vigil/presence.json \
//!     --status-port 8090 \
//!     --metrics-port 9090
//! ```
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) for graceful shutdown:
//! 1. Stops the connection supervisor (tearing down the live subscription)
//! 2. Drains the in-flight event pipeline
//! 3. Flushes the state snapshot, cancelling any pending debounce window
//! 4. Exits cleanly

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vigil_core::metrics::{init_metrics, start_metrics_server};
use vigil_watch::{
    BackoffPolicy, Config, HttpFeedConnector, LogSink, NotifySink, Orchestrator, RandomJitter,
    StateStore, StoreConfig, Supervisor, SupervisorConfig, WebhookSink,
    source::FeedConnector,
    status::{StatusState, start_status_server},
};

/// Vigil presence watcher daemon.
#[derive(Parser, Debug)]
#[command(name = "vigil-watch")]
#[command(about = "Presence watcher daemon")]
#[command(version)]
struct Args {
    /// Snapshot file for last-known entity state
    #[arg(long, default_value = "./data/presence.json")]
    snapshot_path: PathBuf,

    /// Quiet window before a snapshot write, in milliseconds
    #[arg(long, default_value = "2000")]
    persist_debounce_ms: u64,

    /// Base reconnect delay, in milliseconds
    #[arg(long, default_value = "1000")]
    backoff_base_ms: u64,

    /// Reconnect delay ceiling, in seconds
    #[arg(long, default_value = "60")]
    backoff_max_secs: u64,

    /// Cooldown after an authentication rejection, in seconds
    #[arg(long, default_value = "900")]
    auth_cooldown_secs: u64,

    /// Deadline on each connect attempt, in seconds
    #[arg(long, default_value = "30")]
    connect_timeout_secs: u64,

    /// Interval between feed staleness checks, in seconds
    #[arg(long, default_value = "60")]
    watchdog_interval_secs: u64,

    /// Feed age that counts as stale, in seconds
    #[arg(long, default_value = "600")]
    staleness_secs: u64,

    /// Status HTTP port (0 to disable)
    #[arg(long, default_value = "8090")]
    status_port: u16,

    /// Metrics HTTP port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("vigil_watch=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    tracing::info!("Vigil presence watcher starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
    }

    // Open the state store
    let store = Arc::new(
        StateStore::open(StoreConfig {
            snapshot_path: args.snapshot_path.clone(),
            debounce: Duration::from_millis(args.persist_debounce_ms),
        })
        .with_context(|| format!("Failed to open state store at {:?}", args.snapshot_path))?,
    );
    tracing::info!(
        "State store: {} ({} entities)",
        args.snapshot_path.display(),
        store.len()
    );

    // Wire the collaborators
    let connector: Arc<dyn FeedConnector> = Arc::new(
        HttpFeedConnector::new(
            config.feed_url.clone(),
            config.presence_url.clone(),
            config.feed_token.clone(),
        )
        .context("Failed to build feed connector")?,
    );

    let sink: Arc<dyn NotifySink> = match &config.webhook_url {
        Some(url) => {
            tracing::info!("Notifications: webhook {}", url);
            Arc::new(WebhookSink::new(url.clone()).context("Failed to build webhook sink")?)
        }
        None => {
            tracing::info!("Notifications: log only (no webhook configured)");
            Arc::new(LogSink)
        }
    };

    // Build the supervisor and pipeline
    let supervisor_config = SupervisorConfig {
        backoff: BackoffPolicy {
            base: Duration::from_millis(args.backoff_base_ms),
            max: Duration::from_secs(args.backoff_max_secs),
            ..BackoffPolicy::default()
        },
        auth_cooldown: Duration::from_secs(args.auth_cooldown_secs),
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        watchdog_interval: Duration::from_secs(args.watchdog_interval_secs),
        staleness_threshold: Duration::from_secs(args.staleness_secs),
    };

    let (supervisor, handle, events) =
        Supervisor::new(supervisor_config, Arc::clone(&connector), Box::new(RandomJitter));
    let orchestrator = Orchestrator::new(connector, Arc::clone(&store), sink, events);

    // Status endpoint
    if args.status_port > 0 {
        start_status_server(
            args.status_port,
            StatusState {
                supervisor: handle.clone(),
                store: Arc::clone(&store),
            },
        )
        .await
        .context("Failed to start status server")?;
    }

    // Graceful shutdown on Ctrl+C
    let stop_handle = handle.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        stop_handle.stop();
    })
    .context("Failed to set Ctrl+C handler")?;

    // Run until stopped: the orchestrator drains the event channel, which
    // closes when the supervisor exits.
    let supervisor_task = tokio::spawn(supervisor.run());
    orchestrator.run().await;
    supervisor_task
        .await
        .context("Supervisor task panicked")?;

    // Shutdown sequence: flush the final debounce window
    tracing::info!("Shutting down...");
    store.flush();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Entities tracked:    {}", store.len());
    tracing::info!("Snapshot writes:     {}", store.persist_count());
    tracing::info!("Last event at:       {:?}", handle.last_event_at());

    Ok(())
}
