//! Collaborator configuration loaded from environment variables.
//!
//! Operational knobs (paths, ports, timing) live on the CLI; the upstream
//! endpoints and credentials come from the environment so they stay out of
//! process listings.

use crate::{Error, Result};

/// Upstream collaborator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Feed subscription endpoint (newline-delimited JSON stream).
    pub feed_url: String,

    /// Presence snapshot endpoint (JSON array of entity states).
    pub presence_url: String,

    /// Bearer token for the upstream feed (required).
    pub feed_token: String,

    /// Webhook URL for transition notices. Log-only when unset.
    pub webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `VIGIL_FEED_TOKEN`: Bearer token for the upstream feed
    ///
    /// Optional:
    /// - `VIGIL_FEED_URL`: Feed stream endpoint (default: "http://127.0.0.1:4455/feed")
    /// - `VIGIL_PRESENCE_URL`: Presence snapshot endpoint (default: "http://127.0.0.1:4455/presence")
    /// - `VIGIL_WEBHOOK_URL`: Webhook for transition notices (default: log only)
    pub fn from_env() -> Result<Self> {
        let feed_url = std::env::var("VIGIL_FEED_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:4455/feed".to_string());

        let presence_url = std::env::var("VIGIL_PRESENCE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:4455/presence".to_string());

        let feed_token = std::env::var("VIGIL_FEED_TOKEN")
            .map_err(|_| Error::Config("VIGIL_FEED_TOKEN environment variable is required".to_string()))?;
        if feed_token.trim().is_empty() {
            return Err(Error::Config("VIGIL_FEED_TOKEN must not be empty".to_string()));
        }

        let webhook_url = std::env::var("VIGIL_WEBHOOK_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        tracing::info!(
            feed_url = %feed_url,
            presence_url = %presence_url,
            webhook = webhook_url.is_some(),
            "configuration loaded"
        );

        Ok(Self {
            feed_url,
            presence_url,
            feed_token,
            webhook_url,
        })
    }
}
