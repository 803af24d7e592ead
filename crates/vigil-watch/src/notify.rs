//! Outbound notification channel.
//!
//! Delivery is fire-and-forget from the watcher's perspective: the sink owns
//! its own retry policy, and the watcher only logs and counts failures.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{Error, Result};

/// What kind of transition a notice describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Moved between locations.
    Location,
    /// Came online from offline.
    Online,
    /// Went offline.
    Offline,
}

/// One presence transition, ready for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionNotice {
    pub kind: TransitionKind,
    pub entity_id: String,
    pub display_name: String,
    pub previous: Option<String>,
    pub current: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Delivery channel for transition notices.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify_transition(&self, notice: &TransitionNotice) -> Result<()>;
}

/// Sink that posts each notice as JSON to a webhook URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Notify(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotifySink for WebhookSink {
    async fn notify_transition(&self, notice: &TransitionNotice) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| Error::Notify(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notify(format!(
                "webhook returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

/// Sink that logs each notice. Used when no webhook is configured.
pub struct LogSink;

#[async_trait]
impl NotifySink for LogSink {
    async fn notify_transition(&self, notice: &TransitionNotice) -> Result<()> {
        tracing::info!(
            kind = ?notice.kind,
            entity = %notice.entity_id,
            name = %notice.display_name,
            previous = ?notice.previous,
            current = ?notice.current,
            "presence transition"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_serialization() {
        let notice = TransitionNotice {
            kind: TransitionKind::Location,
            entity_id: "u1".to_string(),
            display_name: "Alice".to_string(),
            previous: Some("world:A".to_string()),
            current: Some("world:B".to_string()),
            context: None,
        };

        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "location");
        assert_eq!(json["previous"], "world:A");
        // context is omitted entirely when absent
        assert!(json.get("context").is_none());
    }

    #[test]
    fn test_notice_null_states() {
        let notice = TransitionNotice {
            kind: TransitionKind::Offline,
            entity_id: "u1".to_string(),
            display_name: "Alice".to_string(),
            previous: Some("world:A".to_string()),
            current: None,
            context: Some("left instance".to_string()),
        };

        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "offline");
        assert!(json["current"].is_null());
        assert_eq!(json["context"], "left instance");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_notice() {
        let notice = TransitionNotice {
            kind: TransitionKind::Online,
            entity_id: "u1".to_string(),
            display_name: "Alice".to_string(),
            previous: None,
            current: Some("online".to_string()),
            context: None,
        };

        LogSink.notify_transition(&notice).await.unwrap();
    }
}
