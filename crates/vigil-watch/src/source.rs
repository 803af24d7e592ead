//! Feed source collaborator boundary.
//!
//! The remote event-source client lives behind these traits so the
//! supervisor and orchestrator never depend on a concrete transport, and
//! tests can drive them with scripted connections.
//!
//! [`HttpFeedConnector`] is the shipped adapter: it subscribes to a
//! newline-delimited JSON stream over HTTP and fetches presence snapshots
//! from a companion endpoint.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::{Error, Result};

/// Current state of one watched entity, as reported by the upstream
/// snapshot call. Used once per connection for startup reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceSnapshot {
    pub entity_id: String,
    pub display_name: String,
    /// Opaque location token; `None` means offline / no location.
    pub state: Option<String>,
}

/// One live subscription to the upstream feed.
///
/// Implementations must be cancel-safe in [`next_event`]: the supervisor
/// polls it inside a `select!` and may drop an in-flight call when a
/// command or timer wins the race.
///
/// [`next_event`]: FeedStream::next_event
#[async_trait]
pub trait FeedStream: Send {
    /// Next inbound payload.
    ///
    /// `Ok(Some(value))` is one raw event payload. `Ok(None)` means the
    /// upstream closed the stream; `Err` is a connection fault. Both
    /// non-payload outcomes end the subscription.
    async fn next_event(&mut self) -> Result<Option<Value>>;

    /// Tear the subscription down. Detaches event delivery before closing
    /// the underlying connection, so no fault signal fires during teardown.
    async fn shutdown(&mut self);
}

/// Factory for live feed subscriptions.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Connect and subscribe, returning a live stream.
    ///
    /// The error text carries the upstream failure mode; the supervisor
    /// classifies authentication rejections by message content.
    async fn connect(&self) -> Result<Box<dyn FeedStream>>;

    /// Fetch the current presence of all watched entities.
    async fn snapshot(&self) -> Result<Vec<PresenceSnapshot>>;
}

/// Feed adapter for an HTTP upstream.
///
/// `connect` opens a long-lived GET whose body is newline-delimited JSON
/// payloads; `snapshot` GETs a JSON array of [`PresenceSnapshot`] entries.
/// Both calls authenticate with a bearer token.
pub struct HttpFeedConnector {
    client: reqwest::Client,
    feed_url: String,
    presence_url: String,
    token: String,
}

impl HttpFeedConnector {
    /// Build the adapter. The client carries no overall request timeout:
    /// the feed request is expected to stay open indefinitely. Connect-stage
    /// deadlines are the supervisor's job.
    pub fn new(feed_url: String, presence_url: String, token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Connect(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            feed_url,
            presence_url,
            token,
        })
    }
}

#[async_trait]
impl FeedConnector for HttpFeedConnector {
    async fn connect(&self) -> Result<Box<dyn FeedStream>> {
        let response = self
            .client
            .get(&self.feed_url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // The status line lands in the error text, so a 401 here is
            // picked up by the supervisor's auth classification.
            return Err(Error::Connect(format!(
                "feed subscribe returned {}: {}",
                status, body
            )));
        }

        tracing::debug!(url = %self.feed_url, "feed stream established");

        Ok(Box::new(HttpFeedStream {
            stream: Some(Box::pin(response.bytes_stream())),
            buffer: Vec::new(),
        }))
    }

    async fn snapshot(&self) -> Result<Vec<PresenceSnapshot>> {
        let response = self
            .client
            .get(&self.presence_url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::Feed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Feed(format!(
                "presence fetch returned {}: {}",
                status, body
            )));
        }

        response
            .json::<Vec<PresenceSnapshot>>()
            .await
            .map_err(|e| Error::Feed(format!("presence fetch decode: {}", e)))
    }
}

type BytesStream =
    std::pin::Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

/// Live newline-delimited JSON stream over an HTTP response body.
struct HttpFeedStream {
    /// `None` after shutdown.
    stream: Option<BytesStream>,
    buffer: Vec<u8>,
}

impl HttpFeedStream {
    /// Pop the next complete line out of the buffer, if any.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop(); // trailing \n
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

#[async_trait]
impl FeedStream for HttpFeedStream {
    async fn next_event(&mut self) -> Result<Option<Value>> {
        loop {
            while let Some(line) = self.take_line() {
                if line.is_empty() {
                    continue; // keepalive
                }
                match serde_json::from_slice::<Value>(&line) {
                    Ok(value) => return Ok(Some(value)),
                    Err(e) => {
                        // Unparseable lines are dropped; structural
                        // validation of parsed payloads happens downstream.
                        tracing::debug!("skipping unparseable feed line: {}", e);
                    }
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            match stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(Error::Feed(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    async fn shutdown(&mut self) {
        // Dropping the body stream detaches delivery and closes the
        // connection; no further fault can surface from this subscription.
        self.stream = None;
        self.buffer.clear();
    }
}
