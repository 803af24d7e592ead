//! Event pipeline wiring.
//!
//! Consumes the supervisor's ordered feed events, decodes payloads at the
//! boundary, applies them to the state store, and forwards true transitions
//! to the notification sink. Events are applied strictly in channel order;
//! there is no parallel application, so transition detection never races.
//!
//! On every (re)connect the orchestrator runs a reconciliation pass: it
//! fetches the upstream presence snapshot, notifies where the persisted
//! state disagrees with it, then seeds the store without reporting
//! transitions. Entities never seen before are seeded silently.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::notify::{NotifySink, TransitionKind, TransitionNotice};
use crate::source::FeedConnector;
use crate::store::StateStore;
use crate::supervisor::FeedEvent;
use vigil_core::{FeedPayload, decode_payload};

/// State token recorded when an entity comes online before any location
/// event has arrived for it.
const ONLINE_STATE: &str = "online";

/// Wires the feed event channel to the store and the notification sink.
pub struct Orchestrator {
    connector: Arc<dyn FeedConnector>,
    store: Arc<StateStore>,
    sink: Arc<dyn NotifySink>,
    events: mpsc::Receiver<FeedEvent>,
}

impl Orchestrator {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        store: Arc<StateStore>,
        sink: Arc<dyn NotifySink>,
        events: mpsc::Receiver<FeedEvent>,
    ) -> Self {
        Self {
            connector,
            store,
            sink,
            events,
        }
    }

    /// Drain feed events until the supervisor closes the channel.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                FeedEvent::Connected { epoch } => {
                    tracing::info!(epoch, "feed connected, reconciling presence");
                    self.reconcile().await;
                }
                FeedEvent::Payload(value) => self.apply_payload(&value).await,
                FeedEvent::Disconnected => {
                    tracing::info!("feed connection lost, awaiting reconnect");
                }
            }
        }
        tracing::debug!("feed event channel closed");
    }

    /// Compare persisted state against a fresh upstream snapshot, notify on
    /// divergence, then seed the store without reporting transitions.
    ///
    /// Seeding goes through `set_initial`, so transitions that happened
    /// while the watcher was down are notified exactly once (here), not a
    /// second time when the next live event confirms the same state.
    async fn reconcile(&self) {
        let snapshot = match self.connector.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Live events will still converge the store; reconciliation
                // just loses the offline-window diff.
                tracing::warn!("presence snapshot fetch failed: {}", e);
                return;
            }
        };

        let mut diverged = 0usize;
        for entry in &snapshot {
            let known = self.store.get(&entry.entity_id);
            if let Some(record) = &known
                && record.state.as_deref() != entry.state.as_deref()
            {
                diverged += 1;
                self.deliver(TransitionNotice {
                    kind: kind_for(record.state.as_deref(), entry.state.as_deref()),
                    entity_id: entry.entity_id.clone(),
                    display_name: entry.display_name.clone(),
                    previous: record.state.clone(),
                    current: entry.state.clone(),
                    context: None,
                })
                .await;
            }

            self.store
                .set_initial(&entry.entity_id, &entry.display_name, entry.state.as_deref());
        }

        tracing::info!(
            entities = snapshot.len(),
            diverged,
            "presence reconciliation complete"
        );
    }

    /// Decode one raw payload and apply it to the store.
    async fn apply_payload(&self, value: &Value) {
        let payload = match decode_payload(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("dropping malformed feed payload: {}", e);
                metrics::counter!("feed_events_invalid_total").increment(1);
                return;
            }
        };

        match payload {
            FeedPayload::Location {
                entity_id,
                display_name,
                location,
                context,
            } => {
                let transition = self
                    .store
                    .update(&entity_id, &display_name, location.as_deref());
                if transition.changed {
                    self.deliver(TransitionNotice {
                        kind: kind_for(transition.previous.as_deref(), location.as_deref()),
                        entity_id,
                        display_name,
                        previous: transition.previous,
                        current: transition.current,
                        context,
                    })
                    .await;
                }
            }
            FeedPayload::Online {
                entity_id,
                display_name,
            } => {
                let known_state = self.store.get(&entity_id).and_then(|r| r.state);
                if known_state.is_none() {
                    // Offline -> online; the location, if any, arrives as a
                    // separate event and becomes its own transition.
                    let transition = self
                        .store
                        .update(&entity_id, &display_name, Some(ONLINE_STATE));
                    if transition.changed {
                        self.deliver(TransitionNotice {
                            kind: TransitionKind::Online,
                            entity_id,
                            display_name,
                            previous: transition.previous,
                            current: transition.current,
                            context: None,
                        })
                        .await;
                    }
                } else {
                    // Already online somewhere: only the name can drift.
                    self.store.update_display_name(&entity_id, &display_name);
                }
            }
            FeedPayload::Offline { entity_id } => {
                let Some(record) = self.store.get(&entity_id) else {
                    // Never observed; nothing recorded, nothing to notify.
                    return;
                };
                let transition = self.store.update(&entity_id, &record.display_name, None);
                if transition.changed {
                    self.deliver(TransitionNotice {
                        kind: TransitionKind::Offline,
                        entity_id,
                        display_name: record.display_name,
                        previous: transition.previous,
                        current: None,
                        context: None,
                    })
                    .await;
                }
            }
        }
    }

    async fn deliver(&self, notice: TransitionNotice) {
        metrics::counter!("presence_transitions_total").increment(1);
        if let Err(e) = self.sink.notify_transition(&notice).await {
            // The channel owns retries; we only record the failure.
            tracing::warn!(entity = %notice.entity_id, "notification delivery failed: {}", e);
            metrics::counter!("notify_failures_total").increment(1);
        }
    }
}

/// Transition kind from the before/after pair.
fn kind_for(previous: Option<&str>, current: Option<&str>) -> TransitionKind {
    match (previous, current) {
        (_, None) => TransitionKind::Offline,
        (None, Some(_)) => TransitionKind::Online,
        (Some(_), Some(_)) => TransitionKind::Location,
    }
}
