//! Feed staleness watchdog.

use std::time::{Duration, Instant};

/// Watches time-since-last-event and flags staleness.
///
/// Staleness is a liveness signal distinct from connection state: a push
/// feed with naturally sparse traffic can go quiet while perfectly healthy.
/// The watchdog therefore only observes and warns; it never alters the
/// connection state or forces a reconnect. The supervisor owns the check
/// interval and starts/stops it with itself.
#[derive(Debug, Clone)]
pub struct Watchdog {
    threshold: Duration,
}

impl Watchdog {
    /// Create a watchdog with the given staleness threshold.
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Age of the last event, if it exceeds the staleness threshold.
    ///
    /// Returns `None` when no event has arrived yet (nothing to measure
    /// against) or when the feed is fresh.
    pub fn observe(&self, last_event_at: Option<Instant>) -> Option<Duration> {
        let age = last_event_at?.elapsed();
        (age > self.threshold).then_some(age)
    }
}
