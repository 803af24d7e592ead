//! State-diff store.
//!
//! Converts possibly-redundant "current state" observations into true
//! transitions and keeps the last-known state of every watched entity
//! durable across restarts.
//!
//! # Persistence
//!
//! The whole entity mapping serializes to one JSON document, written whole
//! (temp file + rename). Writes are debounced: every mutation restarts a
//! fixed-delay timer and only a quiet window triggers a write, so a burst of
//! transitions collapses into a single write. [`StateStore::flush`] cancels
//! the pending window and writes immediately; the shutdown path calls it to
//! avoid losing the final debounce window.
//!
//! Durability is best-effort: a missing, malformed, or wrongly-shaped
//! snapshot on load degrades to an empty store, and a failed write leaves
//! the in-memory mapping authoritative.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::Result;
use vigil_core::{EntityRecord, Snapshot};

/// Result of applying one observation to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Whether the observation changed the recorded state.
    pub changed: bool,
    /// State before the observation (`None` = offline / never seen).
    pub previous: Option<String>,
    /// State after the observation.
    pub current: Option<String>,
}

/// Configuration for the state store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the persisted snapshot document.
    pub snapshot_path: PathBuf,

    /// Quiet window required before a persist is written.
    pub debounce: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("./data/presence.json"),
            debounce: Duration::from_secs(2),
        }
    }
}

/// Entity state store with debounced write-behind persistence.
///
/// Thread-safe; mutations are applied under one lock, in call order.
pub struct StateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    entities: Mutex<Snapshot>,
    /// Pending debounce timer. Aborted before each replacement so at most
    /// one timer is live at any moment.
    pending: Mutex<Option<JoinHandle<()>>>,
    persists: AtomicU64,
}

impl StateStore {
    /// Open the store, loading any prior snapshot from disk.
    ///
    /// The snapshot's parent directory is created if missing. A snapshot
    /// that cannot be read or parsed is discarded, not an error.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if let Some(parent) = config.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = load_snapshot(&config.snapshot_path);
        tracing::info!(
            path = %config.snapshot_path.display(),
            entities = snapshot.len(),
            "state store opened"
        );
        metrics::gauge!("watched_entities").set(snapshot.len() as f64);

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                entities: Mutex::new(snapshot),
                pending: Mutex::new(None),
                persists: AtomicU64::new(0),
            }),
        })
    }

    /// Last-known record for an entity, if any.
    pub fn get(&self, id: &str) -> Option<EntityRecord> {
        self.inner.entities.lock().entities.get(id).cloned()
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.inner.entities.lock().len()
    }

    /// Whether the store tracks no entities.
    pub fn is_empty(&self) -> bool {
        self.inner.entities.lock().is_empty()
    }

    /// Apply one live observation.
    ///
    /// When the observed state equals the recorded one (including both
    /// `None`), nothing is mutated and no persist is scheduled. Otherwise
    /// the record is replaced, a debounced persist is scheduled, and the
    /// previous/current pair is returned with `changed = true`.
    pub fn update(&self, id: &str, display_name: &str, new_state: Option<&str>) -> Transition {
        let mut snapshot = self.inner.entities.lock();
        let previous = snapshot.entities.get(id).and_then(|r| r.state.clone());

        if previous.as_deref() == new_state {
            return Transition {
                changed: false,
                previous: previous.clone(),
                current: previous,
            };
        }

        let current = new_state.map(str::to_string);
        snapshot.entities.insert(
            id.to_string(),
            EntityRecord {
                id: id.to_string(),
                display_name: display_name.to_string(),
                state: current.clone(),
                updated_at: Utc::now(),
            },
        );
        metrics::gauge!("watched_entities").set(snapshot.len() as f64);
        drop(snapshot);

        self.schedule_persist();

        Transition {
            changed: true,
            previous,
            current,
        }
    }

    /// Seed a record unconditionally, reporting no transition.
    ///
    /// Startup reconciliation only: the caller compares [`get`] against the
    /// fresh upstream value first if it wants to notify.
    ///
    /// [`get`]: StateStore::get
    pub fn set_initial(&self, id: &str, display_name: &str, state: Option<&str>) {
        let mut snapshot = self.inner.entities.lock();
        snapshot.entities.insert(
            id.to_string(),
            EntityRecord {
                id: id.to_string(),
                display_name: display_name.to_string(),
                state: state.map(str::to_string),
                updated_at: Utc::now(),
            },
        );
        metrics::gauge!("watched_entities").set(snapshot.len() as f64);
        drop(snapshot);

        self.schedule_persist();
    }

    /// Patch only the display name of an existing record.
    ///
    /// Display names drift independently of state transitions. No-op when
    /// the entity is unknown or the name is unchanged.
    pub fn update_display_name(&self, id: &str, display_name: &str) {
        let mut snapshot = self.inner.entities.lock();
        let Some(record) = snapshot.entities.get_mut(id) else {
            return;
        };
        if record.display_name == display_name {
            return;
        }

        record.display_name = display_name.to_string();
        record.updated_at = Utc::now();
        drop(snapshot);

        self.schedule_persist();
    }

    /// Cancel any pending debounce window and write immediately.
    ///
    /// Required at shutdown so the last debounce window is not lost.
    pub fn flush(&self) {
        if let Some(handle) = self.inner.pending.lock().take() {
            handle.abort();
        }
        self.inner.persist();
    }

    /// Number of completed snapshot writes.
    pub fn persist_count(&self) -> u64 {
        self.inner.persists.load(Ordering::Relaxed)
    }

    /// (Re)start the debounce timer. Must run on the tokio runtime.
    fn schedule_persist(&self) {
        let mut pending = self.inner.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        let inner = Arc::clone(&self.inner);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.config.debounce).await;
            inner.persist();
        }));
    }
}

impl StoreInner {
    /// Write the whole snapshot, replacing the previous file via rename.
    fn persist(&self) {
        let json = {
            let snapshot = self.entities.lock();
            serde_json::to_string_pretty(&*snapshot)
        };

        let result = json
            .map_err(std::io::Error::other)
            .and_then(|contents| write_whole(&self.config.snapshot_path, &contents));

        match result {
            Ok(()) => {
                self.persists.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("store_persists_total").increment(1);
                tracing::debug!(path = %self.config.snapshot_path.display(), "snapshot persisted");
            }
            Err(e) => {
                // In-memory state stays authoritative; keep serving.
                metrics::counter!("store_persist_failures_total").increment(1);
                tracing::error!(
                    path = %self.config.snapshot_path.display(),
                    "snapshot persist failed: {}",
                    e
                );
            }
        }
    }
}

/// Write a file whole: temp file in the same directory, then rename.
fn write_whole(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Read the snapshot document, degrading to empty on any failure.
fn load_snapshot(path: &Path) -> Snapshot {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Snapshot::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to read snapshot, starting empty: {}", e);
            return Snapshot::default();
        }
    };

    match serde_json::from_str::<Snapshot>(&contents) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                "discarding malformed snapshot, starting empty: {}",
                e
            );
            Snapshot::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(tmp: &TempDir, debounce: Duration) -> StateStore {
        StateStore::open(StoreConfig {
            snapshot_path: tmp.path().join("presence.json"),
            debounce,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_transition_from_initial() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, Duration::from_millis(10));

        store.set_initial("u1", "Alice", None);

        let transition = store.update("u1", "Alice", Some("world:A"));
        assert_eq!(
            transition,
            Transition {
                changed: true,
                previous: None,
                current: Some("world:A".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_update_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, Duration::from_millis(10));

        let first = store.update("u1", "Alice", Some("world:A"));
        assert!(first.changed);

        let second = store.update("u1", "Alice", Some("world:A"));
        assert_eq!(
            second,
            Transition {
                changed: false,
                previous: Some("world:A".to_string()),
                current: Some("world:A".to_string()),
            }
        );

        // Both-None is also unchanged and creates no record
        let absent = store.update("u2", "Bob", None);
        assert!(!absent.changed);
        assert!(store.get("u2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_update_schedules_no_persist() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, Duration::from_millis(50));

        store.update("u1", "Alice", Some("world:A"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.persist_count(), 1);

        // Unchanged observation: no new debounce window
        store.update("u1", "Alice", Some("world:A"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.persist_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_collapses_burst() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, Duration::from_millis(100));

        store.update("u1", "Alice", Some("world:A"));
        store.update("u2", "Bob", Some("world:B"));
        store.update("u1", "Alice", Some("world:C"));

        tokio::time::sleep(Duration::from_millis(500)).await;

        // One write, containing the final state
        assert_eq!(store.persist_count(), 1);

        let reloaded = open_store(&tmp, Duration::from_millis(100));
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get("u1").unwrap().state.as_deref(),
            Some("world:C")
        );
    }

    #[tokio::test]
    async fn test_flush_writes_immediately() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, Duration::from_secs(3600));

        store.update("u1", "Alice", Some("world:A"));
        assert_eq!(store.persist_count(), 0);

        store.flush();
        assert_eq!(store.persist_count(), 1);

        let reloaded = open_store(&tmp, Duration::from_secs(3600));
        assert_eq!(
            reloaded.get("u1").unwrap().state.as_deref(),
            Some("world:A")
        );
    }

    #[tokio::test]
    async fn test_load_malformed_snapshot_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("presence.json");
        std::fs::write(&path, r#"{"not":"valid"}"#).unwrap();

        let store = StateStore::open(StoreConfig {
            snapshot_path: path.clone(),
            debounce: Duration::from_millis(10),
        })
        .unwrap();
        assert!(store.is_empty());

        // Unparseable JSON degrades the same way
        std::fs::write(&path, "###").unwrap();
        let store = StateStore::open(StoreConfig {
            snapshot_path: path,
            debounce: Duration::from_millis(10),
        })
        .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_initial_overwrites_unconditionally() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, Duration::from_millis(10));

        store.update("u1", "Alice", Some("world:A"));
        store.set_initial("u1", "Alice", Some("world:A"));
        store.set_initial("u1", "Alice", None);

        assert_eq!(store.get("u1").unwrap().state, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_display_name() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, Duration::from_millis(50));

        store.set_initial("u1", "Alice", Some("world:A"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.persist_count(), 1);

        store.update_display_name("u1", "Alicia");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let record = store.get("u1").unwrap();
        assert_eq!(record.display_name, "Alicia");
        assert_eq!(record.state.as_deref(), Some("world:A"));
        assert_eq!(store.persist_count(), 2);

        // Unknown entity and unchanged name are both no-ops
        store.update_display_name("ghost", "Nobody");
        store.update_display_name("u1", "Alicia");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get("ghost").is_none());
        assert_eq!(store.persist_count(), 2);
    }

    #[tokio::test]
    async fn test_flush_without_mutations() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, Duration::from_millis(10));

        // Nothing pending: flush still writes the (empty) document
        store.flush();
        assert_eq!(store.persist_count(), 1);

        let reloaded = open_store(&tmp, Duration::from_millis(10));
        assert!(reloaded.is_empty());
    }
}
