//! Entity records and the persisted snapshot document.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last-known state of one watched entity.
///
/// Records are created on first observation, mutated in place afterwards,
/// and never deleted during normal operation; stale entries simply stop
/// updating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Stable upstream identifier; the identity key of the mapping.
    pub id: String,

    /// Human-readable name. Drifts independently of state transitions.
    pub display_name: String,

    /// Opaque location token. `None` means offline / no location.
    pub state: Option<String>,

    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

/// The whole-file snapshot document persisted by the state store.
///
/// The `entities` field is required: a document without it fails to
/// deserialize, which the store treats as absence of prior data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Entity id -> last-known record.
    pub entities: HashMap<String, EntityRecord>,
}

impl Snapshot {
    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the snapshot tracks no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, state: Option<&str>) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            display_name: format!("name-{}", id),
            state: state.map(str::to_string),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut snapshot = Snapshot::default();
        snapshot
            .entities
            .insert("u1".to_string(), record("u1", Some("world:A")));
        snapshot.entities.insert("u2".to_string(), record("u2", None));

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(
            restored.entities.get("u1").unwrap().state.as_deref(),
            Some("world:A")
        );
        assert_eq!(restored.entities.get("u2").unwrap().state, None);
    }

    #[test]
    fn test_snapshot_rejects_wrong_shape() {
        assert!(serde_json::from_str::<Snapshot>(r#"{"not":"valid"}"#).is_err());
        assert!(serde_json::from_str::<Snapshot>(r#"[1,2,3]"#).is_err());
    }

    #[test]
    fn test_snapshot_empty() {
        let snapshot = Snapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.len(), 0);
    }
}
