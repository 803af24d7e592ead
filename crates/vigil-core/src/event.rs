//! Feed payload model and decode boundary.
//!
//! The upstream feed delivers loosely-typed JSON. Everything crossing into
//! the watcher is decoded here into one of three known shapes or rejected;
//! no business logic ever sees a raw payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// A decoded inbound feed event.
///
/// The `type` field of the raw payload selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedPayload {
    /// An entity moved to a new location, or cleared it.
    Location {
        entity_id: String,
        display_name: String,
        /// Opaque location token; `None` means the entity reports no location.
        location: Option<String>,
        /// Free-form upstream context, passed through to notifications.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// An entity came online. Carries no location; that arrives separately.
    Online {
        entity_id: String,
        display_name: String,
    },
    /// An entity went offline.
    Offline { entity_id: String },
}

impl FeedPayload {
    /// The entity this payload refers to.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Location { entity_id, .. }
            | Self::Online { entity_id, .. }
            | Self::Offline { entity_id } => entity_id,
        }
    }
}

/// Decode a raw feed payload into one of the known event shapes.
///
/// Unknown kinds, missing required fields, and empty identifiers are all
/// rejected with [`Error::Validation`]; callers log and drop rejected
/// payloads rather than letting them reach the state store.
pub fn decode_payload(value: &Value) -> Result<FeedPayload> {
    let payload: FeedPayload = serde_json::from_value(value.clone())
        .map_err(|e| Error::Validation(format!("unrecognized feed payload: {}", e)))?;
    validate_payload(&payload)?;
    Ok(payload)
}

fn validate_payload(payload: &FeedPayload) -> Result<()> {
    if payload.entity_id().is_empty() {
        return Err(Error::Validation("empty entity_id".to_string()));
    }

    match payload {
        FeedPayload::Location {
            display_name,
            location,
            ..
        } => {
            if display_name.is_empty() {
                return Err(Error::Validation("empty display_name".to_string()));
            }
            if let Some(loc) = location
                && loc.is_empty()
            {
                return Err(Error::Validation(
                    "empty location token; use null for no location".to_string(),
                ));
            }
        }
        FeedPayload::Online { display_name, .. } => {
            if display_name.is_empty() {
                return Err(Error::Validation("empty display_name".to_string()));
            }
        }
        FeedPayload::Offline { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_location() {
        let value = json!({
            "type": "location",
            "entity_id": "u1",
            "display_name": "Alice",
            "location": "world:A",
        });

        let payload = decode_payload(&value).unwrap();
        assert_eq!(
            payload,
            FeedPayload::Location {
                entity_id: "u1".to_string(),
                display_name: "Alice".to_string(),
                location: Some("world:A".to_string()),
                context: None,
            }
        );
    }

    #[test]
    fn test_decode_location_null_means_no_location() {
        let value = json!({
            "type": "location",
            "entity_id": "u1",
            "display_name": "Alice",
            "location": null,
        });

        let payload = decode_payload(&value).unwrap();
        match payload {
            FeedPayload::Location { location, .. } => assert_eq!(location, None),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_online_and_offline() {
        let online = json!({"type": "online", "entity_id": "u1", "display_name": "Alice"});
        let offline = json!({"type": "offline", "entity_id": "u1"});

        assert!(matches!(
            decode_payload(&online).unwrap(),
            FeedPayload::Online { .. }
        ));
        assert!(matches!(
            decode_payload(&offline).unwrap(),
            FeedPayload::Offline { .. }
        ));
    }

    #[test]
    fn test_decode_carries_context() {
        let value = json!({
            "type": "location",
            "entity_id": "u1",
            "display_name": "Alice",
            "location": "world:B",
            "context": "instance 42",
        });

        match decode_payload(&value).unwrap() {
            FeedPayload::Location { context, .. } => {
                assert_eq!(context.as_deref(), Some("instance 42"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_reject_unknown_kind() {
        let value = json!({"type": "teleport", "entity_id": "u1"});
        assert!(decode_payload(&value).is_err());
    }

    #[test]
    fn test_reject_missing_fields() {
        // Location without display_name
        let value = json!({"type": "location", "entity_id": "u1", "location": "world:A"});
        assert!(decode_payload(&value).is_err());

        // Online without entity_id
        let value = json!({"type": "online", "display_name": "Alice"});
        assert!(decode_payload(&value).is_err());
    }

    #[test]
    fn test_reject_empty_identifiers() {
        let value = json!({"type": "offline", "entity_id": ""});
        assert!(decode_payload(&value).is_err());

        let value = json!({
            "type": "location",
            "entity_id": "u1",
            "display_name": "Alice",
            "location": "",
        });
        assert!(decode_payload(&value).is_err());
    }

    #[test]
    fn test_reject_non_object() {
        assert!(decode_payload(&json!("just a string")).is_err());
        assert!(decode_payload(&json!(42)).is_err());
    }
}
