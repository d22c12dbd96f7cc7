//! Entity and relationship types (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// `<namespace>/<localId>` (spec §6: "Entity id form"). `local_id` is a lowercase ULID-style
/// string; `namespace` is plural-cased by convention (e.g. `posts`) but that is not enforced
/// here — only the two-segment shape is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    /// The namespace (collection) this entity belongs to.
    pub namespace: String,
    /// The id local to that namespace.
    pub local_id: String,
}

impl EntityId {
    /// Construct directly from parts.
    pub fn new(namespace: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_id: local_id.into(),
        }
    }

    /// Parse `"namespace/localId"`.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let mut parts = s.splitn(2, '/');
        let namespace = parts.next().filter(|s| !s.is_empty());
        let local_id = parts.next().filter(|s| !s.is_empty());
        match (namespace, local_id) {
            (Some(ns), Some(id)) => Ok(Self::new(ns, id)),
            _ => Err(SchemaError::InvalidEntityId {
                id: s.to_string(),
                reason: "expected exactly one '/' separating a non-empty namespace and id".into(),
            }),
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.local_id)
    }
}

/// A document-oriented entity (spec §3 "Entity").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// `$id`.
    pub id: EntityId,
    /// `$type`.
    pub type_: String,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creator actor id.
    pub created_by: String,
    /// Last-update time.
    pub updated_at: DateTime<Utc>,
    /// Last-updater actor id.
    pub updated_by: String,
    /// Strictly positive, starts at 1, increments by exactly one per successful update.
    pub version: u64,
    /// Soft-delete marker time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Soft-delete marker actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    /// Arbitrary JSON-shaped application payload.
    pub payload: serde_json::Value,
}

impl EntityRecord {
    /// True if this entity has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A directed, tagged relationship between two entities (spec §3 "Relationship").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source namespace.
    pub from_ns: String,
    /// Source local id.
    pub from_id: String,
    /// Application-defined predicate, e.g. `"author"`.
    pub predicate: String,
    /// Target namespace.
    pub to_ns: String,
    /// Target local id.
    pub to_id: String,
    /// Version, same semantics as [`EntityRecord::version`].
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creator actor id.
    pub created_by: String,
    /// Last-update time.
    pub updated_at: DateTime<Utc>,
    /// Last-updater actor id.
    pub updated_by: String,
    /// Optional application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Relationship {
    /// The tuple that identifies this relationship (ignoring version/payload), used as a map key.
    pub fn key(&self) -> (String, String, String, String, String) {
        (
            self.from_ns.clone(),
            self.from_id.clone(),
            self.predicate.clone(),
            self.to_ns.clone(),
            self.to_id.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_round_trips() {
        let id = EntityId::parse("posts/01hzx000000000000000000000").unwrap();
        assert_eq!(id.namespace, "posts");
        assert_eq!(id.to_string(), "posts/01hzx000000000000000000000");
    }

    #[test]
    fn entity_id_rejects_malformed_input() {
        assert!(EntityId::parse("no-slash").is_err());
        assert!(EntityId::parse("/missing-ns").is_err());
        assert!(EntityId::parse("missing-id/").is_err());
    }
}
