//! Mutation events, the durable source of truth (spec §3 "Event").

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// The kind of mutation an [`Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Op {
    /// A new entity or relationship was created.
    Create,
    /// An existing entity or relationship was updated.
    Update,
    /// An entity or relationship was (soft-)deleted.
    Delete,
}

/// What a mutation targeted: either an entity or a relationship tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Target {
    /// An entity mutation.
    Entity {
        /// The entity id.
        id: EntityId,
    },
    /// A relationship mutation.
    Relationship {
        /// Source namespace.
        from_ns: String,
        /// Source local id.
        from_id: String,
        /// Predicate.
        predicate: String,
        /// Target namespace.
        to_ns: String,
        /// Target local id.
        to_id: String,
    },
}

/// An immutable mutation record (spec §3 "Event"). `id` is a ULID (monotonically sortable, see
/// `doc_time::IdGenerator`); `ts` is milliseconds since the epoch and is redundant with the id's
/// embedded timestamp but kept explicit so events remain self-describing once serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// ULID-style sortable id.
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    /// The kind of mutation.
    pub op: Op,
    /// What was mutated.
    pub target: Target,
    /// State before the mutation, if any (absent for CREATE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// State after the mutation, if any (absent for DELETE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    /// The actor that performed the mutation.
    pub actor: String,
}

impl Event {
    /// Approximate serialized size in bytes, used by the WAL buffer to decide when to flush
    /// (spec §4.D: "total bytes ≥ `EVENT_BATCH_SIZE_THRESHOLD`").
    pub fn approx_size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    /// The namespace this event belongs to, for WAL bucketing.
    pub fn namespace(&self) -> &str {
        match &self.target {
            Target::Entity { id } => &id.namespace,
            Target::Relationship { from_ns, .. } => from_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_json_round_trips() {
        let event = Event {
            id: "01hzx000000000000000000000".into(),
            ts: 1_700_000_000_000,
            op: Op::Update,
            target: Target::Entity {
                id: EntityId::new("posts", "01hzx000000000000000000000"),
            },
            before: Some(json!({"title": "old"})),
            after: Some(json!({"title": "new"})),
            actor: "user-1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn approx_size_is_positive_for_nonempty_event() {
        let event = Event {
            id: "x".into(),
            ts: 0,
            op: Op::Create,
            target: Target::Entity {
                id: EntityId::new("posts", "x"),
            },
            before: None,
            after: Some(json!({"a": 1})),
            actor: "a".into(),
        };
        assert!(event.approx_size_bytes() > 0);
    }
}
