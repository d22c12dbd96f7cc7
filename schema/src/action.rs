//! Delta/Iceberg-style commit log actions (spec §6 "Action schemas").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A Parquet data file added to the live table state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAction {
    /// Path relative to the table root.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Last-modified time, milliseconds since the epoch.
    pub modification_time: i64,
    /// Whether this file represents a logical data change (`false` ⇒ compaction output).
    pub data_change: bool,
    /// Partition column values, if the table is partitioned.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partition_values: BTreeMap<String, String>,
    /// Serialized (JSON) min/max/null-count statistics, one entry per column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    /// Arbitrary string tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

/// A Parquet data file removed from the live table state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveAction {
    /// Path relative to the table root.
    pub path: String,
    /// When the removal was recorded, milliseconds since the epoch.
    pub deletion_timestamp: i64,
    /// Whether this removal represents a logical data change (`false` ⇒ compaction).
    pub data_change: bool,
    /// Whether extended metadata (size, stats) accompanies this removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_file_metadata: Option<bool>,
}

/// Replaces the table's schema/partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDataAction {
    /// Stable table id.
    pub id: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Serialized (JSON) Arrow schema.
    pub schema_string: String,
    /// Partition column names.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    /// Freeform table configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<BTreeMap<String, String>>,
    /// Creation time, milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
    /// Table format identifier (e.g. `"parquet"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Declares the minimum reader/writer protocol version required to interact with the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolAction {
    /// Minimum reader protocol version, at least 1.
    pub min_reader_version: u32,
    /// Minimum writer protocol version, at least 1.
    pub min_writer_version: u32,
    /// Optional named reader features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_features: Option<Vec<String>>,
    /// Optional named writer features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_features: Option<Vec<String>>,
}

impl Default for ProtocolAction {
    fn default() -> Self {
        Self {
            min_reader_version: 1,
            min_writer_version: 1,
            reader_features: None,
            writer_features: None,
        }
    }
}

/// Free-form commit metadata, recorded for audit/debugging but not replayed into table state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfoAction {
    /// Commit time, milliseconds since the epoch.
    pub timestamp: i64,
    /// Operation name, e.g. `"WRITE"`, `"CHECKPOINT"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Freeform operation parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operation_parameters: BTreeMap<String, String>,
}

/// Idempotency marker for application-level transactions (rarely used by this crate directly,
/// but part of the Delta action vocabulary, spec §3 "Action").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxnAction {
    /// Application id that owns this transaction marker.
    pub app_id: String,
    /// Application-assigned version.
    pub version: i64,
    /// Last-updated time, milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

/// One line of a commit log file (spec §3 "Commit", §6 "Delta log file layout").
///
/// Serializes externally-tagged, one key per variant (`{"add": {...}}`), matching the on-disk
/// Delta protocol exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// See [`AddAction`].
    #[serde(rename = "add")]
    Add(AddAction),
    /// See [`RemoveAction`].
    #[serde(rename = "remove")]
    Remove(RemoveAction),
    /// See [`MetaDataAction`].
    #[serde(rename = "metaData")]
    MetaData(MetaDataAction),
    /// See [`ProtocolAction`].
    #[serde(rename = "protocol")]
    Protocol(ProtocolAction),
    /// See [`CommitInfoAction`].
    #[serde(rename = "commitInfo")]
    CommitInfo(CommitInfoAction),
    /// See [`TxnAction`].
    #[serde(rename = "txn")]
    Txn(TxnAction),
}

impl Action {
    /// The checkpoint column name this action occupies (spec §4.C, §6): exactly one of
    /// `txn | add | remove | metaData | protocol | commitInfo` is non-null per checkpoint row.
    pub fn column_name(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::MetaData(_) => "metaData",
            Self::Protocol(_) => "protocol",
            Self::CommitInfo(_) => "commitInfo",
            Self::Txn(_) => "txn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_action_serializes_externally_tagged() {
        let action = Action::Add(AddAction {
            path: "part-0.parquet".into(),
            size: 128,
            modification_time: 1_700_000_000_000,
            data_change: true,
            partition_values: BTreeMap::new(),
            stats: None,
            tags: None,
        });
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.starts_with(r#"{"add":"#), "got {json}");
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back);
    }

    #[test]
    fn protocol_default_has_version_one() {
        let p = ProtocolAction::default();
        assert_eq!(p.min_reader_version, 1);
        assert_eq!(p.min_writer_version, 1);
    }

    #[test]
    fn column_name_matches_variant() {
        assert_eq!(Action::Protocol(ProtocolAction::default()).column_name(), "protocol");
    }
}
