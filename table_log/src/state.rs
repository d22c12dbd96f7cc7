//! Replayed, in-memory view of a table's live files and metadata (spec §4.C "Table state").

use std::collections::BTreeMap;

use schema::action::{Action, MetaDataAction, ProtocolAction};

/// The materialized result of replaying a commit log from version 0 (or from a checkpoint) up to
/// `version`: which data files are live, and the table's current metadata/protocol.
#[derive(Debug, Clone, Default)]
pub struct TableState {
    /// The version this state reflects (the highest commit applied).
    pub version: u64,
    /// Live data files, keyed by path.
    pub files: BTreeMap<String, schema::action::AddAction>,
    /// Current table metadata, once a `metaData` action has been committed.
    pub metadata: Option<MetaDataAction>,
    /// Current protocol requirement.
    pub protocol: ProtocolAction,
    /// Highest committed version per idempotency-tracked application id.
    pub txns: BTreeMap<String, i64>,
}

impl TableState {
    /// Applies one action from a commit, mutating this state (spec §4.C "Replay rules": `add`
    /// inserts, `remove` deletes by path, `metaData`/`protocol` replace wholesale, `txn` records
    /// the highest version seen per `app_id`).
    pub fn apply(&mut self, action: &Action) {
        match action {
            Action::Add(add) => {
                self.files.insert(add.path.clone(), add.clone());
            }
            Action::Remove(remove) => {
                self.files.remove(&remove.path);
            }
            Action::MetaData(meta) => {
                self.metadata = Some(meta.clone());
            }
            Action::Protocol(protocol) => {
                self.protocol = protocol.clone();
            }
            Action::Txn(txn) => {
                let entry = self.txns.entry(txn.app_id.clone()).or_insert(txn.version);
                if txn.version > *entry {
                    *entry = txn.version;
                }
            }
            Action::CommitInfo(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::action::{AddAction, RemoveAction};
    use std::collections::BTreeMap as Map;

    fn add(path: &str) -> Action {
        Action::Add(AddAction {
            path: path.to_string(),
            size: 10,
            modification_time: 0,
            data_change: true,
            partition_values: Map::new(),
            stats: None,
            tags: None,
        })
    }

    #[test]
    fn add_then_remove_clears_file() {
        let mut state = TableState::default();
        state.apply(&add("a.parquet"));
        assert_eq!(state.files.len(), 1);
        state.apply(&Action::Remove(RemoveAction {
            path: "a.parquet".to_string(),
            deletion_timestamp: 1,
            data_change: true,
            extended_file_metadata: None,
        }));
        assert!(state.files.is_empty());
    }

    #[test]
    fn txn_tracks_max_version_per_app() {
        let mut state = TableState::default();
        state.apply(&Action::Txn(schema::action::TxnAction {
            app_id: "writer-1".into(),
            version: 3,
            last_updated: None,
        }));
        state.apply(&Action::Txn(schema::action::TxnAction {
            app_id: "writer-1".into(),
            version: 2,
            last_updated: None,
        }));
        assert_eq!(state.txns["writer-1"], 3);
    }
}
