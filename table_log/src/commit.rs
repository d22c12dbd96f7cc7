//! The commit loop: optimistic-concurrency append to `_delta_log/{version}.json` (spec §4.C
//! "Commit protocol"). Grounded on delta-rs's `CommitBuilder`/`PreparedCommit`/`FinalizedCommit`
//! flow (try an atomic write, on conflict reload and retry) and the teacher's `backoff` crate for
//! the retry/backoff policy itself.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::{Backoff, BackoffConfig};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use doc_time::TimeProviderRef;
use observability_deps::tracing::{debug, warn};
use schema::action::{Action, CommitInfoAction};
use storage::{ListOptions, StorageBackend, WriteOptions};

use crate::checkpoint;
use crate::error::TableLogError;
use crate::state::TableState;

/// Bound on commit-conflict retries before giving up (matches delta-rs's `DEFAULT_RETRIES`).
pub const MAX_COMMIT_ATTEMPTS: u32 = 15;

/// The outcome of a successful [`TableLog::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The version the commit was assigned.
    pub version: u64,
}

/// A versioned, append-only commit log rooted at `table_root` within a [`StorageBackend`]
/// (spec §4.C).
#[derive(Debug)]
pub struct TableLog {
    storage: Arc<dyn StorageBackend>,
    table_root: String,
    time: TimeProviderRef,
}

fn commit_path(table_root: &str, version: u64) -> String {
    format!("{table_root}/_delta_log/{version:020}.json")
}

fn parse_commit_version(path: &str) -> Option<u64> {
    let name = path.rsplit('/').next()?;
    let digits = name.strip_suffix(".json")?;
    digits.parse().ok()
}

impl TableLog {
    /// Opens (or lazily creates, on first commit) the table rooted at `table_root`.
    pub fn new(storage: Arc<dyn StorageBackend>, table_root: impl Into<String>, time: TimeProviderRef) -> Self {
        Self {
            storage,
            table_root: table_root.into(),
            time,
        }
    }

    /// The table's root path within the storage backend.
    pub fn table_root(&self) -> &str {
        &self.table_root
    }

    /// Replays the commit log (from the latest checkpoint, if any) into a [`TableState`].
    pub async fn load_state(&self) -> Result<TableState, TableLogError> {
        let mut state = checkpoint::read_checkpoint(self.storage.as_ref(), &self.table_root)
            .await?
            .unwrap_or_default();

        let prefix = format!("{}/_delta_log/", self.table_root);
        let listing = self
            .storage
            .list(&prefix, ListOptions::default())
            .await?;

        let mut versions: Vec<(u64, String)> = listing
            .files
            .into_iter()
            .filter_map(|f| parse_commit_version(&f.path).map(|v| (v, f.path)))
            .filter(|(v, _)| *v > state.version)
            .collect();
        versions.sort_by_key(|(v, _)| *v);

        for (version, path) in versions {
            let bytes = self.storage.read(&path).await?;
            for action in parse_actions(&bytes, &path)? {
                state.apply(&action);
            }
            state.version = version;
        }
        Ok(state)
    }

    /// Commits `actions` as a new version, retrying on optimistic-concurrency conflicts with a
    /// view that at most one concurrent committer wins each version number (spec §4.C "exactly
    /// one commit may claim each version").
    pub async fn commit(
        &self,
        actions: Vec<Action>,
        operation: &str,
    ) -> Result<CommitOutcome, TableLogError> {
        let attempts = AtomicU32::new(0);
        let mut backoff = Backoff::new(&BackoffConfig::default());
        backoff
            .retry_with_backoff("table_log_commit", || {
                let actions = actions.clone();
                let operation = operation.to_string();
                let attempt_no = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    match self.try_commit_once(&actions, &operation).await {
                        Ok(outcome) => ControlFlow::Break(Ok(outcome)),
                        Err(conflict @ TableLogError::Storage {
                            source: storage::StorageError::FileExists { .. },
                        }) if attempt_no < MAX_COMMIT_ATTEMPTS => {
                            debug!(attempt_no, "commit lost the race, retrying");
                            ControlFlow::Continue(conflict)
                        }
                        Err(TableLogError::Storage {
                            source: storage::StorageError::FileExists { .. },
                        }) => {
                            warn!(attempt_no, "commit exhausted retries");
                            ControlFlow::Break(Err(TableLogError::Conflict {
                                version: 0,
                                attempts: attempt_no,
                            }))
                        }
                        Err(other) => ControlFlow::Break(Err(other)),
                    }
                }
            })
            .await
            .expect("Backoff's error type is Infallible")
    }

    async fn try_commit_once(
        &self,
        actions: &[Action],
        operation: &str,
    ) -> Result<CommitOutcome, TableLogError> {
        let state = self.load_state().await?;
        let new_version = state.version + 1;

        let commit_info = Action::CommitInfo(CommitInfoAction {
            timestamp: self.time.now_millis(),
            operation: Some(operation.to_string()),
            operation_parameters: BTreeMap::new(),
        });

        let mut lines = Vec::with_capacity(actions.len() + 1);
        for action in actions.iter().chain(std::iter::once(&commit_info)) {
            lines.push(serde_json::to_string(action).expect("actions are always serializable"));
        }
        let bytes = Bytes::from(lines.join("\n"));

        self.storage
            .write_atomic(&commit_path(&self.table_root, new_version), bytes, WriteOptions::default())
            .await?;

        Ok(CommitOutcome { version: new_version })
    }

    /// Writes a fresh checkpoint covering the current live state.
    pub async fn checkpoint(&self) -> Result<checkpoint::LastCheckpoint, TableLogError> {
        let state = self.load_state().await?;
        checkpoint::write_checkpoint(self.storage.as_ref(), &self.table_root, &state).await
    }

    /// Deletes commit files older than `retention` that are superseded by the latest checkpoint
    /// (spec §4.C "GC"). A no-op if no checkpoint has ever been written, since replay needs the
    /// full log back to version 0 in that case.
    pub async fn vacuum(&self, retention: Duration) -> Result<u64, TableLogError> {
        let Some(checkpoint) =
            checkpoint::read_checkpoint(self.storage.as_ref(), &self.table_root).await?
        else {
            return Ok(0);
        };

        let cutoff: DateTime<Utc> = self.time.now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());

        let prefix = format!("{}/_delta_log/", self.table_root);
        let listing = self.storage.list(&prefix, ListOptions::default()).await?;

        let mut removed = 0u64;
        for file in listing.files {
            let Some(version) = parse_commit_version(&file.path) else {
                continue;
            };
            if version < checkpoint.version && file.modified < cutoff {
                self.storage.delete(&file.path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn parse_actions(bytes: &Bytes, path: &str) -> Result<Vec<Action>, TableLogError> {
    std::str::from_utf8(bytes)
        .map_err(|e| TableLogError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| TableLogError::Corrupt {
                path: path.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_time::MockProvider;
    use schema::action::{AddAction, ProtocolAction};
    use storage::MemoryStore;

    fn new_log() -> TableLog {
        TableLog::new(
            Arc::new(MemoryStore::new()),
            "posts".to_string(),
            Arc::new(MockProvider::new(Utc::now())),
        )
    }

    fn add(path: &str) -> Action {
        Action::Add(AddAction {
            path: path.to_string(),
            size: 1,
            modification_time: 0,
            data_change: true,
            partition_values: BTreeMap::new(),
            stats: None,
            tags: None,
        })
    }

    #[tokio::test]
    async fn first_commit_is_version_one() {
        let log = new_log();
        let outcome = log.commit(vec![add("a.parquet")], "WRITE").await.unwrap();
        assert_eq!(outcome.version, 1);
        let state = log.load_state().await.unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.files.len(), 1);
    }

    #[tokio::test]
    async fn commits_increment_version_and_accumulate_files() {
        let log = new_log();
        log.commit(vec![add("a.parquet")], "WRITE").await.unwrap();
        log.commit(vec![add("b.parquet")], "WRITE").await.unwrap();
        let state = log.load_state().await.unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.files.len(), 2);
    }

    #[tokio::test]
    async fn checkpoint_then_reload_matches_live_state() {
        let log = new_log();
        log.commit(
            vec![Action::Protocol(ProtocolAction::default()), add("a.parquet")],
            "WRITE",
        )
        .await
        .unwrap();
        let pointer = log.checkpoint().await.unwrap();
        assert_eq!(pointer.version, 1);

        log.commit(vec![add("b.parquet")], "WRITE").await.unwrap();
        let state = log.load_state().await.unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.files.len(), 2);
    }

    #[tokio::test]
    async fn vacuum_without_checkpoint_is_noop() {
        let log = new_log();
        log.commit(vec![add("a.parquet")], "WRITE").await.unwrap();
        let removed = log.vacuum(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 0);
    }
}
