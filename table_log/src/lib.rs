//! Versioned, Delta/Iceberg-style commit log over a [`storage::StorageBackend`] (spec §4.C).
//!
//! Every mutation to a namespace's data files is recorded as a numbered, immutable commit file
//! (`_delta_log/{version}.json`) written with `write_atomic` — exactly one writer can claim each
//! version, the same optimistic-concurrency primitive delta-rs's `CommitBuilder` builds its
//! conflict resolution on top of. Periodic checkpoints collapse the log into a single Parquet
//! snapshot so cold opens don't replay the whole history.
#![warn(missing_docs)]

mod checkpoint;
mod commit;
mod error;
mod state;

pub use checkpoint::LastCheckpoint;
pub use commit::{CommitOutcome, TableLog, MAX_COMMIT_ATTEMPTS};
pub use error::TableLogError;
pub use state::TableState;
