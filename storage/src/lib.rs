//! Pluggable key/blob storage (spec §4.A).
//!
//! Everything above this crate — the Parquet codec, the table commit log, the WAL — talks to
//! durable storage only through [`StorageBackend`], the way the teacher's catalog and ingester
//! crates talk to durable storage only through `object_store::ObjectStore`. Three
//! implementations ship here: [`MemoryStore`] for tests and ephemeral databases, [`FsStore`] for
//! a single-process embedded deployment, and [`ObjectStoreBackend`] adapting any real
//! `object_store` implementation (S3, GCS, Azure, ...).
#![warn(missing_docs)]

mod backend;
mod error;
mod fs;
mod memory;
mod object_store_backend;
mod path;
mod retry;

pub use backend::{ListOptions, ListResult, ObjectStat, StorageBackend, WriteOptions, WriteResult};
pub use error::StorageError;
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use object_store_backend::ObjectStoreBackend;
pub use path::validate_path;
pub use retry::MAX_RETRIES;
