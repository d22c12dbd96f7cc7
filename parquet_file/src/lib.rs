//! Entity/relationship Parquet codec with file-level column statistics (spec §4.B).
//!
//! Encodes the rows of a namespace's data file as columnar Parquet against the Arrow schemas in
//! `schema::arrow_schema`, tracking per-column min/max/null-count as it goes so the resulting
//! [`schema::action::AddAction`] carries enough statistics for the query planner (crate `query`)
//! to prune whole files without reading them (spec §4.F).
#![warn(missing_docs)]

mod error;
mod reader;
mod stats;
mod writer;

pub use error::ParquetFileError;
pub use reader::{read_entities, read_relationships};
pub use stats::{ColumnStats, FileStatistics};
pub use writer::{write_entities, write_relationships, EncodedFile};
