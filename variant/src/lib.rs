//! Variant shredding: promoting "hot" JSON payload fields to a typed sub-column stored alongside
//! the raw value, so the query planner can push predicates into Parquet column statistics
//! instead of deserializing JSON per row (spec §4.G).
//!
//! The teacher's `schema` crate picks a typed Arrow column per InfluxDB field; the analogous
//! choice here is a typed projection per *shredded* JSON field, since payloads are schemaless.

#![warn(missing_docs)]

mod config;
mod path;
mod shred;

pub use config::{ShreddingConfig, VariantShredder};
pub use path::{navigate, rewrite_filter_path, shredded_path};
pub use shred::{ShreddedValue, TypedScalar};
