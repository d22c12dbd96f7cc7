//! Core data model: entities, relationships, events, and the Delta/Iceberg-style commit actions
//! (spec §3), plus the Arrow schema builders the Parquet codec writes against (spec §4.B).
//!
//! Generalizes the teacher's `schema::SchemaBuilder` (one typed Arrow column per Influx field)
//! from a fixed set of line-protocol field types to this crate's entity/action columns.
#![warn(missing_docs)]

pub mod action;
pub mod arrow_schema;
pub mod entity;
pub mod event;

pub use action::{Action, AddAction, CommitInfoAction, MetaDataAction, ProtocolAction, RemoveAction, TxnAction};
pub use entity::{EntityId, EntityRecord, Relationship};
pub use event::{Event, Op, Target};

use dberror::{DbError, ErrorCode};
use snafu::Snafu;

/// Errors raised while building or validating the data model, convertible into [`DbError`] at
/// the crate boundary (spec §7).
#[derive(Debug, Snafu)]
pub enum SchemaError {
    /// An entity id string did not match `<namespace>/<localId>`.
    #[snafu(display("invalid entity id {id:?}: {reason}"))]
    InvalidEntityId {
        /// The offending id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A required field on an entity or relationship was missing or invalid.
    #[snafu(display("invalid {field}: {reason}"))]
    InvalidField {
        /// The offending field name.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<SchemaError> for DbError {
    fn from(e: SchemaError) -> Self {
        match &e {
            SchemaError::InvalidEntityId { id, .. } => {
                DbError::new(ErrorCode::InvalidInput, e.to_string()).with_context("entityId", id)
            }
            SchemaError::InvalidField { field, .. } => {
                DbError::new(ErrorCode::InvalidType, e.to_string()).with_context("field", field)
            }
        }
    }
}
