//! Arrow `Schema` builders for the Parquet files the codec (crate `parquet_file`) writes.
//!
//! Mirrors the teacher's `schema::builder::SchemaBuilder` (one typed column per logical field),
//! generalized from Influx tags/fields to this crate's entity and checkpoint-action columns.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

/// Column name for the raw JSON payload of an entity row.
pub const PAYLOAD_COLUMN: &str = "payload";

/// Arrow schema for a data file backing an entity collection: typed core columns plus the raw
/// JSON `payload` column. Shredded columns (spec §4.G) are appended by the variant crate when a
/// `ShreddingConfig` is in effect; this is the base schema every collection starts from.
pub fn entity_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("namespace", DataType::Utf8, false),
        Field::new("local_id", DataType::Utf8, false),
        Field::new("type_", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new(
            "created_at",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("created_by", DataType::Utf8, false),
        Field::new(
            "updated_at",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("updated_by", DataType::Utf8, false),
        Field::new("version", DataType::UInt64, false),
        Field::new(
            "deleted_at",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            true,
        ),
        Field::new("deleted_by", DataType::Utf8, true),
        Field::new(PAYLOAD_COLUMN, DataType::Utf8, false),
    ]))
}

/// Arrow schema for a relationship data file.
pub fn relationship_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("from_ns", DataType::Utf8, false),
        Field::new("from_id", DataType::Utf8, false),
        Field::new("predicate", DataType::Utf8, false),
        Field::new("to_ns", DataType::Utf8, false),
        Field::new("to_id", DataType::Utf8, false),
        Field::new("version", DataType::UInt64, false),
        Field::new(
            "created_at",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("created_by", DataType::Utf8, false),
        Field::new(
            "updated_at",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("updated_by", DataType::Utf8, false),
        Field::new(PAYLOAD_COLUMN, DataType::Utf8, true),
    ]))
}

/// Arrow schema for a checkpoint Parquet file (spec §3 "Checkpoint", §6): each row has exactly
/// one of these six columns non-null, the payload JSON-encoded as a string (spec §4.C: "nested
/// structs are represented as JSON strings").
pub fn checkpoint_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("txn", DataType::Utf8, true),
        Field::new("add", DataType::Utf8, true),
        Field::new("remove", DataType::Utf8, true),
        Field::new("metaData", DataType::Utf8, true),
        Field::new("protocol", DataType::Utf8, true),
        Field::new("commitInfo", DataType::Utf8, true),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_schema_has_payload_column() {
        let schema = entity_schema();
        assert!(schema.field_with_name(PAYLOAD_COLUMN).is_ok());
        assert_eq!(schema.fields().len(), 12);
    }

    #[test]
    fn checkpoint_schema_has_six_nullable_columns() {
        let schema = checkpoint_schema();
        assert_eq!(schema.fields().len(), 6);
        assert!(schema.fields().iter().all(|f| f.is_nullable()));
    }
}
