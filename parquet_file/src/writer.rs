//! Encodes `EntityRecord`/`Relationship` batches into Parquet files (spec §4.B "Write path").

use std::sync::Arc;

use arrow::array::{StringArray, TimestampMillisecondArray, UInt64Array};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use schema::entity::{EntityRecord, Relationship};
use serde_json::json;
use snafu::ResultExt;

use crate::error::{EncodeSnafu, ParquetFileError};
use crate::stats::FileStatistics;

/// The encoded bytes of a data file plus the statistics its `AddAction` should carry.
#[derive(Debug)]
pub struct EncodedFile {
    /// The Parquet file's bytes, ready to hand to a [`storage::StorageBackend::write_atomic`].
    pub bytes: Bytes,
    /// Number of rows in the file.
    pub row_count: u64,
    /// File-level column statistics.
    pub stats: FileStatistics,
}

/// Encodes `entities` as a Parquet file against [`schema::arrow_schema::entity_schema`].
pub fn write_entities(entities: &[EntityRecord]) -> Result<EncodedFile, ParquetFileError> {
    let arrow_schema = schema::arrow_schema::entity_schema();
    let mut stats = FileStatistics::default();

    let namespace: Vec<&str> = entities.iter().map(|e| e.id.namespace.as_str()).collect();
    let local_id: Vec<&str> = entities.iter().map(|e| e.id.local_id.as_str()).collect();
    let type_: Vec<&str> = entities.iter().map(|e| e.type_.as_str()).collect();
    let name: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    let created_at: Vec<i64> = entities.iter().map(|e| e.created_at.timestamp_millis()).collect();
    let created_by: Vec<&str> = entities.iter().map(|e| e.created_by.as_str()).collect();
    let updated_at: Vec<i64> = entities.iter().map(|e| e.updated_at.timestamp_millis()).collect();
    let updated_by: Vec<&str> = entities.iter().map(|e| e.updated_by.as_str()).collect();
    let version: Vec<u64> = entities.iter().map(|e| e.version).collect();
    let deleted_at: Vec<Option<i64>> = entities
        .iter()
        .map(|e| e.deleted_at.map(|t| t.timestamp_millis()))
        .collect();
    let deleted_by: Vec<Option<&str>> = entities.iter().map(|e| e.deleted_by.as_deref()).collect();
    let payload: Vec<String> = entities
        .iter()
        .map(|e| serde_json::to_string(&e.payload).unwrap_or_default())
        .collect();

    for e in entities {
        stats.observe("namespace", Some(&json!(e.id.namespace)));
        stats.observe("local_id", Some(&json!(e.id.local_id)));
        stats.observe("type_", Some(&json!(e.type_)));
        stats.observe("version", Some(&json!(e.version)));
        stats.observe("created_at", Some(&json!(e.created_at.timestamp_millis())));
        stats.observe("updated_at", Some(&json!(e.updated_at.timestamp_millis())));
        stats.observe(
            "deleted_at",
            e.deleted_at.map(|t| json!(t.timestamp_millis())).as_ref(),
        );
    }

    let batch = RecordBatch::try_new(
        Arc::clone(&arrow_schema),
        vec![
            Arc::new(StringArray::from(namespace)),
            Arc::new(StringArray::from(local_id)),
            Arc::new(StringArray::from(type_)),
            Arc::new(StringArray::from(name)),
            Arc::new(TimestampMillisecondArray::from(created_at)),
            Arc::new(StringArray::from(created_by)),
            Arc::new(TimestampMillisecondArray::from(updated_at)),
            Arc::new(StringArray::from(updated_by)),
            Arc::new(UInt64Array::from(version)),
            Arc::new(TimestampMillisecondArray::from(deleted_at)),
            Arc::new(StringArray::from(deleted_by)),
            Arc::new(StringArray::from(payload)),
        ],
    )
    .context(EncodeSnafu)?;

    let bytes = encode_batch(&arrow_schema, &batch)?;
    Ok(EncodedFile {
        bytes,
        row_count: entities.len() as u64,
        stats,
    })
}

/// Encodes `relationships` as a Parquet file against [`schema::arrow_schema::relationship_schema`].
pub fn write_relationships(relationships: &[Relationship]) -> Result<EncodedFile, ParquetFileError> {
    let arrow_schema = schema::arrow_schema::relationship_schema();
    let mut stats = FileStatistics::default();

    let from_ns: Vec<&str> = relationships.iter().map(|r| r.from_ns.as_str()).collect();
    let from_id: Vec<&str> = relationships.iter().map(|r| r.from_id.as_str()).collect();
    let predicate: Vec<&str> = relationships.iter().map(|r| r.predicate.as_str()).collect();
    let to_ns: Vec<&str> = relationships.iter().map(|r| r.to_ns.as_str()).collect();
    let to_id: Vec<&str> = relationships.iter().map(|r| r.to_id.as_str()).collect();
    let version: Vec<u64> = relationships.iter().map(|r| r.version).collect();
    let created_at: Vec<i64> = relationships
        .iter()
        .map(|r| r.created_at.timestamp_millis())
        .collect();
    let created_by: Vec<&str> = relationships.iter().map(|r| r.created_by.as_str()).collect();
    let updated_at: Vec<i64> = relationships
        .iter()
        .map(|r| r.updated_at.timestamp_millis())
        .collect();
    let updated_by: Vec<&str> = relationships.iter().map(|r| r.updated_by.as_str()).collect();
    let payload: Vec<Option<String>> = relationships
        .iter()
        .map(|r| r.payload.as_ref().map(|v| v.to_string()))
        .collect();

    for r in relationships {
        stats.observe("from_ns", Some(&json!(r.from_ns)));
        stats.observe("predicate", Some(&json!(r.predicate)));
        stats.observe("to_ns", Some(&json!(r.to_ns)));
        stats.observe("version", Some(&json!(r.version)));
    }

    let batch = RecordBatch::try_new(
        Arc::clone(&arrow_schema),
        vec![
            Arc::new(StringArray::from(from_ns)),
            Arc::new(StringArray::from(from_id)),
            Arc::new(StringArray::from(predicate)),
            Arc::new(StringArray::from(to_ns)),
            Arc::new(StringArray::from(to_id)),
            Arc::new(UInt64Array::from(version)),
            Arc::new(TimestampMillisecondArray::from(created_at)),
            Arc::new(StringArray::from(created_by)),
            Arc::new(TimestampMillisecondArray::from(updated_at)),
            Arc::new(StringArray::from(updated_by)),
            Arc::new(StringArray::from(payload)),
        ],
    )
    .context(EncodeSnafu)?;

    let bytes = encode_batch(&arrow_schema, &batch)?;
    Ok(EncodedFile {
        bytes,
        row_count: relationships.len() as u64,
        stats,
    })
}

fn encode_batch(schema: &SchemaRef, batch: &RecordBatch) -> Result<Bytes, ParquetFileError> {
    let mut buf = Vec::new();
    {
        let mut writer =
            ArrowWriter::try_new(&mut buf, Arc::clone(schema), None).context(EncodeSnafu)?;
        writer.write(batch).context(EncodeSnafu)?;
        writer.close().context(EncodeSnafu)?;
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use schema::entity::EntityId;
    use serde_json::json;

    fn sample_entity(ns: &str, id: &str, version: u64) -> EntityRecord {
        let now = Utc::now();
        EntityRecord {
            id: EntityId::new(ns, id),
            type_: "post".into(),
            name: "hello".into(),
            created_at: now,
            created_by: "user-1".into(),
            updated_at: now,
            updated_by: "user-1".into(),
            version,
            deleted_at: None,
            deleted_by: None,
            payload: json!({"title": "hello"}),
        }
    }

    #[test]
    fn encodes_nonempty_batch_and_tracks_stats() {
        let entities = vec![
            sample_entity("posts", "a", 1),
            sample_entity("posts", "b", 2),
        ];
        let encoded = write_entities(&entities).unwrap();
        assert_eq!(encoded.row_count, 2);
        assert!(!encoded.bytes.is_empty());
        assert_eq!(encoded.stats.0["version"].min, Some(json!(1)));
        assert_eq!(encoded.stats.0["version"].max, Some(json!(2)));
    }

    #[test]
    fn encodes_empty_batch() {
        let encoded = write_entities(&[]).unwrap();
        assert_eq!(encoded.row_count, 0);
    }
}
