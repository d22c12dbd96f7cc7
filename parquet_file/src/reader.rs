//! Decodes Parquet data files back into `EntityRecord`/`Relationship` rows (spec §4.B "Read path").

use arrow::array::{Array, StringArray, TimestampMillisecondArray, UInt64Array};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use schema::entity::{EntityId, EntityRecord, Relationship};
use snafu::{OptionExt, ResultExt};

use crate::error::{DecodeSnafu, InvalidPayloadSnafu, MissingColumnSnafu, ParquetFileError};

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn string_col<'a>(
    batch: &'a arrow::record_batch::RecordBatch,
    name: &'static str,
) -> Result<&'a StringArray, ParquetFileError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .context(MissingColumnSnafu { column: name })
}

fn ts_col<'a>(
    batch: &'a arrow::record_batch::RecordBatch,
    name: &'static str,
) -> Result<&'a TimestampMillisecondArray, ParquetFileError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
        .context(MissingColumnSnafu { column: name })
}

fn u64_col<'a>(
    batch: &'a arrow::record_batch::RecordBatch,
    name: &'static str,
) -> Result<&'a UInt64Array, ParquetFileError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        .context(MissingColumnSnafu { column: name })
}

/// Decodes every row of a Parquet file written by [`crate::write_entities`].
pub fn read_entities(bytes: Bytes) -> Result<Vec<EntityRecord>, ParquetFileError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .context(DecodeSnafu)?
        .build()
        .context(DecodeSnafu)?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.context(DecodeSnafu)?;
        let namespace = string_col(&batch, "namespace")?;
        let local_id = string_col(&batch, "local_id")?;
        let type_ = string_col(&batch, "type_")?;
        let name = string_col(&batch, "name")?;
        let created_at = ts_col(&batch, "created_at")?;
        let created_by = string_col(&batch, "created_by")?;
        let updated_at = ts_col(&batch, "updated_at")?;
        let updated_by = string_col(&batch, "updated_by")?;
        let version = u64_col(&batch, "version")?;
        let deleted_at = ts_col(&batch, "deleted_at")?;
        let deleted_by = string_col(&batch, "deleted_by")?;
        let payload = string_col(&batch, "payload")?;

        for row in 0..batch.num_rows() {
            let payload_value = serde_json::from_str(payload.value(row))
                .context(InvalidPayloadSnafu { row })?;
            out.push(EntityRecord {
                id: EntityId::new(namespace.value(row), local_id.value(row)),
                type_: type_.value(row).to_string(),
                name: name.value(row).to_string(),
                created_at: millis_to_utc(created_at.value(row)),
                created_by: created_by.value(row).to_string(),
                updated_at: millis_to_utc(updated_at.value(row)),
                updated_by: updated_by.value(row).to_string(),
                version: version.value(row),
                deleted_at: (!deleted_at.is_null(row)).then(|| millis_to_utc(deleted_at.value(row))),
                deleted_by: (!deleted_by.is_null(row)).then(|| deleted_by.value(row).to_string()),
                payload: payload_value,
            });
        }
    }
    Ok(out)
}

/// Decodes every row of a Parquet file written by [`crate::write_relationships`].
pub fn read_relationships(bytes: Bytes) -> Result<Vec<Relationship>, ParquetFileError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .context(DecodeSnafu)?
        .build()
        .context(DecodeSnafu)?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.context(DecodeSnafu)?;
        let from_ns = string_col(&batch, "from_ns")?;
        let from_id = string_col(&batch, "from_id")?;
        let predicate = string_col(&batch, "predicate")?;
        let to_ns = string_col(&batch, "to_ns")?;
        let to_id = string_col(&batch, "to_id")?;
        let version = u64_col(&batch, "version")?;
        let created_at = ts_col(&batch, "created_at")?;
        let created_by = string_col(&batch, "created_by")?;
        let updated_at = ts_col(&batch, "updated_at")?;
        let updated_by = string_col(&batch, "updated_by")?;
        let payload = string_col(&batch, "payload")?;

        for row in 0..batch.num_rows() {
            let payload_value = if payload.is_null(row) {
                None
            } else {
                Some(
                    serde_json::from_str(payload.value(row))
                        .context(InvalidPayloadSnafu { row })?,
                )
            };
            out.push(Relationship {
                from_ns: from_ns.value(row).to_string(),
                from_id: from_id.value(row).to_string(),
                predicate: predicate.value(row).to_string(),
                to_ns: to_ns.value(row).to_string(),
                to_id: to_id.value(row).to_string(),
                version: version.value(row),
                created_at: millis_to_utc(created_at.value(row)),
                created_by: created_by.value(row).to_string(),
                updated_at: millis_to_utc(updated_at.value(row)),
                updated_by: updated_by.value(row).to_string(),
                payload: payload_value,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::write_entities;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn round_trips_through_parquet_bytes() {
        let now = Utc::now();
        let entities = vec![EntityRecord {
            id: EntityId::new("posts", "a"),
            type_: "post".into(),
            name: "hello".into(),
            created_at: now,
            created_by: "user-1".into(),
            updated_at: now,
            updated_by: "user-1".into(),
            version: 1,
            deleted_at: None,
            deleted_by: None,
            payload: json!({"title": "hello"}),
        }];
        let encoded = write_entities(&entities).unwrap();
        let decoded = read_entities(encoded.bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, entities[0].id);
        assert_eq!(decoded[0].payload, entities[0].payload);
        assert_eq!(decoded[0].created_at.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn round_trips_soft_deleted_row() {
        let now = Utc::now();
        let entities = vec![EntityRecord {
            id: EntityId::new("posts", "a"),
            type_: "post".into(),
            name: "hello".into(),
            created_at: now,
            created_by: "user-1".into(),
            updated_at: now,
            updated_by: "user-1".into(),
            version: 2,
            deleted_at: Some(now),
            deleted_by: Some("user-2".into()),
            payload: json!({}),
        }];
        let encoded = write_entities(&entities).unwrap();
        let decoded = read_entities(encoded.bytes).unwrap();
        assert!(decoded[0].is_deleted());
        assert_eq!(decoded[0].deleted_by.as_deref(), Some("user-2"));
    }
}
