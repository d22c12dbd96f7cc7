//! Checkpoint construction and replay (spec §4.C "Checkpoints", §3 "Checkpoint").
//!
//! A checkpoint is a Parquet file with one row per live action (`protocol`, `metaData`, and one
//! `add` per live data file) against [`schema::arrow_schema::checkpoint_schema`] — exactly the
//! Delta Lake convention the teacher's catalog crate models in SQL form for its own Postgres
//! snapshot tables. A small `_last_checkpoint` JSON pointer records which version it covers so a
//! cold open can skip straight to it instead of replaying the whole log.

use std::sync::Arc;

use arrow::array::StringArray;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use schema::action::{AddAction, MetaDataAction, ProtocolAction};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use storage::{StorageBackend, WriteOptions};

use crate::error::{CheckpointParquetSnafu, CheckpointSnafu, TableLogError};
use crate::state::TableState;

/// The `_last_checkpoint` pointer file's contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastCheckpoint {
    /// The table version this checkpoint covers.
    pub version: u64,
    /// Size, in bytes, of the checkpoint file.
    pub size: u64,
}

fn checkpoint_path(table_root: &str, version: u64) -> String {
    format!("{table_root}/_delta_log/{version:020}.checkpoint.parquet")
}

fn last_checkpoint_path(table_root: &str) -> String {
    format!("{table_root}/_last_checkpoint")
}

/// Writes a checkpoint covering `state` and updates the `_last_checkpoint` pointer.
pub async fn write_checkpoint(
    storage: &dyn StorageBackend,
    table_root: &str,
    state: &TableState,
) -> Result<LastCheckpoint, TableLogError> {
    let arrow_schema = schema::arrow_schema::checkpoint_schema();

    let mut txn_col = Vec::new();
    let mut add_col = Vec::new();
    let mut remove_col: Vec<Option<String>> = Vec::new();
    let mut meta_col = Vec::new();
    let mut protocol_col = Vec::new();
    let mut commit_info_col: Vec<Option<String>> = Vec::new();

    protocol_col.push(Some(serde_json::to_string(&state.protocol).unwrap_or_default()));
    if let Some(meta) = &state.metadata {
        meta_col.push(Some(serde_json::to_string(meta).unwrap_or_default()));
    }
    for add in state.files.values() {
        add_col.push(Some(serde_json::to_string(add).unwrap_or_default()));
    }
    for (app_id, version) in &state.txns {
        txn_col.push(Some(
            serde_json::to_string(&schema::action::TxnAction {
                app_id: app_id.clone(),
                version: *version,
                last_updated: None,
            })
            .unwrap_or_default(),
        ));
    }

    let rows = protocol_col.len() + meta_col.len() + add_col.len() + txn_col.len();
    txn_col.resize(rows, None);
    add_col.resize(rows, None);
    remove_col.resize(rows, None);
    meta_col.resize(rows, None);
    protocol_col.resize(rows, None);
    commit_info_col.resize(rows, None);

    let batch = RecordBatch::try_new(
        Arc::clone(&arrow_schema),
        vec![
            Arc::new(StringArray::from(txn_col)),
            Arc::new(StringArray::from(add_col)),
            Arc::new(StringArray::from(remove_col)),
            Arc::new(StringArray::from(meta_col)),
            Arc::new(StringArray::from(protocol_col)),
            Arc::new(StringArray::from(commit_info_col)),
        ],
    )
    .context(CheckpointSnafu)?;

    let mut buf = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buf, Arc::clone(&arrow_schema), None)
            .context(CheckpointParquetSnafu)?;
        writer.write(&batch).context(CheckpointParquetSnafu)?;
        writer.close().context(CheckpointParquetSnafu)?;
    }
    let bytes = Bytes::from(buf);
    let size = bytes.len() as u64;

    storage
        .write(
            &checkpoint_path(table_root, state.version),
            bytes,
            WriteOptions::default(),
        )
        .await?;

    let pointer = LastCheckpoint { version: state.version, size };
    let pointer_bytes = Bytes::from(serde_json::to_vec(&pointer).unwrap_or_default());
    storage
        .write(&last_checkpoint_path(table_root), pointer_bytes, WriteOptions::default())
        .await?;

    Ok(pointer)
}

/// Reads the `_last_checkpoint` pointer and the checkpoint file it names, if any exist.
pub async fn read_checkpoint(
    storage: &dyn StorageBackend,
    table_root: &str,
) -> Result<Option<TableState>, TableLogError> {
    let pointer_bytes = match storage.read(&last_checkpoint_path(table_root)).await {
        Ok(bytes) => bytes,
        Err(storage::StorageError::FileNotFound { .. }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let pointer: LastCheckpoint =
        serde_json::from_slice(&pointer_bytes).map_err(|e| TableLogError::Corrupt {
            path: last_checkpoint_path(table_root),
            reason: e.to_string(),
        })?;

    let path = checkpoint_path(table_root, pointer.version);
    let bytes = storage.read(&path).await?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .context(CheckpointParquetSnafu)?
        .build()
        .context(CheckpointParquetSnafu)?;

    let mut state = TableState {
        version: pointer.version,
        ..Default::default()
    };
    for batch in reader {
        let batch = batch.context(CheckpointParquetSnafu)?;
        apply_checkpoint_batch(&mut state, &batch, &path)?;
    }
    Ok(Some(state))
}

fn column_str<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
}

fn apply_checkpoint_batch(
    state: &mut TableState,
    batch: &RecordBatch,
    path: &str,
) -> Result<(), TableLogError> {
    let add = column_str(batch, "add");
    let meta = column_str(batch, "metaData");
    let protocol = column_str(batch, "protocol");
    let txn = column_str(batch, "txn");

    let corrupt = |reason: String| TableLogError::Corrupt { path: path.to_string(), reason };

    for row in 0..batch.num_rows() {
        if let Some(col) = add {
            if !col.is_null(row) {
                let action: AddAction = serde_json::from_str(col.value(row))
                    .map_err(|e| corrupt(e.to_string()))?;
                state.files.insert(action.path.clone(), action);
                continue;
            }
        }
        if let Some(col) = meta {
            if !col.is_null(row) {
                let action: MetaDataAction = serde_json::from_str(col.value(row))
                    .map_err(|e| corrupt(e.to_string()))?;
                state.metadata = Some(action);
                continue;
            }
        }
        if let Some(col) = protocol {
            if !col.is_null(row) {
                let action: ProtocolAction = serde_json::from_str(col.value(row))
                    .map_err(|e| corrupt(e.to_string()))?;
                state.protocol = action;
                continue;
            }
        }
        if let Some(col) = txn {
            if !col.is_null(row) {
                let action: schema::action::TxnAction = serde_json::from_str(col.value(row))
                    .map_err(|e| corrupt(e.to_string()))?;
                state.txns.insert(action.app_id, action.version);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::action::AddAction;
    use std::collections::BTreeMap;
    use storage::MemoryStore;

    #[tokio::test]
    async fn round_trips_files_metadata_and_protocol() {
        let store = MemoryStore::new();
        let mut state = TableState {
            version: 5,
            ..Default::default()
        };
        state.files.insert(
            "part-0.parquet".to_string(),
            AddAction {
                path: "part-0.parquet".to_string(),
                size: 128,
                modification_time: 0,
                data_change: true,
                partition_values: BTreeMap::new(),
                stats: None,
                tags: None,
            },
        );
        state.metadata = Some(MetaDataAction {
            id: "tbl-1".to_string(),
            name: None,
            description: None,
            schema_string: "{}".to_string(),
            partition_columns: vec![],
            configuration: None,
            created_time: None,
            format: None,
        });

        let pointer = write_checkpoint(&store, "ns", &state).await.unwrap();
        assert_eq!(pointer.version, 5);

        let restored = read_checkpoint(&store, "ns").await.unwrap().unwrap();
        assert_eq!(restored.version, 5);
        assert_eq!(restored.files.len(), 1);
        assert_eq!(restored.metadata.unwrap().id, "tbl-1");
    }

    #[tokio::test]
    async fn missing_pointer_returns_none() {
        let store = MemoryStore::new();
        assert!(read_checkpoint(&store, "ns").await.unwrap().is_none());
    }
}
