//! Union of the prior primary-key index with a hash bucket's new delta rows.

use std::sync::Arc;

use arrow::{
    array::{BooleanArray, Int64Array, UInt8Array},
    record_batch::RecordBatch,
};

use super::{
    error::CompactionError,
    system_columns::{self, DELTA_TYPE, IS_SOURCE, STREAM_POSITION},
};
use crate::{
    model::{DeltaFileEnvelope, DeltaType, Manifest, StreamPosition},
    observability::{log_debug, log_warn},
    table::{concat_tables, io::TableIo},
};

/// Tag prior index rows as source rows stamped at `prior_high_watermark`.
///
/// The persisted index already carries each row's file and record index.
pub fn tag_prior_index(
    prior: &RecordBatch,
    prior_high_watermark: StreamPosition,
    sort_keys: &[String],
) -> Result<RecordBatch, CompactionError> {
    let rows = prior.num_rows();
    let tagged = system_columns::append_columns(
        prior,
        vec![
            (
                STREAM_POSITION,
                Arc::new(Int64Array::from(vec![prior_high_watermark; rows])),
            ),
            (IS_SOURCE, Arc::new(BooleanArray::from(vec![true; rows]))),
            (
                DELTA_TYPE,
                Arc::new(UInt8Array::from(vec![DeltaType::Upsert.as_u8(); rows])),
            ),
        ],
    )?;
    system_columns::working_order(&tagged, sort_keys)
}

/// Concatenate the tagged prior index with the new delta rows.
///
/// New rows keep their own provenance and are appended in ascending
/// `(stream_position, file_index)` order. No deduplication happens here.
/// Returns `None` when there is nothing to union.
pub fn union_tables(
    prior: Option<RecordBatch>,
    mut new_deltas: Vec<DeltaFileEnvelope>,
    sort_keys: &[String],
) -> Result<Option<RecordBatch>, CompactionError> {
    new_deltas.sort_by_key(DeltaFileEnvelope::order_key);
    let mut tables = Vec::with_capacity(new_deltas.len() + 1);
    tables.extend(prior);
    for envelope in &new_deltas {
        tables.push(system_columns::working_order(&envelope.table, sort_keys)?);
    }
    Ok(concat_tables(&tables)?)
}

/// Load the prior index of one hash bucket and union it with its new rows.
///
/// A prior manifest without a known high watermark is an invariant
/// violation: a persisted index always records the position it covers.
pub async fn union(
    io: &TableIo<'_>,
    hash_bucket: u32,
    prior_manifest: Option<&Manifest>,
    prior_high_watermark: Option<StreamPosition>,
    new_deltas: Vec<DeltaFileEnvelope>,
    sort_keys: &[String],
) -> Result<Option<RecordBatch>, CompactionError> {
    let prior = match prior_manifest {
        Some(manifest) => {
            let Some(high_watermark) = prior_high_watermark else {
                return Err(CompactionError::Invariant(format!(
                    "hash bucket {hash_bucket} has a prior index but no high watermark"
                )));
            };
            let tables = io.download_manifest_entries(manifest).await?;
            match concat_tables(&tables)? {
                Some(table) if table.num_rows() > 0 => {
                    log_debug!(
                        component = "union",
                        event = "prior_index_found",
                        hash_bucket,
                        files = manifest.entries.len(),
                        rows = table.num_rows(),
                        high_watermark,
                    );
                    Some(tag_prior_index(&table, high_watermark, sort_keys)?)
                }
                _ => {
                    log_warn!(
                        component = "union",
                        event = "prior_index_empty",
                        hash_bucket,
                        high_watermark,
                    );
                    None
                }
            }
        }
        None => {
            log_debug!(
                component = "union",
                event = "prior_index_missing",
                hash_bucket,
            );
            None
        }
    };
    union_tables(prior, new_deltas, sort_keys)
}
