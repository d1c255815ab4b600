//! Last-writer-wins deduplication by primary-key digest.

use std::collections::{hash_map::Entry, BTreeMap, HashMap};

use arrow::{
    array::{Array, UInt32Array},
    compute::{lexsort_to_indices, take_record_batch, SortColumn, SortOptions},
    record_batch::RecordBatch,
};

use super::{
    error::CompactionError,
    router::SourceFileId,
    system_columns::{self, DELTA_TYPE, FILE_INDEX, RECORD_INDEX, STREAM_POSITION},
};
use crate::option::{SortKey, SortOrder};

/// Surviving source record indices, keyed by the file they came from.
pub type SurvivingRecords = BTreeMap<SourceFileId, Vec<i64>>;

/// Order a working table by the sort keys, then by stream position, file
/// index and record index ascending.
///
/// Later positions sort after earlier ones, so the last row per key in this
/// order is the most recent write among equal sort key values.
pub fn sort_for_dedupe(
    table: &RecordBatch,
    sort_keys: &[SortKey],
) -> Result<RecordBatch, CompactionError> {
    let ascending = SortOptions {
        descending: false,
        nulls_first: true,
    };
    let mut columns = Vec::with_capacity(sort_keys.len() + 3);
    for key in sort_keys {
        let values = table
            .column_by_name(&key.key_name)
            .ok_or_else(|| CompactionError::MissingKeyColumn(key.key_name.clone()))?;
        columns.push(SortColumn {
            values: values.clone(),
            options: Some(SortOptions {
                descending: key.order == SortOrder::Descending,
                nulls_first: true,
            }),
        });
    }
    for name in [STREAM_POSITION, FILE_INDEX, RECORD_INDEX] {
        let values = table
            .column_by_name(name)
            .ok_or(CompactionError::MissingColumn(name))?;
        columns.push(SortColumn {
            values: values.clone(),
            options: Some(ascending),
        });
    }
    let indices = lexsort_to_indices(&columns, None)?;
    Ok(take_record_batch(table, &indices)?)
}

/// Keep the last row of every primary-key digest.
///
/// Surviving rows are emitted in the order their key first appeared.
pub fn drop_duplicates_by_pk_hash(table: &RecordBatch) -> Result<RecordBatch, CompactionError> {
    let hashes = system_columns::pk_hashes(table)?;
    let mut slots: HashMap<&[u8], usize> = HashMap::with_capacity(hashes.len());
    let mut keep: Vec<u32> = Vec::with_capacity(hashes.len());
    for row in 0..hashes.len() {
        match slots.entry(hashes.value(row)) {
            Entry::Occupied(slot) => keep[*slot.get()] = row as u32,
            Entry::Vacant(slot) => {
                slot.insert(keep.len());
                keep.push(row as u32);
            }
        }
    }
    if keep.len() == table.num_rows() {
        return Ok(table.clone());
    }
    Ok(take_record_batch(table, &UInt32Array::from(keep))?)
}

/// Resolve a unioned working table to one row per primary key.
///
/// With sort keys the table is ordered first; otherwise union order, which is
/// already stream order, decides. The delta type column is dropped afterwards;
/// deletes resolve like upserts.
pub fn dedupe(table: &RecordBatch, sort_keys: &[SortKey]) -> Result<RecordBatch, CompactionError> {
    let sorted = if sort_keys.is_empty() {
        table.clone()
    } else {
        sort_for_dedupe(table, sort_keys)?
    };
    let deduped = drop_duplicates_by_pk_hash(&sorted)?;
    system_columns::drop_columns(&deduped, &[DELTA_TYPE])
}

/// Record indices of every surviving row, grouped by source file, in row order.
pub fn surviving_records(table: &RecordBatch) -> Result<SurvivingRecords, CompactionError> {
    let mut records = SurvivingRecords::new();
    for_each_source_row(table, |source, record_index| {
        records.entry(source).or_default().push(record_index);
    })?;
    Ok(records)
}

/// Visit every row's source file id and record index in row order.
pub(crate) fn for_each_source_row(
    table: &RecordBatch,
    mut visit: impl FnMut(SourceFileId, i64),
) -> Result<(), CompactionError> {
    let is_source = system_columns::is_source(table)?;
    let positions = system_columns::stream_positions(table)?;
    let files = system_columns::file_indices(table)?;
    let records = system_columns::record_indices(table)?;
    for row in 0..table.num_rows() {
        visit(
            SourceFileId::new(is_source.value(row), positions.value(row), files.value(row)),
            records.value(row),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{BinaryArray, BooleanArray, Int32Array, Int64Array, UInt8Array},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };

    use super::{dedupe, surviving_records};
    use crate::{
        compaction::{router::SourceFileId, system_columns::*},
        option::{SortKey, SortOrder},
    };

    /// Rows of `(pk, ts, stream_position, record_index)` from file 0.
    fn working(rows: &[(&str, i64, i64, i64)]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new(PK_HASH, DataType::Binary, true),
            Field::new("ts", DataType::Int64, true),
            Field::new(STREAM_POSITION, DataType::Int64, true),
            Field::new(FILE_INDEX, DataType::Int32, true),
            Field::new(RECORD_INDEX, DataType::Int64, true),
            Field::new(IS_SOURCE, DataType::Boolean, true),
            Field::new(DELTA_TYPE, DataType::UInt8, true),
        ]));
        let n = rows.len();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(BinaryArray::from_iter_values(rows.iter().map(|r| r.0))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.2))),
                Arc::new(Int32Array::from(vec![0; n])),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.3))),
                Arc::new(BooleanArray::from(vec![false; n])),
                Arc::new(UInt8Array::from(vec![0; n])),
            ],
        )
        .expect("batch")
    }

    fn column_i64(table: &RecordBatch, name: &str) -> Vec<i64> {
        table
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .expect("int64 column")
            .values()
            .to_vec()
    }

    #[test]
    fn last_writer_wins_without_sort_keys() {
        let table = working(&[("1", 100, 5, 0), ("2", 200, 5, 1), ("1", 900, 9, 0)]);
        let deduped = dedupe(&table, &[]).expect("dedupe");
        assert_eq!(deduped.num_rows(), 2);
        assert_eq!(column_i64(&deduped, "ts"), vec![900, 200]);
        assert_eq!(column_i64(&deduped, STREAM_POSITION), vec![9, 5]);
        assert!(deduped.column_by_name(DELTA_TYPE).is_none());
    }

    #[test]
    fn unique_table_is_unchanged() {
        let table = working(&[("1", 1, 2, 0), ("2", 2, 2, 1), ("3", 3, 2, 2)]);
        let deduped = dedupe(&table, &[]).expect("dedupe");
        assert_eq!(deduped, drop_columns(&table, &[DELTA_TYPE]).expect("drop"));
    }

    #[test]
    fn sort_keys_decide_before_stream_position() {
        // The newer write carries a smaller sort key, so the older one sorts last.
        let table = working(&[("1", 50, 5, 0), ("1", 10, 9, 0)]);
        let deduped = dedupe(&table, &[SortKey::of("ts")]).expect("dedupe");
        assert_eq!(column_i64(&deduped, STREAM_POSITION), vec![5]);

        let deduped = dedupe(&table, &[SortKey::with_order("ts", SortOrder::Descending)])
            .expect("dedupe");
        assert_eq!(column_i64(&deduped, STREAM_POSITION), vec![9]);
    }

    #[test]
    fn equal_sort_keys_fall_back_to_stream_order() {
        let table = working(&[("1", 7, 9, 0), ("1", 7, 5, 0)]);
        let deduped = dedupe(&table, &[SortKey::of("ts")]).expect("dedupe");
        assert_eq!(column_i64(&deduped, STREAM_POSITION), vec![9]);
    }

    #[test]
    fn survivors_are_grouped_by_source_file() {
        let table = working(&[("1", 0, 5, 0), ("2", 0, 9, 3), ("3", 0, 5, 4)]);
        let records = surviving_records(&dedupe(&table, &[]).expect("dedupe")).expect("records");
        assert_eq!(records[&SourceFileId::new(false, 5, 0)], vec![0, 4]);
        assert_eq!(records[&SourceFileId::new(false, 9, 0)], vec![3]);
    }
}
