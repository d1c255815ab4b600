//! Names, types and accessors of the columns the engine adds to user data.
//!
//! A working table holds, in order: the primary-key digest, the sort key
//! columns, then the provenance columns ([`STREAM_POSITION`], [`FILE_INDEX`],
//! [`RECORD_INDEX`], [`IS_SOURCE`], [`DELTA_TYPE`]). The persisted primary-key
//! index keeps the digest and sort keys, and reuses [`FILE_INDEX`] and
//! [`RECORD_INDEX`] for each row's output placement.

use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, BinaryArray, BooleanArray, Int32Array, Int64Array, UInt8Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};

use super::error::CompactionError;
use crate::{
    model::{DeltaType, StreamPosition},
    table::relaxed_schema,
};

/// SHA-1 digest of the row's primary key values.
pub const PK_HASH: &str = "_pk_hash";
/// Stream position of the delta the row came from.
pub const STREAM_POSITION: &str = "_stream_position";
/// File ordinal within the source delta, or output file in a persisted index.
pub const FILE_INDEX: &str = "_file_index";
/// Row ordinal within the source file, or output row in a persisted index.
pub const RECORD_INDEX: &str = "_record_index";
/// `true` if the row came from the previously compacted index.
pub const IS_SOURCE: &str = "_is_source";
/// [`DeltaType`] of the row, encoded with [`DeltaType::as_u8`].
pub const DELTA_TYPE: &str = "_delta_type";

const PROVENANCE: [&str; 5] = [STREAM_POSITION, FILE_INDEX, RECORD_INDEX, IS_SOURCE, DELTA_TYPE];

/// Arrow type of a system column.
pub fn data_type(name: &str) -> Option<DataType> {
    match name {
        PK_HASH => Some(DataType::Binary),
        STREAM_POSITION | RECORD_INDEX => Some(DataType::Int64),
        FILE_INDEX => Some(DataType::Int32),
        IS_SOURCE => Some(DataType::Boolean),
        DELTA_TYPE => Some(DataType::UInt8),
        _ => None,
    }
}

fn system_field(name: &'static str) -> Field {
    Field::new(name, data_type(name).unwrap_or(DataType::Null), true)
}

fn typed<'a, T: Array + 'static>(
    table: &'a RecordBatch,
    name: &'static str,
) -> Result<&'a T, CompactionError> {
    table
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<T>())
        .ok_or(CompactionError::MissingColumn(name))
}

/// Primary-key digests.
pub fn pk_hashes(table: &RecordBatch) -> Result<&BinaryArray, CompactionError> {
    typed(table, PK_HASH)
}

/// Source stream positions.
pub fn stream_positions(table: &RecordBatch) -> Result<&Int64Array, CompactionError> {
    typed(table, STREAM_POSITION)
}

/// Source file ordinals.
pub fn file_indices(table: &RecordBatch) -> Result<&Int32Array, CompactionError> {
    typed(table, FILE_INDEX)
}

/// Source row ordinals.
pub fn record_indices(table: &RecordBatch) -> Result<&Int64Array, CompactionError> {
    typed(table, RECORD_INDEX)
}

/// Prior-index origin flags.
pub fn is_source(table: &RecordBatch) -> Result<&BooleanArray, CompactionError> {
    typed(table, IS_SOURCE)
}

/// Encoded delta types.
pub fn delta_types(table: &RecordBatch) -> Result<&UInt8Array, CompactionError> {
    typed(table, DELTA_TYPE)
}

/// Provenance shared by every row of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    /// Stream position of the source delta.
    pub stream_position: StreamPosition,
    /// File ordinal within the delta.
    pub file_index: i32,
    /// `true` for rows read back from the prior index.
    pub is_source: bool,
    /// Change kind of the file.
    pub delta_type: DeltaType,
}

/// Append provenance columns to `table`, numbering records from zero.
pub fn append_provenance(
    table: &RecordBatch,
    provenance: Provenance,
) -> Result<RecordBatch, CompactionError> {
    let rows = table.num_rows();
    let record_index: ArrayRef = Arc::new(Int64Array::from_iter_values(0..rows as i64));
    append_columns(
        table,
        vec![
            (
                STREAM_POSITION,
                Arc::new(Int64Array::from(vec![provenance.stream_position; rows])),
            ),
            (
                FILE_INDEX,
                Arc::new(Int32Array::from(vec![provenance.file_index; rows])),
            ),
            (RECORD_INDEX, record_index),
            (
                IS_SOURCE,
                Arc::new(BooleanArray::from(vec![provenance.is_source; rows])),
            ),
            (
                DELTA_TYPE,
                Arc::new(UInt8Array::from(vec![provenance.delta_type.as_u8(); rows])),
            ),
        ],
    )
}

/// Append system columns to `table`, replacing any columns of the same name.
pub fn append_columns(
    table: &RecordBatch,
    columns: Vec<(&'static str, ArrayRef)>,
) -> Result<RecordBatch, CompactionError> {
    let replaced: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let schema = table.schema();
    let mut fields = Vec::with_capacity(schema.fields().len() + columns.len());
    let mut arrays = Vec::with_capacity(fields.capacity());
    for (field, array) in schema.fields().iter().zip(table.columns()) {
        if !replaced.contains(&field.name().as_str()) {
            fields.push(field.as_ref().clone());
            arrays.push(array.clone());
        }
    }
    for (name, array) in columns {
        fields.push(system_field(name));
        arrays.push(array);
    }
    Ok(RecordBatch::try_new(
        relaxed_schema(&Schema::new(fields)),
        arrays,
    )?)
}

/// Keep only the named columns, in the given order.
///
/// Absent system columns fail with [`CompactionError::MissingColumn`]; absent
/// user columns fail with [`CompactionError::MissingKeyColumn`].
pub fn project(table: &RecordBatch, names: &[&str]) -> Result<RecordBatch, CompactionError> {
    let schema = table.schema();
    let indices = names
        .iter()
        .map(|name| {
            schema.index_of(name).map_err(|_| match system_name(name) {
                Some(name) => CompactionError::MissingColumn(name),
                None => CompactionError::MissingKeyColumn(name.to_string()),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(table.project(&indices)?)
}

/// Drop the named columns if present.
pub fn drop_columns(table: &RecordBatch, names: &[&str]) -> Result<RecordBatch, CompactionError> {
    let schema = table.schema();
    let keep: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| !names.contains(&field.name().as_str()))
        .map(|(index, _)| index)
        .collect();
    Ok(table.project(&keep)?)
}

/// Reorder a working table into the canonical column order with a relaxed
/// schema so tables of different origin concatenate.
pub fn working_order(
    table: &RecordBatch,
    sort_keys: &[String],
) -> Result<RecordBatch, CompactionError> {
    let mut names: Vec<&str> = Vec::with_capacity(sort_keys.len() + PROVENANCE.len() + 1);
    names.push(PK_HASH);
    names.extend(sort_keys.iter().map(String::as_str));
    names.extend(PROVENANCE);
    let projected = project(table, &names)?;
    Ok(RecordBatch::try_new(
        relaxed_schema(&projected.schema()),
        projected.columns().to_vec(),
    )?)
}

fn system_name(name: &str) -> Option<&'static str> {
    [PK_HASH, STREAM_POSITION, FILE_INDEX, RECORD_INDEX, IS_SOURCE, DELTA_TYPE]
        .into_iter()
        .find(|candidate| *candidate == name)
}
