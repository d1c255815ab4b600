//! Primary-key hashing and the split of delta files into hash buckets.

use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, BinaryBuilder, UInt32Array},
    compute::take_record_batch,
    error::ArrowError,
    record_batch::RecordBatch,
    util::display::{ArrayFormatter, FormatOptions},
};
use sha1::{Digest, Sha1};

use super::{
    error::CompactionError,
    router::digest_mod,
    system_columns::{self, Provenance, PK_HASH},
};
use crate::model::DeltaFileEnvelope;

/// SHA-1 digest of each row's primary key.
///
/// The digest input is the display form of every primary key value joined by
/// `|`, so equal keys hash equally regardless of the file format they were
/// read from. `\` and `|` inside a value are escaped with a backslash and a
/// null value is written as `\N`, so distinct keys never share an input.
pub fn pk_digests(table: &RecordBatch, primary_keys: &[String]) -> Result<ArrayRef, CompactionError> {
    if primary_keys.is_empty() {
        return Err(CompactionError::Invariant(
            "no primary key columns configured".into(),
        ));
    }
    let columns = primary_keys
        .iter()
        .map(|name| {
            table
                .column_by_name(name)
                .ok_or_else(|| CompactionError::MissingKeyColumn(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let options = FormatOptions::default();
    let formatters = columns
        .iter()
        .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
        .collect::<Result<Vec<_>, ArrowError>>()?;

    let rows = table.num_rows();
    let mut builder = BinaryBuilder::with_capacity(rows, rows * 20);
    let mut key = String::new();
    let mut value = String::new();
    for row in 0..rows {
        key.clear();
        for (position, (column, formatter)) in columns.iter().zip(&formatters).enumerate() {
            if position > 0 {
                key.push('|');
            }
            if column.is_null(row) {
                key.push_str(NULL_MARKER);
                continue;
            }
            value.clear();
            formatter.value(row).write(&mut value)?;
            push_escaped(&mut key, &value);
        }
        builder.append_value(Sha1::digest(key.as_bytes()));
    }
    Ok(Arc::new(builder.finish()))
}

/// Stands in for a null key value; escaping keeps it out of reach of values.
const NULL_MARKER: &str = "\\N";

fn push_escaped(key: &mut String, value: &str) {
    for ch in value.chars() {
        if matches!(ch, '\\' | '|') {
            key.push('\\');
        }
        key.push(ch);
    }
}

/// Split one delta file into per-hash-bucket envelopes.
///
/// Each output table holds the primary-key digest, the sort key columns and
/// the provenance columns; record indices refer to row positions in the
/// original file. The result has one slot per hash bucket, `None` where the
/// file has no rows for that bucket.
pub fn group_by_hash_bucket(
    envelope: &DeltaFileEnvelope,
    primary_keys: &[String],
    sort_keys: &[String],
    hash_bucket_count: u32,
) -> Result<Vec<Option<DeltaFileEnvelope>>, CompactionError> {
    if hash_bucket_count == 0 {
        return Err(CompactionError::Invariant(
            "hash bucket count must be at least 1".into(),
        ));
    }
    let digests = pk_digests(&envelope.table, primary_keys)?;
    let mut names: Vec<&str> = Vec::with_capacity(sort_keys.len());
    names.extend(sort_keys.iter().map(String::as_str));
    let keyed = system_columns::append_columns(
        &system_columns::project(&envelope.table, &names)?,
        vec![(PK_HASH, digests)],
    )?;
    let working = system_columns::working_order(
        &system_columns::append_provenance(
            &keyed,
            Provenance {
                stream_position: envelope.stream_position,
                file_index: envelope.file_index,
                is_source: false,
                delta_type: envelope.delta_type,
            },
        )?,
        sort_keys,
    )?;

    let hashes = system_columns::pk_hashes(&working)?;
    let mut indices: Vec<Vec<u32>> = vec![Vec::new(); hash_bucket_count as usize];
    for row in 0..hashes.len() {
        let bucket = digest_mod(hashes.value(row), hash_bucket_count) as usize;
        if let Some(rows) = indices.get_mut(bucket) {
            rows.push(row as u32);
        }
    }

    indices
        .into_iter()
        .map(|rows| {
            if rows.is_empty() {
                return Ok(None);
            }
            let table = take_record_batch(&working, &UInt32Array::from(rows))?;
            Ok(Some(DeltaFileEnvelope {
                stream_position: envelope.stream_position,
                file_index: envelope.file_index,
                delta_type: envelope.delta_type,
                table,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use sha1::{Digest, Sha1};

    use super::{group_by_hash_bucket, pk_digests};
    use crate::{
        compaction::{
            error::CompactionError,
            router::digest_mod,
            system_columns::{self, PK_HASH},
        },
        model::{DeltaFileEnvelope, DeltaType},
    };

    fn orders() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("region", DataType::Utf8, false),
            Field::new("ts", DataType::Int64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5, 6])),
                Arc::new(StringArray::from(vec!["eu", "us", "eu", "us", "eu", "us"])),
                Arc::new(Int64Array::from(vec![10, 20, 30, 40, 50, 60])),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn digest_joins_key_values_with_pipes() {
        let digests = pk_digests(&orders(), &["id".into(), "region".into()]).expect("digests");
        let digests = digests
            .as_any()
            .downcast_ref::<arrow::array::BinaryArray>()
            .expect("binary");
        assert_eq!(digests.value(0), Sha1::digest(b"1|eu").as_slice());
        assert!(matches!(
            pk_digests(&orders(), &["missing".into()]),
            Err(CompactionError::MissingKeyColumn(name)) if name == "missing"
        ));
    }

    #[test]
    fn separators_and_nulls_in_values_do_not_collide() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Utf8, true),
            Field::new("b", DataType::Utf8, true),
        ]));
        let table = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![
                    Some("x|y"),
                    Some("x"),
                    None,
                    Some(""),
                    Some("\\N"),
                ])),
                Arc::new(StringArray::from(vec![
                    Some("z"),
                    Some("y|z"),
                    Some("k"),
                    Some("k"),
                    Some("k"),
                ])),
            ],
        )
        .expect("batch");
        let keys = ["a".to_string(), "b".to_string()];
        let digests = pk_digests(&table, &keys).expect("digests");
        let digests = digests
            .as_any()
            .downcast_ref::<arrow::array::BinaryArray>()
            .expect("binary");
        assert_ne!(digests.value(0), digests.value(1));
        assert_ne!(digests.value(2), digests.value(3));
        assert_ne!(digests.value(2), digests.value(4));
        assert_eq!(digests.value(0), Sha1::digest(b"x\\|y|z").as_slice());
        assert_eq!(digests.value(2), Sha1::digest(b"\\N|k").as_slice());
    }

    #[test]
    fn zero_hash_buckets_is_rejected() {
        let envelope = DeltaFileEnvelope {
            stream_position: 1,
            file_index: 0,
            delta_type: DeltaType::Upsert,
            table: orders(),
        };
        assert!(matches!(
            group_by_hash_bucket(&envelope, &["id".into()], &[], 0),
            Err(CompactionError::Invariant(_))
        ));
    }

    #[test]
    fn every_row_lands_in_its_digest_bucket_once() {
        let envelope = DeltaFileEnvelope {
            stream_position: 4,
            file_index: 1,
            delta_type: DeltaType::Upsert,
            table: orders(),
        };
        let buckets =
            group_by_hash_bucket(&envelope, &["id".into()], &["ts".into()], 3).expect("group");
        assert_eq!(buckets.len(), 3);

        let mut seen = Vec::new();
        for (bucket, envelope) in buckets.iter().enumerate() {
            let Some(envelope) = envelope else { continue };
            let table = &envelope.table;
            assert!(table.column_by_name("region").is_none());
            assert_eq!(table.schema().field(0).name(), PK_HASH);
            let hashes = system_columns::pk_hashes(table).expect("hashes");
            let records = system_columns::record_indices(table).expect("records");
            let positions = system_columns::stream_positions(table).expect("positions");
            for row in 0..table.num_rows() {
                assert_eq!(digest_mod(hashes.value(row), 3) as usize, bucket);
                assert_eq!(positions.value(row), 4);
                seen.push(records.value(row));
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }
}
