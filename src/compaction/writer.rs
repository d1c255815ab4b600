//! Persisted layout of the primary-key index and round completion records.
//!
//! Index files of one hash bucket live under
//! `{artifact_url}/{partition digest}/{pk index version}/{hash bucket}/` with
//! fresh ULID names. The bucket's manifest sits beside that directory at
//! `{base}.json` and is written only after every file it lists, so readers
//! never observe a manifest pointing at missing files.

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use super::{error::CompactionError, metrics::DedupeStats};
use crate::{
    model::{ContentType, Manifest, PartitionLocator, RoundCompletionInfo},
    observability::log_info,
    store::{with_retry, ObjectStore, RetryPolicy},
    table::{io::TableIo, table_size},
};

/// Directory-like prefix of one hash bucket's index files.
pub fn pk_index_url_base(
    artifact_url: &str,
    partition: &PartitionLocator,
    pk_index_version: u32,
    hash_bucket: u32,
) -> String {
    format!(
        "{}/{}/{pk_index_version}/{hash_bucket}",
        artifact_url.trim_end_matches('/'),
        partition.hexdigest()
    )
}

/// Manifest location for the index files under `base`.
pub fn pk_index_manifest_url(base: &str) -> String {
    format!("{base}.json")
}

/// Round completion record location of a source partition.
pub fn round_completion_url(artifact_url: &str, source_partition: &PartitionLocator) -> String {
    format!(
        "{}/{}.json",
        artifact_url.trim_end_matches('/'),
        source_partition.hexdigest()
    )
}

async fn read_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    retry: &RetryPolicy,
    url: &str,
) -> Result<Option<T>, CompactionError> {
    let bytes = with_retry(retry, "json_download", || store.get_if_exists(url)).await?;
    bytes
        .map(|bytes| serde_json::from_slice(&bytes).map_err(CompactionError::from))
        .transpose()
}

async fn write_json<T: Serialize>(
    store: &dyn ObjectStore,
    retry: &RetryPolicy,
    url: &str,
    value: &T,
) -> Result<(), CompactionError> {
    let bytes = Bytes::from(serde_json::to_vec(value)?);
    with_retry(retry, "json_upload", || store.put(url, bytes.clone())).await?;
    Ok(())
}

/// Manifest of one hash bucket's index, if it has ever been written.
pub async fn read_pk_index_manifest(
    store: &dyn ObjectStore,
    retry: &RetryPolicy,
    base: &str,
) -> Result<Option<Manifest>, CompactionError> {
    read_json(store, retry, &pk_index_manifest_url(base)).await
}

/// Write one hash bucket's index table under `base`, then its manifest.
pub async fn write_pk_index(
    io: &TableIo<'_>,
    base: &str,
    table: &RecordBatch,
    max_rows_per_index_file: usize,
    max_concurrency: usize,
) -> Result<DedupeStats, CompactionError> {
    let entries = io
        .upload_sliced_table(
            table,
            base,
            Some(max_rows_per_index_file.max(1)),
            ContentType::Parquet,
            max_concurrency,
        )
        .await?;
    let manifest = Manifest::of(entries);
    write_json(io.store, io.retry, &pk_index_manifest_url(base), &manifest).await?;

    let stats = DedupeStats {
        hash_buckets: 1,
        input_rows: 0,
        output_rows: manifest.meta.record_count,
        index_files: manifest.entries.len(),
        index_bytes: manifest.meta.content_length,
        in_memory_bytes: table_size(table),
    };
    log_info!(
        component = "writer",
        event = "pk_index_written",
        base,
        files = stats.index_files,
        rows = stats.output_rows,
        bytes = stats.index_bytes,
    );
    Ok(stats)
}

/// Completion record of the last round over `source_partition`.
pub async fn read_round_completion(
    store: &dyn ObjectStore,
    retry: &RetryPolicy,
    artifact_url: &str,
    source_partition: &PartitionLocator,
) -> Result<Option<RoundCompletionInfo>, CompactionError> {
    read_json(
        store,
        retry,
        &round_completion_url(artifact_url, source_partition),
    )
    .await
}

/// Publish the completion record of a finished round.
pub async fn write_round_completion(
    store: &dyn ObjectStore,
    retry: &RetryPolicy,
    artifact_url: &str,
    source_partition: &PartitionLocator,
    info: &RoundCompletionInfo,
) -> Result<(), CompactionError> {
    write_json(
        store,
        retry,
        &round_completion_url(artifact_url, source_partition),
        info,
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{BinaryArray, Int32Array, Int64Array},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };

    use super::*;
    use crate::{
        compaction::system_columns::{FILE_INDEX, PK_HASH, RECORD_INDEX},
        store::InMemoryObjectStore,
        table::{concat_tables, ArrowTableCodec},
    };

    fn partition() -> PartitionLocator {
        PartitionLocator::new("ns", "orders", 1, vec!["2024".into()], "p0")
    }

    fn index(rows: i64) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new(PK_HASH, DataType::Binary, true),
            Field::new(FILE_INDEX, DataType::Int32, true),
            Field::new(RECORD_INDEX, DataType::Int64, true),
        ]));
        let keys: Vec<Vec<u8>> = (0..rows).map(|i| i.to_be_bytes().to_vec()).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(BinaryArray::from_iter_values(keys.iter())),
                Arc::new(Int32Array::from(vec![0; rows as usize])),
                Arc::new(Int64Array::from_iter_values(0..rows)),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn paths_are_namespaced_by_partition_version_and_bucket() {
        let partition = partition();
        let base = pk_index_url_base("mem://artifacts/", &partition, 3, 7);
        assert_eq!(
            base,
            format!("mem://artifacts/{}/3/7", partition.hexdigest())
        );
        assert_eq!(pk_index_manifest_url(&base), format!("{base}.json"));
        assert_eq!(
            round_completion_url("mem://artifacts", &partition),
            format!("mem://artifacts/{}.json", partition.hexdigest())
        );
    }

    #[tokio::test]
    async fn index_round_trips_through_manifest() {
        let store = InMemoryObjectStore::new();
        let codec = ArrowTableCodec::new();
        let retry = RetryPolicy::none();
        let io = TableIo::new(&store, &codec, &retry);
        let base = pk_index_url_base("mem://artifacts", &partition(), 1, 0);

        assert!(read_pk_index_manifest(&store, &retry, &base)
            .await
            .expect("read")
            .is_none());

        let table = index(7);
        let stats = write_pk_index(&io, &base, &table, 3, 2)
            .await
            .expect("write");
        assert_eq!(stats.index_files, 3);
        assert_eq!(stats.output_rows, 7);

        let manifest = read_pk_index_manifest(&store, &retry, &base)
            .await
            .expect("read")
            .expect("manifest");
        assert_eq!(manifest.meta.record_count, 7);
        assert!(manifest
            .entries
            .iter()
            .all(|entry| entry.url.starts_with(&format!("{base}/"))));
        let tables = io.download_manifest_entries(&manifest).await.expect("download");
        let read = concat_tables(&tables).expect("concat").expect("rows");
        assert_eq!(read.num_rows(), 7);
        assert_eq!(read.column(2).as_ref(), table.column(2).as_ref());
    }

    #[tokio::test]
    async fn round_completion_round_trips() {
        let store = InMemoryObjectStore::new();
        let retry = RetryPolicy::none();
        let partition = partition();
        assert!(read_round_completion(&store, &retry, "mem://a", &partition)
            .await
            .expect("read")
            .is_none());
        let info = RoundCompletionInfo::new(42, 8);
        write_round_completion(&store, &retry, "mem://a", &partition, &info)
            .await
            .expect("write");
        assert_eq!(
            read_round_completion(&store, &retry, "mem://a", &partition)
                .await
                .expect("read"),
            Some(info)
        );
    }
}
