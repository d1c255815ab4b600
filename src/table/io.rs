use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use futures_util::{stream, StreamExt, TryStreamExt};
use thiserror::Error;

use super::{slice_table, CodecError, TableCodec};
use crate::{
    id::FileIdGenerator,
    model::{ContentEncoding, ContentType, Manifest, ManifestEntry, ManifestMeta},
    store::{with_retry, ObjectStore, RetryPolicy, StoreError},
};

/// Errors raised while moving tables between memory and the object store.
#[derive(Debug, Error)]
pub enum TableIoError {
    /// Object store transfer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Table encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Shared handles needed to read and write tables.
#[derive(Clone, Copy)]
pub struct TableIo<'a> {
    /// Object store holding the files.
    pub store: &'a dyn ObjectStore,
    /// Codec used to encode and decode files.
    pub codec: &'a dyn TableCodec,
    /// Retry policy applied to every transfer.
    pub retry: &'a RetryPolicy,
}

impl<'a> TableIo<'a> {
    /// Bundle the handles.
    pub fn new(
        store: &'a dyn ObjectStore,
        codec: &'a dyn TableCodec,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            store,
            codec,
            retry,
        }
    }

    /// Download and decode one file.
    pub async fn read_table(
        &self,
        url: &str,
        content_type: ContentType,
        content_encoding: ContentEncoding,
    ) -> Result<RecordBatch, TableIoError> {
        let bytes = with_retry(self.retry, "table_download", || self.store.get(url)).await?;
        Ok(self.codec.decode(bytes, content_type, content_encoding)?)
    }

    /// Download every file listed by `manifest`, in manifest order.
    pub async fn download_manifest_entries(
        &self,
        manifest: &Manifest,
    ) -> Result<Vec<RecordBatch>, TableIoError> {
        let mut tables = Vec::with_capacity(manifest.entries.len());
        for entry in &manifest.entries {
            tables.push(
                self.read_table(
                    &entry.url,
                    entry.meta.content_type,
                    entry.meta.content_encoding,
                )
                .await?,
            );
        }
        Ok(tables)
    }

    /// Encode and upload one table to `url`, returning its manifest entry.
    pub async fn upload_table(
        &self,
        table: &RecordBatch,
        url: String,
        content_type: ContentType,
    ) -> Result<ManifestEntry, TableIoError> {
        let bytes: Bytes = self.codec.encode(table, content_type)?;
        let content_length = bytes.len() as u64;
        with_retry(self.retry, "table_upload", || {
            self.store.put(&url, bytes.clone())
        })
        .await?;
        Ok(ManifestEntry::new(
            url,
            ManifestMeta::new(
                content_length,
                table.num_rows() as u64,
                content_type,
                ContentEncoding::Identity,
            ),
        ))
    }

    /// Upload `table` as files of at most `max_records_per_entry` rows.
    ///
    /// Each file gets a fresh name under `url_prefix`. Up to `max_concurrency`
    /// uploads run at once; entries are returned in table order. An empty
    /// table, or `None` for the row limit, produces a single file.
    pub async fn upload_sliced_table(
        &self,
        table: &RecordBatch,
        url_prefix: &str,
        max_records_per_entry: Option<usize>,
        content_type: ContentType,
        max_concurrency: usize,
    ) -> Result<Vec<ManifestEntry>, TableIoError> {
        let ids = FileIdGenerator::new();
        let slices = match max_records_per_entry {
            Some(max_rows) if table.num_rows() > 0 => slice_table(table, max_rows),
            _ => vec![table.clone()],
        };
        let uploads = slices.into_iter().map(|slice| {
            let url = format!("{url_prefix}/{}", ids.generate());
            async move { self.upload_table(&slice, url, content_type).await }
        });
        stream::iter(uploads)
            .buffered(max_concurrency.max(1))
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::Int64Array,
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };

    use super::TableIo;
    use crate::{
        model::{ContentType, Manifest},
        store::{InMemoryObjectStore, RetryPolicy},
        table::{concat_tables, ArrowTableCodec},
    };

    fn ids(n: i64) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from_iter_values(0..n))])
            .expect("batch")
    }

    #[tokio::test]
    async fn sliced_upload_round_trips_through_manifest() {
        let store = InMemoryObjectStore::new();
        let codec = ArrowTableCodec::new();
        let retry = RetryPolicy::default();
        let io = TableIo::new(&store, &codec, &retry);

        let entries = io
            .upload_sliced_table(&ids(10), "mem://bucket/prefix", Some(4), ContentType::Parquet, 2)
            .await
            .expect("upload");
        let counts: Vec<u64> = entries.iter().map(|e| e.meta.record_count).collect();
        assert_eq!(counts, vec![4, 4, 2]);
        assert!(entries.iter().all(|e| e.url.starts_with("mem://bucket/prefix/")));

        let manifest = Manifest::of(entries);
        assert_eq!(manifest.meta.record_count, 10);
        let tables = io.download_manifest_entries(&manifest).await.expect("download");
        let table = concat_tables(&tables).expect("concat").expect("non-empty");
        let values = table
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64");
        assert_eq!(values.values().to_vec(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn upload_retries_throttled_puts() {
        let store = InMemoryObjectStore::new();
        store.fail_next_puts(2);
        let codec = ArrowTableCodec::new();
        let retry = RetryPolicy::new(
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(2),
            std::time::Duration::from_secs(5),
        );
        let io = TableIo::new(&store, &codec, &retry);
        let entries = io
            .upload_sliced_table(&ids(3), "mem://bucket/p", None, ContentType::Parquet, 1)
            .await
            .expect("upload");
        assert_eq!(entries.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
