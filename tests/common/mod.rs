//! Shared fixtures for round integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use arrow::{
    array::{Int64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use delta_compactor::{
    compaction::{
        handles::{InMemoryObjectRefStore, ObjectRefStore},
        planner::ClusterResources,
        router::SourceFileId,
        task::DedupeOutput,
        writer::{pk_index_url_base, read_pk_index_manifest},
    },
    model::{
        ContentEncoding, ContentType, Delta, DeltaLocator, DeltaManifest, DeltaType, Manifest,
        ManifestEntry, ManifestMeta, PartitionLocator,
    },
    storage::InMemoryDeltaStorage,
    store::{InMemoryObjectStore, ObjectStore, RetryPolicy},
    table::{concat_tables, io::TableIo, ArrowTableCodec, TableCodec},
    CompactionOptions, CompactionRound, RoundRequest,
};

pub const ARTIFACT_URL: &str = "mem://compaction-artifacts";

/// In-memory catalog, object store and record handle store for one table.
pub struct Fixture {
    pub store: Arc<InMemoryObjectStore>,
    pub deltas: Arc<InMemoryDeltaStorage>,
    pub object_refs: Arc<InMemoryObjectRefStore>,
    pub source: PartitionLocator,
    pub compacted: PartitionLocator,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryObjectStore::new()),
            deltas: Arc::new(InMemoryDeltaStorage::new().with_page_size(2)),
            object_refs: Arc::new(InMemoryObjectRefStore::new()),
            source: PartitionLocator::new("ns", "orders", 1, vec!["2024".into()], "source"),
            compacted: PartitionLocator::new("ns", "orders", 1, vec!["2024".into()], "compacted"),
        }
    }

    /// Write one Parquet file per element of `files` and commit them as an
    /// upsert delta at `stream_position`.
    pub async fn commit_upserts(&self, stream_position: i64, files: &[&[(i64, &str)]]) {
        let codec = ArrowTableCodec::new();
        let mut entries = Vec::with_capacity(files.len());
        for (file_index, rows) in files.iter().enumerate() {
            let table = orders(rows);
            let bytes = codec.encode(&table, ContentType::Parquet).expect("encode");
            let url = format!("mem://deltas/{stream_position}/{file_index}.parquet");
            let meta = ManifestMeta::new(
                bytes.len() as u64,
                table.num_rows() as u64,
                ContentType::Parquet,
                ContentEncoding::Identity,
            );
            self.store.put(&url, bytes).await.expect("put delta file");
            entries.push(ManifestEntry::new(url, meta));
        }
        self.deltas.commit_delta(DeltaManifest {
            delta: Delta {
                locator: DeltaLocator {
                    partition: self.source.clone(),
                    stream_position,
                },
                delta_type: DeltaType::Upsert,
            },
            manifest: Manifest::of(entries),
        });
    }

    pub fn round(&self, options: CompactionOptions) -> CompactionRound {
        let object_refs: Arc<dyn ObjectRefStore> = self.object_refs.clone();
        CompactionRound::new(self.store.clone(), self.deltas.clone(), options)
            .with_object_ref_store(object_refs)
    }

    pub fn request(&self) -> RoundRequest {
        RoundRequest {
            source_partition: self.source.clone(),
            compacted_partition: self.compacted.clone(),
            artifact_url: ARTIFACT_URL.into(),
            latest_stream_position: None,
            resources: ClusterResources::new(2, 1 << 30, 1 << 30),
        }
    }

    /// Every index row of the compacted partition at `pk_index_version`.
    pub async fn read_index(&self, pk_index_version: u32, hash_buckets: u32) -> Vec<RecordBatch> {
        let codec = ArrowTableCodec::new();
        let retry = RetryPolicy::none();
        let io = TableIo::new(self.store.as_ref(), &codec, &retry);
        let mut tables = Vec::new();
        for hash_bucket in 0..hash_buckets {
            let base = pk_index_url_base(ARTIFACT_URL, &self.compacted, pk_index_version, hash_bucket);
            let Some(manifest) = read_pk_index_manifest(self.store.as_ref(), &retry, &base)
                .await
                .expect("read manifest")
            else {
                continue;
            };
            let files = io.download_manifest_entries(&manifest).await.expect("download");
            tables.extend(concat_tables(&files).expect("concat"));
        }
        tables
    }

    /// Surviving record indices of every task output, merged by source file.
    pub async fn survivors(&self, outputs: &[DedupeOutput]) -> Vec<(SourceFileId, Vec<i64>)> {
        let mut merged = std::collections::BTreeMap::<SourceFileId, Vec<i64>>::new();
        for output in outputs {
            for (_, handle) in output.materialize_refs.values() {
                let records = self.object_refs.get(handle).await.expect("records");
                for (source, indices) in records.iter() {
                    merged.entry(*source).or_default().extend(indices);
                }
            }
        }
        merged
            .into_iter()
            .map(|(source, mut indices)| {
                indices.sort_unstable();
                (source, indices)
            })
            .collect()
    }
}

pub fn orders(rows: &[(i64, &str)]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("status", DataType::Utf8, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|row| row.0))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|row| row.1))),
        ],
    )
    .expect("orders batch")
}
