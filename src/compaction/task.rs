//! One dedupe task: union, dedupe, rendezvous, placement and index writes for
//! a group of hash buckets.

use std::{collections::BTreeMap, sync::Arc};

use arrow::record_batch::RecordBatch;

use super::{
    barrier::{RecordCountBarrier, RecordCounts},
    dedupe::{dedupe, surviving_records, SurvivingRecords},
    error::CompactionError,
    handles::{ObjectRef, ObjectRefStore},
    metrics::DedupeStats,
    placement::{apply_placement, Placement},
    router::{bucket_for, MaterializeBucket},
    union::union,
    writer::{pk_index_url_base, read_pk_index_manifest, write_pk_index},
};
use crate::{
    model::{DeltaFileEnvelope, PartitionLocator, StreamPosition},
    observability::{log_debug, log_info},
    option::CompactionOptions,
    store::ObjectStore,
    table::{io::TableIo, TableCodec},
};

/// New delta rows of one hash bucket.
#[derive(Debug, Clone)]
pub struct HashBucketInput {
    /// Hash bucket index.
    pub hash_bucket: u32,
    /// Hash-bucketed delta files, in any order.
    pub deltas: Vec<DeltaFileEnvelope>,
}

impl HashBucketInput {
    /// Bucket with no new rows; its prior index is still rewritten.
    pub fn empty(hash_bucket: u32) -> Self {
        Self {
            hash_bucket,
            deltas: Vec::new(),
        }
    }
}

/// State shared by every dedupe task of a round.
pub struct DedupeTaskContext {
    /// Object store holding index files and manifests.
    pub store: Arc<dyn ObjectStore>,
    /// Codec for index files.
    pub codec: Arc<dyn TableCodec>,
    /// Destination of surviving record sets.
    pub object_refs: Arc<dyn ObjectRefStore>,
    /// Round-wide record count barrier.
    pub barrier: RecordCountBarrier,
    /// Round configuration.
    pub options: Arc<CompactionOptions>,
    /// Root URL of compaction artifacts.
    pub artifact_url: String,
    /// Partition the index belongs to.
    pub compacted_partition: PartitionLocator,
    /// Position covered by the prior index, if a prior round completed.
    pub prior_high_watermark: Option<StreamPosition>,
}

/// Result of a finished dedupe task.
#[derive(Debug, Clone)]
pub struct DedupeOutput {
    /// Index of the task.
    pub task_index: usize,
    /// Totals over the task's hash buckets.
    pub stats: DedupeStats,
    /// Surviving record set of every materialize bucket the task contributed
    /// to, tagged with the contributing task.
    pub materialize_refs: BTreeMap<MaterializeBucket, (usize, ObjectRef)>,
}

/// Dedupe work assigned to one task.
#[derive(Debug, Clone)]
pub struct DedupeTask {
    /// Index of the task within the round.
    pub task_index: usize,
    /// Hash buckets the task owns.
    pub hash_buckets: Vec<HashBucketInput>,
}

struct DedupedBucket {
    hash_bucket: u32,
    input_rows: u64,
    table: RecordBatch,
}

impl DedupeTask {
    /// Run the task to completion.
    ///
    /// The task reports its surviving row counts to the barrier even when it
    /// has no rows, so its peers are never left waiting on it.
    pub async fn run(self, ctx: Arc<DedupeTaskContext>) -> Result<DedupeOutput, CompactionError> {
        let options = ctx.options.as_ref();
        let io = TableIo::new(ctx.store.as_ref(), ctx.codec.as_ref(), &options.retry);
        let num_buckets = options.num_materialize_buckets;

        let mut inputs = self.hash_buckets;
        inputs.sort_by_key(|input| input.hash_bucket);
        let mut deduped = Vec::with_capacity(inputs.len());
        for input in inputs {
            let hash_bucket = input.hash_bucket;
            if let Some(bucket) = dedupe_hash_bucket(&ctx, &io, input)
                .await
                .map_err(|err| err.in_hash_bucket(hash_bucket))?
            {
                deduped.push(bucket);
            }
        }

        let mut survivors: BTreeMap<MaterializeBucket, SurvivingRecords> = BTreeMap::new();
        for bucket in &deduped {
            for (source, records) in surviving_records(&bucket.table)? {
                survivors
                    .entry(bucket_for(&source, num_buckets))
                    .or_default()
                    .entry(source)
                    .or_default()
                    .extend(records);
            }
        }
        let counts: RecordCounts = survivors
            .iter()
            .map(|(bucket, files)| {
                let files = files
                    .iter()
                    .map(|(source, records)| (*source, records.len() as u64))
                    .collect();
                (*bucket, files)
            })
            .collect();

        let mut materialize_refs = BTreeMap::new();
        for (bucket, records) in survivors {
            let handle = ctx.object_refs.put(records).await?;
            materialize_refs.insert(bucket, (self.task_index, handle));
        }

        ctx.barrier
            .add_record_counts(self.task_index, counts)
            .await?;
        ctx.barrier.wait_finalized(options.barrier_timeout).await?;
        let table = ctx.barrier.record_counts().await?;
        let placement = Placement::compute(&table, options.max_rows_per_materialized_file);
        log_debug!(
            component = "task",
            event = "placement_computed",
            task_index = self.task_index,
            output_files = placement.file_count(),
        );

        let mut assigner = placement.assigner(self.task_index, num_buckets);
        let mut stats = DedupeStats::default();
        for bucket in deduped {
            let hash_bucket = bucket.hash_bucket;
            let placed = apply_placement(&bucket.table, &mut assigner)
                .map_err(|err| err.in_hash_bucket(hash_bucket))?;
            let base = pk_index_url_base(
                &ctx.artifact_url,
                &ctx.compacted_partition,
                options.pk_index_version,
                hash_bucket,
            );
            let mut written = write_pk_index(
                &io,
                &base,
                &placed,
                options.max_rows_per_index_file,
                options.max_concurrent_uploads,
            )
            .await
            .map_err(|err| err.in_hash_bucket(hash_bucket))?;
            written.input_rows = bucket.input_rows;
            stats += written;
        }

        log_info!(
            component = "task",
            event = "dedupe_task_finished",
            task_index = self.task_index,
            hash_buckets = stats.hash_buckets,
            input_rows = stats.input_rows,
            output_rows = stats.output_rows,
            index_files = stats.index_files,
        );
        Ok(DedupeOutput {
            task_index: self.task_index,
            stats,
            materialize_refs,
        })
    }
}

async fn dedupe_hash_bucket(
    ctx: &DedupeTaskContext,
    io: &TableIo<'_>,
    input: HashBucketInput,
) -> Result<Option<DedupedBucket>, CompactionError> {
    let options = ctx.options.as_ref();
    let hash_bucket = input.hash_bucket;
    let prior_base = pk_index_url_base(
        &ctx.artifact_url,
        &ctx.compacted_partition,
        options.prior_pk_index_version,
        hash_bucket,
    );
    let prior_manifest = read_pk_index_manifest(io.store, io.retry, &prior_base).await?;
    let Some(unioned) = union(
        io,
        hash_bucket,
        prior_manifest.as_ref(),
        ctx.prior_high_watermark,
        input.deltas,
        &options.sort_key_names(),
    )
    .await?
    else {
        return Ok(None);
    };

    let table = dedupe(&unioned, &options.sort_keys)?;
    let input_rows = unioned.num_rows() as u64;
    log_info!(
        component = "dedupe",
        event = "dedupe_round_finished",
        hash_bucket,
        input_rows,
        output_rows = table.num_rows(),
    );
    Ok(Some(DedupedBucket {
        hash_bucket,
        input_rows,
        table,
    }))
}
