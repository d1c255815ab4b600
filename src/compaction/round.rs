//! Round driver: planning, hash bucketing, dedupe tasks and the round record.

use std::sync::Arc;

use tokio::task::JoinSet;

use super::{
    barrier::RecordCountBarrier,
    error::CompactionError,
    handles::{InMemoryObjectRefStore, ObjectRefStore},
    hash_bucket::group_by_hash_bucket,
    metrics::DedupeStats,
    planner::{discover_deltas, fetch_delta_manifests, limit_input_deltas, ClusterResources},
    task::{DedupeOutput, DedupeTask, DedupeTaskContext, HashBucketInput},
    writer::{read_round_completion, write_round_completion},
};
use crate::{
    model::{
        DeltaFileEnvelope, DeltaManifest, PartitionLocator, RoundCompletionInfo, StreamPosition,
    },
    observability::{log_error, log_info},
    option::CompactionOptions,
    storage::DeltaStorage,
    store::ObjectStore,
    table::{io::TableIo, ArrowTableCodec, TableCodec},
};

/// Inputs of one compaction round.
#[derive(Debug, Clone)]
pub struct RoundRequest {
    /// Partition whose change stream is compacted.
    pub source_partition: PartitionLocator,
    /// Partition the primary-key index is written for.
    pub compacted_partition: PartitionLocator,
    /// Root URL for index files, manifests and round records.
    pub artifact_url: String,
    /// Last stream position the round may fold in; `None` for no bound.
    pub latest_stream_position: Option<StreamPosition>,
    /// Cluster the round is sized for.
    pub resources: ClusterResources,
}

/// Outcome of a completed round.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    /// Last stream position folded into the index.
    pub high_watermark: StreamPosition,
    /// Hash bucket count the index is sharded by.
    pub hash_bucket_count: u32,
    /// Deltas compacted by the round.
    pub deltas_compacted: usize,
    /// Per-task outputs in task order.
    pub outputs: Vec<DedupeOutput>,
    /// Totals over every task.
    pub stats: DedupeStats,
}

/// Runs compaction rounds against one object store and delta catalog.
pub struct CompactionRound {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn TableCodec>,
    deltas: Arc<dyn DeltaStorage>,
    object_refs: Arc<dyn ObjectRefStore>,
    options: Arc<CompactionOptions>,
}

impl CompactionRound {
    /// Driver with the Arrow codec and an in-process record handle store.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        deltas: Arc<dyn DeltaStorage>,
        options: CompactionOptions,
    ) -> Self {
        Self {
            store,
            codec: Arc::new(ArrowTableCodec::new()),
            deltas,
            object_refs: Arc::new(InMemoryObjectRefStore::new()),
            options: Arc::new(options),
        }
    }

    /// Replace the table codec.
    pub fn with_codec(self, codec: Arc<dyn TableCodec>) -> Self {
        Self { codec, ..self }
    }

    /// Replace the store receiving surviving record sets.
    pub fn with_object_ref_store(self, object_refs: Arc<dyn ObjectRefStore>) -> Self {
        Self {
            object_refs,
            ..self
        }
    }

    /// Configuration shared by every round.
    pub fn options(&self) -> &CompactionOptions {
        &self.options
    }

    /// Run one round to completion.
    ///
    /// Planning failures abort before any task starts. The first failing
    /// dedupe task aborts its peers and is reported with its task index. The
    /// round record is written only after every task has published its index.
    pub async fn run(&self, request: RoundRequest) -> Result<RoundSummary, CompactionError> {
        let options = self.options.as_ref();
        log_info!(
            component = "round",
            event = "round_started",
            source_partition = %request.source_partition,
            compacted_partition = %request.compacted_partition,
            latest_stream_position = ?request.latest_stream_position,
        );

        let prior = read_round_completion(
            self.store.as_ref(),
            &options.retry,
            &request.artifact_url,
            &request.source_partition,
        )
        .await?;
        let deltas = discover_deltas(
            self.deltas.as_ref(),
            &request.source_partition,
            prior.as_ref(),
            request.latest_stream_position,
        )
        .await?;
        let manifests = fetch_delta_manifests(self.deltas.as_ref(), &deltas).await?;
        let limited = limit_input_deltas(
            manifests,
            &request.resources,
            options.hash_bucket_count,
            options.hash_bucket_chunk_size,
            prior.as_ref(),
        )?;
        let hash_bucket_count = limited.hash_bucket_count;
        let deltas_compacted = limited.delta_count();

        let mut bucketed = self
            .hash_bucket_batches(limited.batches, hash_bucket_count)
            .await?;
        let task_count = options.task_count(hash_bucket_count);
        let mut tasks: Vec<DedupeTask> = (0..task_count)
            .map(|task_index| DedupeTask {
                task_index,
                hash_buckets: Vec::new(),
            })
            .collect();
        for hash_bucket in 0..hash_bucket_count {
            let input = HashBucketInput {
                hash_bucket,
                deltas: std::mem::take(&mut bucketed[hash_bucket as usize]),
            };
            tasks[hash_bucket as usize % task_count].hash_buckets.push(input);
        }

        let ctx = Arc::new(DedupeTaskContext {
            store: self.store.clone(),
            codec: self.codec.clone(),
            object_refs: self.object_refs.clone(),
            barrier: RecordCountBarrier::spawn(task_count),
            options: self.options.clone(),
            artifact_url: request.artifact_url.clone(),
            compacted_partition: request.compacted_partition.clone(),
            prior_high_watermark: prior.map(|info| info.high_watermark),
        });
        let mut outputs = run_dedupe_tasks(tasks, ctx).await?;
        outputs.sort_by_key(|output| output.task_index);
        let stats: DedupeStats = outputs.iter().map(|output| output.stats).sum();

        let completion = RoundCompletionInfo::new(limited.latest_stream_position, hash_bucket_count);
        write_round_completion(
            self.store.as_ref(),
            &options.retry,
            &request.artifact_url,
            &request.source_partition,
            &completion,
        )
        .await?;
        log_info!(
            component = "round",
            event = "round_finished",
            high_watermark = completion.high_watermark,
            hash_bucket_count,
            deltas_compacted,
            tasks = outputs.len(),
            input_rows = stats.input_rows,
            output_rows = stats.output_rows,
            index_files = stats.index_files,
        );
        Ok(RoundSummary {
            high_watermark: completion.high_watermark,
            hash_bucket_count,
            deltas_compacted,
            outputs,
            stats,
        })
    }

    /// Download every delta file and split it by hash bucket, one concurrent
    /// job per size-limited batch.
    async fn hash_bucket_batches(
        &self,
        batches: Vec<Vec<DeltaManifest>>,
        hash_bucket_count: u32,
    ) -> Result<Vec<Vec<DeltaFileEnvelope>>, CompactionError> {
        let mut jobs = JoinSet::new();
        for batch in batches {
            let store = self.store.clone();
            let codec = self.codec.clone();
            let options = self.options.clone();
            jobs.spawn(async move {
                hash_bucket_batch(store, codec, options, batch, hash_bucket_count).await
            });
        }
        let mut bucketed: Vec<Vec<DeltaFileEnvelope>> =
            vec![Vec::new(); hash_bucket_count as usize];
        while let Some(joined) = jobs.join_next().await {
            let batch = match joined {
                Ok(Ok(batch)) => batch,
                Ok(Err(err)) => {
                    jobs.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    jobs.abort_all();
                    return Err(CompactionError::Join(err.to_string()));
                }
            };
            for (slot, envelopes) in bucketed.iter_mut().zip(batch) {
                slot.extend(envelopes);
            }
        }
        Ok(bucketed)
    }
}

async fn hash_bucket_batch(
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn TableCodec>,
    options: Arc<CompactionOptions>,
    batch: Vec<DeltaManifest>,
    hash_bucket_count: u32,
) -> Result<Vec<Vec<DeltaFileEnvelope>>, CompactionError> {
    let io = TableIo::new(store.as_ref(), codec.as_ref(), &options.retry);
    let sort_keys = options.sort_key_names();
    let mut bucketed: Vec<Vec<DeltaFileEnvelope>> = vec![Vec::new(); hash_bucket_count as usize];
    for delta in &batch {
        for file in delta.file_refs() {
            let table = io
                .read_table(
                    &file.entry.url,
                    file.entry.meta.content_type,
                    file.entry.meta.content_encoding,
                )
                .await?;
            let envelope = DeltaFileEnvelope {
                stream_position: file.stream_position,
                file_index: file.file_index,
                delta_type: file.delta_type,
                table,
            };
            let groups = group_by_hash_bucket(
                &envelope,
                options.primary_keys(),
                &sort_keys,
                hash_bucket_count,
            )?;
            for (slot, group) in bucketed.iter_mut().zip(groups) {
                slot.extend(group);
            }
        }
    }
    Ok(bucketed)
}

async fn run_dedupe_tasks(
    tasks: Vec<DedupeTask>,
    ctx: Arc<DedupeTaskContext>,
) -> Result<Vec<DedupeOutput>, CompactionError> {
    let mut running = JoinSet::new();
    for task in tasks {
        let ctx = ctx.clone();
        let task_index = task.task_index;
        running.spawn(async move { (task_index, task.run(ctx).await) });
    }
    let mut outputs = Vec::with_capacity(running.len());
    while let Some(joined) = running.join_next().await {
        match joined {
            Ok((_, Ok(output))) => outputs.push(output),
            Ok((task_index, Err(err))) => {
                running.abort_all();
                log_error!(
                    component = "round",
                    event = "dedupe_task_failed",
                    task_index,
                    error = %err,
                );
                return Err(err.in_task(task_index));
            }
            Err(err) => {
                running.abort_all();
                log_error!(
                    component = "round",
                    event = "dedupe_task_failed",
                    error = %err,
                );
                return Err(CompactionError::Join(err.to_string()));
            }
        }
    }
    Ok(outputs)
}
