//! Round planning: delta discovery and memory-bounded input sizing.

use thiserror::Error;

use crate::{
    constants::IN_MEMORY_INFLATION_MULTIPLIER,
    model::{
        list::all_list_results, Delta, DeltaManifest, PartitionLocator, RoundCompletionInfo,
        StreamPosition,
    },
    observability::{log_info, log_warn},
    storage::{DeltaStorage, ListDeltasRequest},
    store::StoreError,
};

/// Errors raised while planning a round. All of them abort the round before
/// any task is scheduled.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The partition has no deltas in the round's window.
    #[error(
        "no deltas found for partition {partition} between stream positions {start:?} \
         (exclusive) and {end:?} (inclusive)"
    )]
    NotFound {
        /// Partition that was listed.
        partition: String,
        /// Exclusive lower bound of the window.
        start: Option<StreamPosition>,
        /// Inclusive upper bound of the window.
        end: Option<StreamPosition>,
    },
    /// Not even the first delta fits in the per-task memory budget.
    #[error("no input deltas fit in the per-task object store budget of {budget} bytes")]
    EmptyInput {
        /// Per-task object store budget in bytes.
        budget: u64,
    },
    /// The requested hash bucket count differs from the partition's.
    #[error(
        "requested hash bucket count {requested} does not match the existing compacted hash \
         bucket count {existing}; omit the count or rehash the compacted partition"
    )]
    HashBucketCountMismatch {
        /// Count requested for this round.
        requested: u32,
        /// Count fixed by a prior round.
        existing: u32,
    },
    /// A hash bucket count of zero was requested.
    #[error("requested hash bucket count must be at least 1")]
    ZeroHashBuckets,
    /// Cluster resources cannot host a task.
    #[error("invalid cluster resources: {0}")]
    InvalidResources(String),
    /// The delta catalog failed.
    #[error("delta storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Resources of the fixed-size cluster running the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterResources {
    /// Worker CPUs; one task runs per CPU.
    pub cpus: u32,
    /// Total object store memory in bytes.
    pub object_store_memory: u64,
    /// Total task heap memory in bytes.
    pub memory: u64,
}

impl ClusterResources {
    /// Describe a cluster.
    pub fn new(cpus: u32, object_store_memory: u64, memory: u64) -> Self {
        Self {
            cpus,
            object_store_memory,
            memory,
        }
    }

    fn validate(&self) -> Result<(), PlanError> {
        if self.cpus == 0 {
            return Err(PlanError::InvalidResources("cluster has no CPUs".into()));
        }
        if self.object_store_memory == 0 || self.memory == 0 {
            return Err(PlanError::InvalidResources(
                "cluster has no object store or task memory".into(),
            ));
        }
        Ok(())
    }

    /// Object store memory available to one task.
    pub fn object_store_memory_per_task(&self) -> u64 {
        self.object_store_memory / u64::from(self.cpus.max(1))
    }

    /// Task memory available to one task.
    pub fn memory_per_task(&self) -> u64 {
        self.memory / u64::from(self.cpus.max(1))
    }
}

/// Deltas selected for a round and the round's sizing.
#[derive(Debug, Clone)]
pub struct LimitedDeltas {
    /// Selected deltas grouped so each group's content stays within
    /// `chunk_size` bytes; groups are in stream order.
    pub batches: Vec<Vec<DeltaManifest>>,
    /// Hash bucket count of the round.
    pub hash_bucket_count: u32,
    /// Maximum delta content bytes hash bucketed together.
    pub chunk_size: u64,
    /// Highest stream position among the selected deltas.
    pub latest_stream_position: StreamPosition,
    /// Inflated in-memory estimate of the selected deltas.
    pub inflated_bytes: u64,
}

impl LimitedDeltas {
    /// Number of selected deltas.
    pub fn delta_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

fn inflate(bytes: u64) -> u64 {
    (bytes as f64 * IN_MEMORY_INFLATION_MULTIPLIER).ceil() as u64
}

/// List the deltas of `partition` after the prior round's high watermark up
/// to `latest_stream_position`, in ascending stream order.
///
/// Drains every page of the listing. An empty result is
/// [`PlanError::NotFound`]: a round needs at least one delta.
pub async fn discover_deltas(
    storage: &dyn DeltaStorage,
    partition: &PartitionLocator,
    prior_round_completion: Option<&RoundCompletionInfo>,
    latest_stream_position: Option<StreamPosition>,
) -> Result<Vec<Delta>, PlanError> {
    let start = prior_round_completion.map(|info| info.high_watermark);
    let request = ListDeltasRequest::new(partition.clone(), start, latest_stream_position);
    let mut deltas = all_list_results(|cursor| storage.list_deltas(&request, cursor)).await?;
    deltas.retain(|delta| request.contains(delta.stream_position()));
    deltas.sort_by_key(Delta::stream_position);
    if deltas.is_empty() {
        return Err(PlanError::NotFound {
            partition: partition.to_string(),
            start,
            end: latest_stream_position,
        });
    }
    log_info!(
        component = "planner",
        event = "deltas_discovered",
        partition = %partition,
        count = deltas.len(),
        start = ?start,
        end = ?latest_stream_position,
    );
    Ok(deltas)
}

/// Fetch the manifest of every delta, preserving order.
pub async fn fetch_delta_manifests(
    storage: &dyn DeltaStorage,
    deltas: &[Delta],
) -> Result<Vec<DeltaManifest>, PlanError> {
    let mut manifests = Vec::with_capacity(deltas.len());
    for delta in deltas {
        manifests.push(storage.get_delta_manifest(&delta.locator).await?);
    }
    Ok(manifests)
}

/// Select the deltas that fit in one round and size the round.
///
/// Deltas are taken in stream order while their cumulative inflated size stays
/// within the per-task object store budget; the rest wait for a later round.
/// The hash bucket count is the partition's established count, else the
/// requested count, else the minimum recommended for the selected bytes. The
/// chunk size is the requested one, clamped to the per-task memory budget.
pub fn limit_input_deltas(
    mut deltas: Vec<DeltaManifest>,
    resources: &ClusterResources,
    requested_hash_buckets: Option<u32>,
    requested_chunk_size: Option<u64>,
    prior_round_completion: Option<&RoundCompletionInfo>,
) -> Result<LimitedDeltas, PlanError> {
    resources.validate()?;
    if requested_hash_buckets == Some(0) {
        return Err(PlanError::ZeroHashBuckets);
    }
    let object_store_budget = resources.object_store_memory_per_task();
    let memory_budget = resources.memory_per_task();

    let existing = prior_round_completion
        .map(|info| info.hash_buckets)
        .filter(|count| *count > 0);
    if let (Some(existing), Some(requested)) = (existing, requested_hash_buckets) {
        if existing != requested {
            return Err(PlanError::HashBucketCountMismatch {
                requested,
                existing,
            });
        }
    }

    deltas.sort_by_key(|delta| delta.delta.stream_position());
    let mut selected = Vec::new();
    let mut inflated_bytes = 0u64;
    for delta in deltas {
        let next = inflated_bytes.saturating_add(inflate(delta.content_length()));
        if next > object_store_budget {
            log_info!(
                component = "planner",
                event = "input_deltas_truncated",
                selected = selected.len(),
                inflated_bytes = next,
                budget = object_store_budget,
            );
            break;
        }
        inflated_bytes = next;
        selected.push(delta);
    }
    let Some(latest_stream_position) = selected.last().map(|d| d.delta.stream_position()) else {
        return Err(PlanError::EmptyInput {
            budget: object_store_budget,
        });
    };

    let min_hash_buckets = inflated_bytes
        .div_ceil(object_store_budget.max(1))
        .clamp(1, u64::from(u32::MAX)) as u32;
    let hash_bucket_count = match existing.or(requested_hash_buckets) {
        Some(count) => {
            if count < min_hash_buckets {
                log_warn!(
                    component = "planner",
                    event = "hash_bucket_count_below_minimum",
                    hash_bucket_count = count,
                    min_recommended = min_hash_buckets,
                );
            }
            count
        }
        None => min_hash_buckets,
    };

    let max_chunk_size = (memory_budget as f64 / IN_MEMORY_INFLATION_MULTIPLIER).ceil() as u64;
    let chunk_size = match requested_chunk_size {
        Some(requested) if requested > max_chunk_size => {
            log_warn!(
                component = "planner",
                event = "chunk_size_above_maximum",
                requested,
                max_recommended = max_chunk_size,
            );
            max_chunk_size
        }
        Some(requested) => requested.max(1),
        None => max_chunk_size.max(1),
    };

    let batches = size_limited_groups(selected, chunk_size);
    let limited = LimitedDeltas {
        batches,
        hash_bucket_count,
        chunk_size,
        latest_stream_position,
        inflated_bytes,
    };
    log_info!(
        component = "planner",
        event = "input_deltas_limited",
        deltas = limited.delta_count(),
        batches = limited.batches.len(),
        inflated_bytes,
        hash_bucket_count,
        chunk_size,
        latest_stream_position,
    );
    Ok(limited)
}

/// Group deltas in order so each group's content length stays within
/// `chunk_size`. A delta larger than the chunk size forms its own group.
pub fn size_limited_groups(deltas: Vec<DeltaManifest>, chunk_size: u64) -> Vec<Vec<DeltaManifest>> {
    let mut groups: Vec<Vec<DeltaManifest>> = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0u64;
    for delta in deltas {
        let bytes = delta.content_length();
        if !current.is_empty() && current_bytes.saturating_add(bytes) > chunk_size {
            groups.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(bytes);
        current.push(delta);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
