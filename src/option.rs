use std::time::Duration;

use crate::{
    constants::{
        DEFAULT_BARRIER_TIMEOUT, DEFAULT_MAX_CONCURRENT_UPLOADS, DEFAULT_MAX_ROWS_PER_INDEX_FILE,
        DEFAULT_MAX_ROWS_PER_MATERIALIZED_FILE, DEFAULT_NUM_MATERIALIZE_BUCKETS,
        DEFAULT_PK_INDEX_VERSION,
    },
    store::RetryPolicy,
};

/// Direction of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest values first.
    #[default]
    Ascending,
    /// Largest values first.
    Descending,
}

/// A column the working table is ordered by before deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Column name.
    pub key_name: String,
    /// Sort direction.
    pub order: SortOrder,
}

impl SortKey {
    /// Ascending sort on `key_name`.
    pub fn of(key_name: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            order: SortOrder::Ascending,
        }
    }

    /// Sort on `key_name` in `order`.
    pub fn with_order(key_name: impl Into<String>, order: SortOrder) -> Self {
        Self {
            key_name: key_name.into(),
            order,
        }
    }
}

/// Configuration of a compaction round.
///
/// Built from the table's primary key columns and refined with consuming
/// setters:
///
/// ```
/// use delta_compactor::CompactionOptions;
///
/// let options = CompactionOptions::new(["id"])
///     .hash_bucket_count(8)
///     .num_materialize_buckets(2);
/// assert_eq!(options.primary_keys(), ["id".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct CompactionOptions {
    pub(crate) primary_keys: Vec<String>,
    pub(crate) sort_keys: Vec<SortKey>,
    pub(crate) hash_bucket_count: Option<u32>,
    pub(crate) hash_bucket_chunk_size: Option<u64>,
    pub(crate) dedupe_task_count: Option<usize>,
    pub(crate) num_materialize_buckets: u32,
    pub(crate) max_rows_per_index_file: usize,
    pub(crate) max_rows_per_materialized_file: u64,
    pub(crate) prior_pk_index_version: u32,
    pub(crate) pk_index_version: u32,
    pub(crate) barrier_timeout: Duration,
    pub(crate) retry: RetryPolicy,
    pub(crate) max_concurrent_uploads: usize,
}

impl CompactionOptions {
    /// Options for a table keyed by `primary_keys`, with every knob at its default.
    pub fn new<I, S>(primary_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CompactionOptions {
            primary_keys: primary_keys.into_iter().map(Into::into).collect(),
            sort_keys: Vec::new(),
            hash_bucket_count: None,
            hash_bucket_chunk_size: None,
            dedupe_task_count: None,
            num_materialize_buckets: DEFAULT_NUM_MATERIALIZE_BUCKETS,
            max_rows_per_index_file: DEFAULT_MAX_ROWS_PER_INDEX_FILE,
            max_rows_per_materialized_file: DEFAULT_MAX_ROWS_PER_MATERIALIZED_FILE,
            prior_pk_index_version: DEFAULT_PK_INDEX_VERSION,
            pk_index_version: DEFAULT_PK_INDEX_VERSION,
            barrier_timeout: DEFAULT_BARRIER_TIMEOUT,
            retry: RetryPolicy::default(),
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
        }
    }

    /// Columns ordering rows before last-writer-wins resolution.
    pub fn sort_keys(self, sort_keys: Vec<SortKey>) -> Self {
        CompactionOptions { sort_keys, ..self }
    }

    /// Requested hash bucket count. Must match the partition's established
    /// count once one exists.
    pub fn hash_bucket_count(self, hash_bucket_count: u32) -> Self {
        CompactionOptions {
            hash_bucket_count: Some(hash_bucket_count),
            ..self
        }
    }

    /// Requested upper bound, in bytes, on delta content grouped per hash
    /// bucketing batch.
    pub fn hash_bucket_chunk_size(self, hash_bucket_chunk_size: u64) -> Self {
        CompactionOptions {
            hash_bucket_chunk_size: Some(hash_bucket_chunk_size),
            ..self
        }
    }

    /// Number of dedupe tasks; defaults to one per hash bucket.
    pub fn dedupe_task_count(self, dedupe_task_count: usize) -> Self {
        CompactionOptions {
            dedupe_task_count: Some(dedupe_task_count),
            ..self
        }
    }

    /// Materialize buckets used to balance output files.
    pub fn num_materialize_buckets(self, num_materialize_buckets: u32) -> Self {
        CompactionOptions {
            num_materialize_buckets,
            ..self
        }
    }

    /// Rows per physical primary-key index file.
    pub fn max_rows_per_index_file(self, max_rows_per_index_file: usize) -> Self {
        CompactionOptions {
            max_rows_per_index_file,
            ..self
        }
    }

    /// Rows per materialized output file; drives output row placement.
    pub fn max_rows_per_materialized_file(self, max_rows_per_materialized_file: u64) -> Self {
        CompactionOptions {
            max_rows_per_materialized_file,
            ..self
        }
    }

    /// Layout version of the index read from the prior round.
    pub fn prior_pk_index_version(self, prior_pk_index_version: u32) -> Self {
        CompactionOptions {
            prior_pk_index_version,
            ..self
        }
    }

    /// Layout version of the index written by this round.
    pub fn pk_index_version(self, pk_index_version: u32) -> Self {
        CompactionOptions {
            pk_index_version,
            ..self
        }
    }

    /// How long a dedupe task waits for its peers at the record count barrier.
    pub fn barrier_timeout(self, barrier_timeout: Duration) -> Self {
        CompactionOptions {
            barrier_timeout,
            ..self
        }
    }

    /// Retry policy for object store transfers.
    pub fn retry(self, retry: RetryPolicy) -> Self {
        CompactionOptions { retry, ..self }
    }

    /// Concurrent file uploads per dedupe task.
    pub fn max_concurrent_uploads(self, max_concurrent_uploads: usize) -> Self {
        CompactionOptions {
            max_concurrent_uploads,
            ..self
        }
    }
}

impl CompactionOptions {
    /// Primary key column names.
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub(crate) fn sort_key_names(&self) -> Vec<String> {
        self.sort_keys.iter().map(|key| key.key_name.clone()).collect()
    }

    pub(crate) fn task_count(&self, hash_bucket_count: u32) -> usize {
        self.dedupe_task_count
            .unwrap_or(hash_bucket_count as usize)
            .clamp(1, hash_bucket_count.max(1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CompactionOptions, SortKey, SortOrder};
    use crate::constants::DEFAULT_NUM_MATERIALIZE_BUCKETS;

    #[test]
    fn builder_overrides_defaults() {
        let options = CompactionOptions::new(["id", "region"])
            .sort_keys(vec![SortKey::with_order("ts", SortOrder::Descending)])
            .hash_bucket_count(4)
            .barrier_timeout(Duration::from_secs(5));
        assert_eq!(options.primary_keys, vec!["id", "region"]);
        assert_eq!(options.hash_bucket_count, Some(4));
        assert_eq!(options.sort_key_names(), vec!["ts"]);
        assert_eq!(options.num_materialize_buckets, DEFAULT_NUM_MATERIALIZE_BUCKETS);
        assert_eq!(options.barrier_timeout, Duration::from_secs(5));
    }

    #[test]
    fn task_count_is_bounded_by_hash_buckets() {
        let options = CompactionOptions::new(["id"]);
        assert_eq!(options.task_count(8), 8);
        assert_eq!(options.clone().dedupe_task_count(3).task_count(8), 3);
        assert_eq!(options.clone().dedupe_task_count(20).task_count(8), 8);
        assert_eq!(options.dedupe_task_count(0).task_count(8), 1);
    }
}
