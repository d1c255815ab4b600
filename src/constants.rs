//! Sizing constants shared by round planning and output writers.

use std::time::Duration;

/// Bytes in one kibibyte.
pub const BYTES_PER_KIBIBYTE: u64 = 1 << 10;
/// Bytes in one mebibyte.
pub const BYTES_PER_MEBIBYTE: u64 = 1 << 20;
/// Bytes in one gibibyte.
pub const BYTES_PER_GIBIBYTE: u64 = 1 << 30;

/// Expansion of on-disk (compressed Parquet) bytes once decoded into memory.
///
/// Only the primary-key digest and sort key columns are held in memory, so
/// this stays well below the full-table inflation of Snappy Parquet. Keep it
/// above the observed average.
pub const IN_MEMORY_INFLATION_MULTIPLIER: f64 = 1.5;

/// Rows written per primary-key index file unless configured otherwise.
pub const DEFAULT_MAX_ROWS_PER_INDEX_FILE: usize = 5_000_000;

/// Rows per materialized output file unless configured otherwise.
pub const DEFAULT_MAX_ROWS_PER_MATERIALIZED_FILE: u64 = 1_000_000;

/// Materialize buckets used to balance output files unless configured otherwise.
pub const DEFAULT_NUM_MATERIALIZE_BUCKETS: u32 = 4;

/// Upper bound on concurrent file writes issued by one dedupe task.
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

/// Time a dedupe task waits for all peers to report record counts.
pub const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Primary-key index layout version written by this crate.
pub const DEFAULT_PK_INDEX_VERSION: u32 = 1;
