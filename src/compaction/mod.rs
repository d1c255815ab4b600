//! Primary-key index compaction.
//!
//! A round unions each hash bucket's prior index with the bucket's new delta
//! rows, keeps the last write per primary key, and rewrites the index with a
//! deterministic output position for every surviving row. Dedupe tasks work
//! independently except for one shared [`barrier::RecordCountBarrier`], which
//! gathers surviving row counts so every task computes the same placement.

/// Cross-task record count accumulator.
pub mod barrier;
/// Last-writer-wins deduplication.
pub mod dedupe;
/// Round error type.
pub mod error;
/// Handle-based exchange of surviving record sets.
pub mod handles;
/// Primary-key digests and hash bucket splitting.
pub mod hash_bucket;
/// Dedupe statistics.
pub mod metrics;
/// Deterministic output file and row assignment.
pub mod placement;
/// Delta discovery and round sizing.
pub mod planner;
/// Round driver.
pub mod round;
/// Materialize bucket routing of source files.
pub mod router;
/// Reserved working table columns.
pub mod system_columns;
/// Per-task dedupe pipeline.
pub mod task;
/// Union of prior index and new delta rows.
pub mod union;
/// Index and round record persistence.
pub mod writer;

pub use error::CompactionError;
