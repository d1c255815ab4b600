#![deny(missing_docs)]
//! Primary-key deduplicating compaction for append-only delta streams.
//!
//! A partition's change stream is a sequence of immutable deltas (upserts and
//! deletes). Each compaction round folds the deltas written since the last
//! round into a primary-key index that is sharded by hash bucket and stored as
//! Parquet files plus a JSON manifest per bucket.
//!
//! The round pipeline is:
//!
//! 1. [`compaction::planner`] discovers the deltas after the prior high
//!    watermark and limits them to what fits in the cluster's memory budget.
//! 2. [`compaction::hash_bucket`] splits every delta file by primary-key hash.
//! 3. One dedupe task per group of hash buckets unions the prior index with the
//!    new rows ([`compaction::union`]) and keeps the last writer per primary
//!    key ([`compaction::dedupe`]).
//! 4. Tasks report surviving row counts to a shared
//!    [`compaction::barrier::RecordCountBarrier`] and wait for every peer.
//! 5. [`compaction::placement`] assigns each surviving row a deterministic
//!    output file and row offset, and [`compaction::writer`] publishes the new
//!    index files and manifests.
//!
//! [`compaction::round::CompactionRound`] drives the whole round.

/// Compaction round planning, dedupe, synchronization and output placement.
pub mod compaction;

/// Tunables and fixed sizing constants.
pub mod constants;

/// Identifier generation for persisted artifacts.
pub mod id;

/// Storage model: deltas, partitions, manifests and round metadata.
pub mod model;

/// Structured logging helpers.
pub(crate) mod observability;

/// Compaction configuration.
pub mod option;

/// Paginated delta listing capability.
pub mod storage;

/// Object store capability and backends.
pub mod store;

/// Columnar table codecs and store glue.
pub mod table;

pub use crate::{
    compaction::{
        error::CompactionError,
        round::{CompactionRound, RoundRequest, RoundSummary},
    },
    option::CompactionOptions,
};
