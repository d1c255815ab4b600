//! Storage model shared by planning, dedupe and output writers.
//!
//! These types mirror the persisted contracts of the table catalog: delta
//! locators and manifests, partition identity, manifest JSON files and the
//! per-partition round completion record.

/// Deltas, delta manifests and per-file envelopes.
pub mod delta;
/// Paginated list results.
pub mod list;
/// Manifest files describing the physical files of a delta or index shard.
pub mod manifest;
/// Partition identity.
pub mod partition;
/// Round completion metadata persisted between rounds.
pub mod round;

pub use delta::{
    Delta, DeltaFileEnvelope, DeltaFileRef, DeltaLocator, DeltaManifest, DeltaType,
    StreamPosition,
};
pub use list::ListResult;
pub use manifest::{ContentEncoding, ContentType, Manifest, ManifestEntry, ManifestMeta};
pub use partition::PartitionLocator;
pub use round::RoundCompletionInfo;
