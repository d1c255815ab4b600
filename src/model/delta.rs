use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use super::{manifest::ManifestEntry, Manifest, PartitionLocator};

/// Monotonic position of a delta within its partition's change stream.
pub type StreamPosition = i64;

/// Kind of change carried by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaType {
    /// Insert or replace rows by primary key.
    Upsert,
    /// Remove rows by primary key.
    Delete,
}

impl DeltaType {
    /// Stable single-byte encoding used in the delta type system column.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Upsert => 0,
            Self::Delete => 1,
        }
    }

    /// Decode the system column representation.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Upsert),
            1 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Locates a delta by partition and stream position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaLocator {
    /// Partition the delta was appended to.
    pub partition: PartitionLocator,
    /// Position of the delta in the partition's change stream.
    pub stream_position: StreamPosition,
}

/// Delta as returned by the paginated listing capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Identity of the delta.
    pub locator: DeltaLocator,
    /// Kind of change carried by every file in the delta.
    pub delta_type: DeltaType,
}

impl Delta {
    /// Stream position of the delta.
    pub fn stream_position(&self) -> StreamPosition {
        self.locator.stream_position
    }
}

/// A delta together with the manifest of its physical files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaManifest {
    /// Delta described by the manifest.
    pub delta: Delta,
    /// Physical files of the delta, ordered by file index.
    pub manifest: Manifest,
}

impl DeltaManifest {
    /// Expand the manifest into one reference per physical file.
    pub fn file_refs(&self) -> Vec<DeltaFileRef> {
        self.manifest
            .entries
            .iter()
            .enumerate()
            .map(|(file_index, entry)| DeltaFileRef {
                stream_position: self.delta.stream_position(),
                file_index: file_index as i32,
                delta_type: self.delta.delta_type,
                entry: entry.clone(),
            })
            .collect()
    }

    /// Sum of the content lengths recorded for every file of the delta.
    pub fn content_length(&self) -> u64 {
        self.manifest
            .entries
            .iter()
            .map(|entry| entry.meta.content_length)
            .sum()
    }
}

/// One physical delta file scheduled for compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaFileRef {
    /// Stream position of the owning delta.
    pub stream_position: StreamPosition,
    /// Ordinal of the file within its delta manifest.
    pub file_index: i32,
    /// Kind of change carried by the file.
    pub delta_type: DeltaType,
    /// Manifest entry locating the file.
    pub entry: ManifestEntry,
}

/// A delta file's rows plus their provenance.
///
/// Envelopes are immutable once produced and ordered by
/// `(stream_position, file_index)` ascending.
#[derive(Debug, Clone)]
pub struct DeltaFileEnvelope {
    /// Stream position of the owning delta.
    pub stream_position: StreamPosition,
    /// Ordinal of the file within its delta manifest.
    pub file_index: i32,
    /// Kind of change carried by the file.
    pub delta_type: DeltaType,
    /// Columnar payload.
    pub table: RecordBatch,
}

impl DeltaFileEnvelope {
    /// Ordering key of the envelope within a round.
    pub fn order_key(&self) -> (StreamPosition, i32) {
        (self.stream_position, self.file_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentEncoding, ContentType, ManifestMeta};

    #[test]
    fn delta_type_encoding_is_stable() {
        assert_eq!(DeltaType::Upsert.as_u8(), 0);
        assert_eq!(DeltaType::Delete.as_u8(), 1);
        assert_eq!(DeltaType::from_u8(1), Some(DeltaType::Delete));
        assert_eq!(DeltaType::from_u8(7), None);
    }

    #[test]
    fn file_refs_follow_manifest_order() {
        let entry = |url: &str, len: u64| {
            ManifestEntry::new(
                url,
                ManifestMeta::new(len, 10, ContentType::Parquet, ContentEncoding::Identity),
            )
        };
        let manifest = DeltaManifest {
            delta: Delta {
                locator: DeltaLocator {
                    partition: PartitionLocator::new("ns", "tbl", 1, vec!["p0".into()], "pid"),
                    stream_position: 42,
                },
                delta_type: DeltaType::Upsert,
            },
            manifest: Manifest::of(vec![entry("mem://b/a", 5), entry("mem://b/b", 7)]),
        };
        let refs = manifest.file_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].file_index, 1);
        assert_eq!(refs[1].stream_position, 42);
        assert_eq!(manifest.content_length(), 12);
    }
}
