use serde::{Deserialize, Serialize};

use super::StreamPosition;

/// Metadata persisted at the end of every round for a compacted partition.
///
/// Read at the start of the next round to resume after `high_watermark` and
/// to keep the hash bucket count stable across rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCompletionInfo {
    /// Last stream position folded into the compacted index.
    pub high_watermark: StreamPosition,
    /// Hash bucket count the index is sharded by.
    pub hash_buckets: u32,
}

impl RoundCompletionInfo {
    /// Build a completion record.
    pub fn new(high_watermark: StreamPosition, hash_buckets: u32) -> Self {
        Self {
            high_watermark,
            hash_buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RoundCompletionInfo;

    #[test]
    fn json_layout() {
        let info = RoundCompletionInfo::new(17, 8);
        let json = serde_json::to_string(&info).expect("serialize");
        assert_eq!(json, r#"{"high_watermark":17,"hash_buckets":8}"#);
    }
}
