//! Dedupe task observability counters and summaries.

use std::ops::AddAssign;

/// Aggregate statistics of one dedupe task or a whole round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupeStats {
    /// Hash buckets processed.
    pub hash_buckets: usize,
    /// Rows entering dedupe, prior index rows included.
    pub input_rows: u64,
    /// Rows surviving dedupe and written to the index.
    pub output_rows: u64,
    /// Primary-key index files written.
    pub index_files: usize,
    /// Encoded bytes of the written index files.
    pub index_bytes: u64,
    /// In-memory bytes of the written index tables.
    pub in_memory_bytes: u64,
}

impl DedupeStats {
    /// Rows dropped as superseded writes.
    pub fn duplicate_rows(&self) -> u64 {
        self.input_rows.saturating_sub(self.output_rows)
    }
}

impl AddAssign for DedupeStats {
    fn add_assign(&mut self, other: Self) {
        self.hash_buckets += other.hash_buckets;
        self.input_rows = self.input_rows.saturating_add(other.input_rows);
        self.output_rows = self.output_rows.saturating_add(other.output_rows);
        self.index_files += other.index_files;
        self.index_bytes = self.index_bytes.saturating_add(other.index_bytes);
        self.in_memory_bytes = self.in_memory_bytes.saturating_add(other.in_memory_bytes);
    }
}

impl std::iter::Sum for DedupeStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut total, stats| {
            total += stats;
            total
        })
    }
}
