use arrow::error::ArrowError;
use thiserror::Error;

use super::{barrier::BarrierError, planner::PlanError};
use crate::{
    store::StoreError,
    table::{io::TableIoError, CodecError},
};

/// Errors raised while running a compaction round.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Round planning failed before any task was scheduled.
    #[error("compaction planning error: {0}")]
    Plan(#[from] PlanError),
    /// Object store transfer failed.
    #[error("compaction store error: {0}")]
    Store(#[from] StoreError),
    /// Table encoding or decoding failed.
    #[error("compaction codec error: {0}")]
    Codec(#[from] CodecError),
    /// Arrow kernel failure.
    #[error("compaction arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Manifest or round record (de)serialization failed.
    #[error("compaction json error: {0}")]
    Json(#[from] serde_json::Error),
    /// A dedupe task could not rendezvous with its peers.
    #[error("compaction barrier error: {0}")]
    Barrier(#[from] BarrierError),
    /// Persisted state contradicts what the round requires.
    #[error("compaction invariant violated: {0}")]
    Invariant(String),
    /// A system column is absent from a working table.
    #[error("working table is missing system column `{0}`")]
    MissingColumn(&'static str),
    /// A primary key or sort key column is absent from a delta file.
    #[error("delta file is missing key column `{0}`")]
    MissingKeyColumn(String),
    /// Processing of one hash bucket failed.
    #[error("hash bucket {hash_bucket} failed: {source}")]
    HashBucket {
        /// Index of the failing hash bucket.
        hash_bucket: u32,
        /// Underlying failure.
        source: Box<CompactionError>,
    },
    /// A dedupe task failed.
    #[error("dedupe task {task_index} failed: {source}")]
    Task {
        /// Index of the failing task.
        task_index: usize,
        /// Underlying failure.
        source: Box<CompactionError>,
    },
    /// A dedupe task panicked or was cancelled.
    #[error("dedupe task join error: {0}")]
    Join(String),
}

impl CompactionError {
    pub(crate) fn in_hash_bucket(self, hash_bucket: u32) -> Self {
        Self::HashBucket {
            hash_bucket,
            source: Box::new(self),
        }
    }

    pub(crate) fn in_task(self, task_index: usize) -> Self {
        Self::Task {
            task_index,
            source: Box::new(self),
        }
    }

    /// Innermost failure, skipping hash bucket and task context.
    pub fn root_cause(&self) -> &CompactionError {
        match self {
            Self::HashBucket { source, .. } | Self::Task { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<TableIoError> for CompactionError {
    fn from(err: TableIoError) -> Self {
        match err {
            TableIoError::Store(err) => Self::Store(err),
            TableIoError::Codec(err) => Self::Codec(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CompactionError;

    #[test]
    fn context_wraps_and_unwraps() {
        let err = CompactionError::MissingColumn("_pk_hash")
            .in_hash_bucket(3)
            .in_task(1);
        assert_eq!(
            err.to_string(),
            "dedupe task 1 failed: hash bucket 3 failed: working table is missing system column \
             `_pk_hash`"
        );
        assert!(matches!(
            err.root_cause(),
            CompactionError::MissingColumn("_pk_hash")
        ));
    }
}
