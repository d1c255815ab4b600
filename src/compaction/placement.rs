//! Deterministic output placement of surviving rows.
//!
//! Once every task has reported, the finalized [`RecordCountTable`] fixes a
//! global order: materialize buckets ascending, then source files ascending,
//! then task indices ascending. Walking that order with a running row offset
//! per bucket gives every `(bucket, source file, task)` run a starting
//! position. Each task then packs its own rows of a source file contiguously
//! from that position, wrapping to the next file every `max_rows_per_file`
//! rows. Buckets are laid out one after another, each starting on a fresh
//! file, so `(file, row)` pairs are unique across the round.

use std::{collections::HashMap, sync::Arc};

use arrow::{
    array::{ArrayRef, Int32Array, Int64Array},
    record_batch::RecordBatch,
};

use super::{
    barrier::RecordCountTable,
    dedupe::for_each_source_row,
    error::CompactionError,
    router::{bucket_for, MaterializeBucket, SourceFileId},
    system_columns::{self, FILE_INDEX, IS_SOURCE, RECORD_INDEX, STREAM_POSITION},
};

/// Output position of a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowPlacement {
    /// Output file, numbered across the whole round.
    pub file_index: u64,
    /// Row within that file.
    pub row_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunStart {
    bucket_first_file: u64,
    offset: u64,
    rows: u64,
}

/// Starting positions of every `(bucket, source file, task)` run.
#[derive(Debug, Clone)]
pub struct Placement {
    max_rows_per_file: u64,
    runs: HashMap<(MaterializeBucket, SourceFileId, usize), RunStart>,
    file_count: u64,
}

impl Placement {
    /// Lay out a finalized count table.
    pub fn compute(counts: &RecordCountTable, max_rows_per_file: u64) -> Self {
        let max_rows_per_file = max_rows_per_file.max(1);
        let mut runs = HashMap::new();
        let mut next_file = 0u64;
        for (bucket, files) in counts {
            let bucket_first_file = next_file;
            let mut offset = 0u64;
            for (source, tasks) in files {
                for (task_index, rows) in tasks {
                    runs.insert(
                        (*bucket, *source, *task_index),
                        RunStart {
                            bucket_first_file,
                            offset,
                            rows: *rows,
                        },
                    );
                    offset += rows;
                }
            }
            next_file = bucket_first_file + offset.div_ceil(max_rows_per_file);
        }
        Self {
            max_rows_per_file,
            runs,
            file_count: next_file,
        }
    }

    /// Number of output files the round's rows span.
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Starting output position of a run.
    pub fn start(
        &self,
        bucket: MaterializeBucket,
        source: &SourceFileId,
        task_index: usize,
    ) -> Option<RowPlacement> {
        self.runs
            .get(&(bucket, *source, task_index))
            .map(|run| self.position(run, 0))
    }

    fn position(&self, run: &RunStart, local: u64) -> RowPlacement {
        let offset = run.offset + local;
        RowPlacement {
            file_index: run.bucket_first_file + offset / self.max_rows_per_file,
            row_index: offset % self.max_rows_per_file,
        }
    }

    /// Assigner for the rows of one task.
    pub fn assigner(&self, task_index: usize, num_materialize_buckets: u32) -> RowAssigner<'_> {
        RowAssigner {
            placement: self,
            task_index,
            num_materialize_buckets,
            assigned: HashMap::new(),
        }
    }
}

/// Hands out consecutive output positions to one task's rows.
///
/// Rows must be presented in the same order on every run; the n-th row seen
/// for a source file takes the n-th slot of that file's run.
#[derive(Debug)]
pub struct RowAssigner<'a> {
    placement: &'a Placement,
    task_index: usize,
    num_materialize_buckets: u32,
    assigned: HashMap<SourceFileId, u64>,
}

impl RowAssigner<'_> {
    /// Next output position for a row from `source`.
    ///
    /// Fails if the task reported fewer rows for `source` than it places.
    pub fn assign(&mut self, source: SourceFileId) -> Result<RowPlacement, CompactionError> {
        let bucket = bucket_for(&source, self.num_materialize_buckets);
        let run = self
            .placement
            .runs
            .get(&(bucket, source, self.task_index))
            .ok_or_else(|| {
                CompactionError::Invariant(format!(
                    "task {} has no reported count for source file {source}",
                    self.task_index
                ))
            })?;
        let local = self.assigned.entry(source).or_default();
        if *local >= run.rows {
            return Err(CompactionError::Invariant(format!(
                "task {} placed more than {} rows from source file {source}",
                self.task_index, run.rows
            )));
        }
        let placement = self.placement.position(run, *local);
        *local += 1;
        Ok(placement)
    }
}

/// Replace a deduped table's provenance with its output placement.
///
/// The result keeps the digest and sort keys, followed by [`FILE_INDEX`] and
/// [`RECORD_INDEX`] holding each row's output file and row.
pub fn apply_placement(
    table: &RecordBatch,
    assigner: &mut RowAssigner<'_>,
) -> Result<RecordBatch, CompactionError> {
    let mut files = Vec::with_capacity(table.num_rows());
    let mut rows = Vec::with_capacity(table.num_rows());
    let mut failure = None;
    for_each_source_row(table, |source, _| {
        if failure.is_some() {
            return;
        }
        match assigner.assign(source) {
            Ok(placement) => {
                files.push(placement.file_index);
                rows.push(placement.row_index);
            }
            Err(err) => failure = Some(err),
        }
    })?;
    if let Some(err) = failure {
        return Err(err);
    }
    let files = files
        .into_iter()
        .map(|file| {
            i32::try_from(file).map_err(|_| {
                CompactionError::Invariant(format!("output file index {file} overflows i32"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let rows: Vec<i64> = rows.into_iter().map(|row| row as i64).collect();
    let stripped = system_columns::drop_columns(
        table,
        &[STREAM_POSITION, FILE_INDEX, RECORD_INDEX, IS_SOURCE],
    )?;
    let file_column: ArrayRef = Arc::new(Int32Array::from(files));
    let row_column: ArrayRef = Arc::new(Int64Array::from(rows));
    system_columns::append_columns(
        &stripped,
        vec![(FILE_INDEX, file_column), (RECORD_INDEX, row_column)],
    )
}
