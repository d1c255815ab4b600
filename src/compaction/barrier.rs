//! Cross-task record count accumulator and rendezvous point.
//!
//! The count table is owned by a single actor task. Dedupe tasks talk to it
//! through a cloneable [`RecordCountBarrier`] handle: every mutation is one
//! message, applied whole before the next is read, so concurrent reports
//! never interleave. Finalization is published on a watch channel that
//! waiters block on instead of polling.

use std::{collections::BTreeMap, time::Duration};

use thiserror::Error;
use tokio::sync::{oneshot, watch};

use super::router::{MaterializeBucket, SourceFileId};
use crate::observability::{log_debug, log_info};

/// One task's surviving row counts: `materialize bucket → source file → rows`.
pub type RecordCounts = BTreeMap<MaterializeBucket, BTreeMap<SourceFileId, u64>>;

/// Every task's counts: `materialize bucket → source file → task index → rows`.
pub type RecordCountTable =
    BTreeMap<MaterializeBucket, BTreeMap<SourceFileId, BTreeMap<usize, u64>>>;

/// Liveness failures observed through a barrier handle.
#[derive(Debug, Error)]
pub enum BarrierError {
    /// The owning actor is gone.
    #[error("record count barrier closed")]
    Closed,
    /// Not every task reported before the wait elapsed.
    #[error("record count barrier not finalized after {0:?}")]
    Timeout(Duration),
}

enum Command {
    Add {
        task_index: usize,
        counts: RecordCounts,
        reply: oneshot::Sender<()>,
    },
    IsFinalized {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<RecordCountTable>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add { task_index, .. } => f
                .debug_struct("Add")
                .field("task_index", task_index)
                .finish_non_exhaustive(),
            Self::IsFinalized { .. } => f.write_str("IsFinalized"),
            Self::Snapshot { .. } => f.write_str("Snapshot"),
        }
    }
}

struct BarrierActor {
    table: RecordCountTable,
    expected: usize,
    reported: usize,
    finalized: watch::Sender<bool>,
}

impl BarrierActor {
    fn is_finalized(&self) -> bool {
        self.reported >= self.expected
    }

    fn add(&mut self, task_index: usize, counts: RecordCounts) {
        let mut rows = 0u64;
        for (bucket, files) in counts {
            let bucket_counts = self.table.entry(bucket).or_default();
            for (source, count) in files {
                *bucket_counts
                    .entry(source)
                    .or_default()
                    .entry(task_index)
                    .or_default() += count;
                rows += count;
            }
        }
        self.reported += 1;
        log_debug!(
            component = "barrier",
            event = "record_counts_added",
            task_index,
            rows,
            reported = self.reported,
            expected = self.expected,
        );
        if self.is_finalized() && !*self.finalized.borrow() {
            log_info!(
                component = "barrier",
                event = "barrier_finalized",
                expected = self.expected,
            );
            self.finalized.send_replace(true);
        }
    }

    async fn run(mut self, mailbox: flume::Receiver<Command>) {
        while let Ok(command) = mailbox.recv_async().await {
            match command {
                Command::Add {
                    task_index,
                    counts,
                    reply,
                } => {
                    self.add(task_index, counts);
                    let _ = reply.send(());
                }
                Command::IsFinalized { reply } => {
                    let _ = reply.send(self.is_finalized());
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.table.clone());
                }
            }
        }
    }
}

/// Handle to the shared record count accumulator of one round.
#[derive(Debug, Clone)]
pub struct RecordCountBarrier {
    mailbox: flume::Sender<Command>,
    finalized: watch::Receiver<bool>,
    expected: usize,
}

impl RecordCountBarrier {
    /// Spawn the accumulator on the current tokio runtime.
    ///
    /// The barrier finalizes once `add_record_counts` has been called
    /// `expected_task_count` times and stays finalized afterwards.
    pub fn spawn(expected_task_count: usize) -> Self {
        let (mailbox, inbox) = flume::unbounded();
        let (finalized_tx, finalized) = watch::channel(expected_task_count == 0);
        let actor = BarrierActor {
            table: RecordCountTable::new(),
            expected: expected_task_count,
            reported: 0,
            finalized: finalized_tx,
        };
        tokio::spawn(actor.run(inbox));
        Self {
            mailbox,
            finalized,
            expected: expected_task_count,
        }
    }

    /// Number of reports that finalize the barrier.
    pub fn expected_task_count(&self) -> usize {
        self.expected
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BarrierError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send_async(command(reply))
            .await
            .map_err(|_| BarrierError::Closed)?;
        response.await.map_err(|_| BarrierError::Closed)
    }

    /// Merge one task's counts into the shared table, summing existing
    /// entries, and count the task as reported.
    pub async fn add_record_counts(
        &self,
        task_index: usize,
        counts: RecordCounts,
    ) -> Result<(), BarrierError> {
        self.request(|reply| Command::Add {
            task_index,
            counts,
            reply,
        })
        .await
    }

    /// Returns `true` once every expected task has reported.
    pub async fn is_finalized(&self) -> Result<bool, BarrierError> {
        self.request(|reply| Command::IsFinalized { reply }).await
    }

    /// Snapshot of the accumulated table.
    pub async fn record_counts(&self) -> Result<RecordCountTable, BarrierError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Block until the barrier finalizes or `timeout` elapses.
    pub async fn wait_finalized(&self, timeout: Duration) -> Result<(), BarrierError> {
        let mut finalized = self.finalized.clone();
        let waited = tokio::time::timeout(timeout, finalized.wait_for(|done| *done))
            .await
            .map(|finalized| finalized.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BarrierError::Closed),
            Err(_) => Err(BarrierError::Timeout(timeout)),
        }
    }
}
