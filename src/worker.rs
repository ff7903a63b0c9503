use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::FetchError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::queue::WorkQueue;
use crate::record::{Entry, ResultKind};
use crate::store::{InsertOutcome, ResultStore};
use crate::wait::AdaptiveWait;
use crate::{Error, Result};

/// Counters shared by all workers of one scan.
#[derive(Debug, Default)]
pub struct ScanStats {
    assigned: AtomicU64,
    unassigned: AtomicU64,
    duplicates: AtomicU64,
    newly_filled: AtomicU64,
    failed_ids: Mutex<Vec<u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub assigned: u64,
    pub unassigned: u64,
    pub duplicates: u64,
    /// Duplicates where the ID was recorded unassigned but is now found.
    pub newly_filled: u64,
    pub failed_ids: Vec<u64>,
}

impl ScanStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut failed_ids = self
            .failed_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        failed_ids.sort_unstable_by(|a, b| b.cmp(a));
        StatsSnapshot {
            assigned: self.assigned.load(Ordering::Relaxed),
            unassigned: self.unassigned.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            newly_filled: self.newly_filled.load(Ordering::Relaxed),
            failed_ids,
        }
    }

    fn record_failure(&self, id: u64) {
        self.failed_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }
}

/// How one claimed ID ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Stored(ResultKind),
    /// The ID already had an entry of the given kind.
    Duplicate(ResultKind),
    /// Timed out at the ceiling or failed outright; nothing was stored and
    /// the ID is left pending for the next run.
    FetchFailed,
}

/// Consumer side of the pipeline: claims IDs, fetches, classifies and stores them.
pub struct FetchWorker {
    index: usize,
    queue: Arc<WorkQueue>,
    fetcher: Arc<dyn Fetcher>,
    results: Arc<dyn ResultStore>,
    stats: Arc<ScanStats>,
    wait: AdaptiveWait,
    halt_on_fetch_failure: bool,
    /// Unassigned IDs seen since the last assigned one.
    unassigned_streak: u64,
}

impl FetchWorker {
    pub fn new(
        index: usize,
        queue: Arc<WorkQueue>,
        fetcher: Arc<dyn Fetcher>,
        results: Arc<dyn ResultStore>,
        stats: Arc<ScanStats>,
        wait: AdaptiveWait,
    ) -> Self {
        Self {
            index,
            queue,
            fetcher,
            results,
            stats,
            wait,
            halt_on_fetch_failure: false,
            unassigned_streak: 0,
        }
    }

    pub fn halt_on_fetch_failure(mut self, halt: bool) -> Self {
        self.halt_on_fetch_failure = halt;
        self
    }

    pub fn wait(&self) -> &AdaptiveWait {
        &self.wait
    }

    /// Loops until the queue is closed and drained, or until cancelled.
    /// A cancelled in-flight ID is abandoned without acknowledgement, and so
    /// is one whose fetch failed, which keeps both under the resume point.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        debug!(worker = self.index, "worker started");
        loop {
            let id = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                id = self.queue.pop() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            match self.process_one(id, &cancel).await? {
                Some(TaskOutcome::FetchFailed) => {}
                Some(_) => self.queue.ack(id),
                None => break,
            }
        }
        debug!(worker = self.index, "worker stopped");
        Ok(())
    }

    /// Fetches, classifies and stores one ID.
    /// Returns `Ok(None)` when cancellation interrupted the fetch.
    pub async fn process_one(
        &mut self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<TaskOutcome>> {
        let outcome = match self.fetch_with_backoff(id, cancel).await {
            None => return Ok(None),
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                self.stats.record_failure(id);
                if self.halt_on_fetch_failure {
                    error!(id, worker = self.index, error = %e, "fetch failed, halting scan");
                    return Err(Error::Fetch { id, source: e });
                }
                warn!(id, worker = self.index, error = %e, "fetch failed, id left for the next run");
                return Ok(Some(TaskOutcome::FetchFailed));
            }
        };

        let entry = match outcome {
            FetchOutcome::Found(record) => Entry::from(record),
            FetchOutcome::NotFound => Entry::Unassigned { id },
        };
        let kind = entry.kind();

        match self.results.insert(entry).await {
            Ok(InsertOutcome::Inserted) => {
                self.on_stored(id, kind);
                Ok(Some(TaskOutcome::Stored(kind)))
            }
            Ok(InsertOutcome::Duplicate(existing)) => {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                if existing == ResultKind::Unassigned && kind == ResultKind::Assigned {
                    self.stats.newly_filled.fetch_add(1, Ordering::Relaxed);
                    info!(id, worker = self.index, "previously unassigned id is now assigned, left as is");
                } else {
                    info!(id, worker = self.index, "duplicate id ignored");
                }
                Ok(Some(TaskOutcome::Duplicate(existing)))
            }
            Err(source) => {
                error!(id, worker = self.index, error = %source, "result store failure");
                Err(Error::Store { id, source })
            }
        }
    }

    /// Fetches `id`, retrying a timeout once at a raised multiplier.
    /// Returns `None` if cancelled first.
    async fn fetch_with_backoff(
        &mut self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Option<core::result::Result<FetchOutcome, FetchError>> {
        let mut retried = false;
        loop {
            let timeout = self.wait.timeout();
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                res = self.fetcher.fetch(id, timeout) => res,
            };

            match res {
                Ok(outcome) => {
                    self.wait.on_success();
                    return Some(Ok(outcome));
                }
                Err(e) if e.is_timeout() => {
                    let raised = self.wait.on_timeout();
                    if retried || !raised {
                        return Some(Err(e));
                    }
                    retried = true;
                    debug!(
                        id,
                        worker = self.index,
                        multiplier = self.wait.multiplier(),
                        "timed out, retrying with longer wait"
                    );
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn on_stored(&mut self, id: u64, kind: ResultKind) {
        match kind {
            ResultKind::Assigned => {
                self.stats.assigned.fetch_add(1, Ordering::Relaxed);
                info!(
                    id,
                    worker = self.index,
                    unassigned_before = self.unassigned_streak,
                    "added to assigned"
                );
                self.unassigned_streak = 0;
            }
            ResultKind::Unassigned => {
                self.stats.unassigned.fetch_add(1, Ordering::Relaxed);
                self.unassigned_streak += 1;
                debug!(id, worker = self.index, "added to unassigned");
            }
        }
    }
}
