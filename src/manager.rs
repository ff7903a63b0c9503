use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::checkpoint::CheckpointStore;
use crate::config::ScanConfig;
use crate::queue::WorkQueue;
use crate::store::ResultStore;
use crate::{info_time, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerExitReason {
    /// `tailmax` reached the floor.
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerExit {
    pub reason: ManagerExitReason,
    /// Highest ID not yet scheduled when the manager stopped.
    pub tailmax: u64,
}

/// Producer side of the pipeline: walks the ID space downwards in batches
/// and refills the work queue whenever it runs low.
pub struct RangeManager {
    queue: Arc<WorkQueue>,
    checkpoints: Arc<dyn CheckpointStore>,
    // Set when already-recorded IDs should not be enqueued again.
    recorded: Option<Arc<dyn ResultStore>>,
    scan_name: String,
    batch_size: u64,
    poll_interval: Duration,
    floor: u64,
    tailmax: u64,
}

impl RangeManager {
    pub fn new(
        queue: Arc<WorkQueue>,
        checkpoints: Arc<dyn CheckpointStore>,
        scan_name: impl Into<String>,
        tailmax: u64,
        floor: u64,
        batch_size: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            checkpoints,
            recorded: None,
            scan_name: scan_name.into(),
            batch_size: batch_size.max(1),
            poll_interval,
            floor,
            tailmax,
        }
    }

    /// Builds a manager from `config`, resuming from the stored checkpoint
    /// when there is one and from `config.start` otherwise.
    pub async fn resume(
        config: &ScanConfig,
        queue: Arc<WorkQueue>,
        checkpoints: Arc<dyn CheckpointStore>,
        results: Arc<dyn ResultStore>,
    ) -> Result<Self> {
        let stored = checkpoints
            .get(&config.scan_name)
            .await
            .map_err(Error::Checkpoint)?;
        let tailmax = match stored {
            Some(tailmax) => {
                info!(tailmax, scan = %config.scan_name, "resuming from checkpoint");
                tailmax
            }
            None => {
                info!(tailmax = config.start, scan = %config.scan_name, "no checkpoint, starting fresh");
                config.start
            }
        };
        let mut manager = Self::new(
            queue,
            checkpoints,
            config.scan_name.clone(),
            tailmax,
            config.floor,
            config.batch_size,
            config.poll_interval,
        );
        if config.skip_recorded {
            manager = manager.skip_recorded(results);
        }
        Ok(manager)
    }

    pub fn skip_recorded(mut self, results: Arc<dyn ResultStore>) -> Self {
        self.recorded = Some(results);
        self
    }

    pub fn tailmax(&self) -> u64 {
        self.tailmax
    }

    fn exhausted(&self) -> bool {
        self.tailmax <= self.floor
    }

    fn exit(&self, reason: ManagerExitReason) -> ManagerExit {
        ManagerExit {
            reason,
            tailmax: self.tailmax,
        }
    }

    /// Runs until the ID space is exhausted or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ManagerExit> {
        loop {
            if self.exhausted() {
                info!(tailmax = self.tailmax, floor = self.floor, "id space exhausted");
                return Ok(self.exit(ManagerExitReason::Exhausted));
            }

            if self.queue.len() < self.batch_size as usize {
                if !self.schedule_batch(&cancel).await? {
                    return Ok(self.exit(ManagerExitReason::Cancelled));
                }
                if self.exhausted() {
                    continue;
                }
            } else {
                trace!(queued = self.queue.len(), "queue still full enough");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.exit(ManagerExitReason::Cancelled)),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Enqueues the next batch counting down from `tailmax`, lowers `tailmax`
    /// and then persists the checkpoint, in that order.
    /// Returns `false` if cancelled or the queue closed before the batch was complete.
    pub async fn schedule_batch(&mut self, cancel: &CancellationToken) -> Result<bool> {
        let start_time = Local::now();
        let low = self.tailmax.saturating_sub(self.batch_size).max(self.floor);
        let mut scheduled = 0u64;

        for id in (low + 1..=self.tailmax).rev() {
            if let Some(results) = &self.recorded {
                let known = results.contains(id).await.map_err(|source| Error::Store { id, source })?;
                if known {
                    trace!(id, "already recorded, not scheduling");
                    continue;
                }
            }
            let pushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                pushed = self.queue.push(id) => pushed,
            };
            if !pushed {
                return Ok(false);
            }
            scheduled += 1;
        }

        self.tailmax = low;
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let checkpoint = self.persist().await?;
        info_time!(
            start_time,
            "Scheduled {} ids, tailmax now {}, checkpoint {}",
            scheduled,
            self.tailmax,
            checkpoint
        );
        Ok(true)
    }

    /// Stores the safe resume point and returns it.
    pub async fn persist(&self) -> Result<u64> {
        let checkpoint = resume_point(&self.queue, self.tailmax);
        self.checkpoints
            .set(&self.scan_name, checkpoint)
            .await
            .map_err(Error::Checkpoint)?;
        debug!(checkpoint, scan = %self.scan_name, "checkpoint stored");
        Ok(checkpoint)
    }
}

/// Highest ID that may still need work: the top unacknowledged ID, or
/// `tailmax` when nothing above it is pending.
pub fn resume_point(queue: &WorkQueue, tailmax: u64) -> u64 {
    queue.highest_pending().map_or(tailmax, |p| p.max(tailmax))
}
