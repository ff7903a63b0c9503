//! Worker pool and lifecycle controller.
//!
//! ```text
//! Idle ──start──► Running ──signal / fatal error / exhausted──► Draining ──all joined──► Stopped
//! ```
//!
//! Shutdown is one-way: a `Scanner` runs at most once.
//! When the range manager exhausts the ID space the queue is closed and the
//! workers finish what is left in it. A termination signal or a fatal error
//! cancels every task instead, abandoning in-flight fetches.

use std::future::Future;
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::ScanConfig;
use crate::fetch::Fetcher;
use crate::manager::{resume_point, ManagerExit, ManagerExitReason, RangeManager};
use crate::queue::WorkQueue;
use crate::store::ResultStore;
use crate::wait::AdaptiveWait;
use crate::worker::{FetchWorker, ScanStats, StatsSnapshot};
use crate::{info_time, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    /// The range manager reached the floor and the queue drained.
    Exhausted,
    /// Shutdown was requested from outside.
    Signalled,
    /// A task failed fatally and its siblings were cancelled.
    Failed,
}

/// Summary of one finished scan.
#[derive(Debug)]
pub struct ScanReport {
    pub reason: ExitReason,
    pub stats: StatsSnapshot,
    /// Resume point stored after drain, if the manager exited cleanly.
    pub checkpoint: Option<u64>,
    pub elapsed_secs: f64,
    /// Every task error collected while draining, first one first.
    pub errors: Vec<Error>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turns the report into an error when any task failed.
    pub fn into_result(mut self) -> Result<ScanReport> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(self.errors.remove(0))
        }
    }
}

/// Owns the range manager and `config.workers` fetch workers for one scan.
pub struct Scanner {
    config: ScanConfig,
    fetcher: Arc<dyn Fetcher>,
    checkpoints: Arc<dyn CheckpointStore>,
    results: Arc<dyn ResultStore>,
    cancel: CancellationToken,
    state: watch::Sender<LifecycleState>,
}

impl Scanner {
    pub fn new(
        config: ScanConfig,
        fetcher: Arc<dyn Fetcher>,
        checkpoints: Arc<dyn CheckpointStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            config,
            fetcher,
            checkpoints,
            results,
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Token that cancels the scan the same way a termination signal does.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&self, next: LifecycleState) {
        info!(state = ?next, "scanner state");
        self.state.send_replace(next);
    }

    /// Runs the scan until the ID space is exhausted, `shutdown` resolves,
    /// or a task fails fatally.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<ScanReport> {
        if self.state() != LifecycleState::Idle {
            return Err(Error::AlreadyStarted);
        }
        self.config.validate()?;
        let start_time = Local::now();

        let queue = Arc::new(WorkQueue::new(self.config.queue_capacity()));
        let stats = Arc::new(ScanStats::default());
        let manager = match RangeManager::resume(
            &self.config,
            queue.clone(),
            self.checkpoints.clone(),
            self.results.clone(),
        )
        .await
        {
            Ok(manager) => manager,
            Err(e) => {
                self.set_state(LifecycleState::Stopped);
                return Err(e);
            }
        };

        self.set_state(LifecycleState::Running);
        let mut manager_task = tokio::spawn(manager.run(self.cancel.clone()));
        let mut workers = JoinSet::new();
        for index in 0..self.config.workers {
            let worker = FetchWorker::new(
                index,
                queue.clone(),
                self.fetcher.clone(),
                self.results.clone(),
                stats.clone(),
                AdaptiveWait::new(self.config.base_wait),
            )
            .halt_on_fetch_failure(self.config.halt_on_fetch_failure);
            workers.spawn(worker.run(self.cancel.clone()));
        }
        info_time!(
            "Started scan '{}' with {} workers",
            self.config.scan_name,
            self.config.workers
        );

        tokio::pin!(shutdown);
        let mut errors = Vec::new();
        let mut manager_exit: Option<ManagerExit> = None;
        let mut manager_done = false;

        let reason = loop {
            if manager_done && workers.is_empty() {
                break ExitReason::Exhausted;
            }
            tokio::select! {
                _ = &mut shutdown => {
                    info!("termination requested");
                    break ExitReason::Signalled;
                }
                res = &mut manager_task, if !manager_done => {
                    manager_done = true;
                    match res {
                        Ok(Ok(exit)) => {
                            manager_exit = Some(exit);
                            if exit.reason == ManagerExitReason::Cancelled {
                                break ExitReason::Signalled;
                            }
                            queue.close();
                            self.set_state(LifecycleState::Draining);
                        }
                        Ok(Err(e)) => {
                            errors.push(e);
                            break ExitReason::Failed;
                        }
                        Err(e) => {
                            errors.push(Error::RuntimeJoin(e));
                            break ExitReason::Failed;
                        }
                    }
                }
                Some(res) = workers.join_next(), if !workers.is_empty() => {
                    match res {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            errors.push(e);
                            break ExitReason::Failed;
                        }
                        Err(e) => {
                            errors.push(Error::RuntimeJoin(e));
                            break ExitReason::Failed;
                        }
                    }
                }
            }
        };

        if self.state() != LifecycleState::Draining {
            self.set_state(LifecycleState::Draining);
        }
        self.cancel.cancel();

        if !manager_done {
            match manager_task.await {
                Ok(Ok(exit)) => manager_exit = Some(exit),
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(Error::RuntimeJoin(e)),
            }
        }
        while let Some(res) = workers.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(Error::RuntimeJoin(e)),
            }
        }
        for e in &errors {
            error!(error = %e, "task failed");
        }

        let checkpoint = match manager_exit {
            Some(exit) => {
                let checkpoint = resume_point(&queue, exit.tailmax);
                match self.checkpoints.set(&self.config.scan_name, checkpoint).await {
                    Ok(()) => Some(checkpoint),
                    Err(e) => {
                        errors.push(Error::Checkpoint(e));
                        None
                    }
                }
            }
            None => {
                warn!("range manager did not exit cleanly, keeping last stored checkpoint");
                None
            }
        };

        self.set_state(LifecycleState::Stopped);
        let stats = stats.snapshot();
        let elapsed_secs = (Local::now() - start_time)
            .num_microseconds()
            .map(|n| n as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        info_time!(
            start_time,
            "Scan stopped ({:?}): {} assigned, {} unassigned, {} duplicates, {} failed, checkpoint {:?}",
            reason,
            stats.assigned,
            stats.unassigned,
            stats.duplicates,
            stats.failed_ids.len(),
            checkpoint
        );

        Ok(ScanReport {
            reason,
            stats,
            checkpoint,
            elapsed_secs,
            errors,
        })
    }
}
