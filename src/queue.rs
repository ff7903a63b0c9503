use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// Bounded FIFO of IDs shared by the range manager and the fetch workers.
///
/// Besides the channel itself the queue keeps a ledger of IDs that were pushed
/// but not yet acknowledged by a worker. The highest pending ID is the only
/// safe resume point for the descending scan.
#[derive(Debug)]
pub struct WorkQueue {
    tx: Mutex<Option<mpsc::Sender<u64>>>,
    // Workers take turns waiting on the receiver; recv is cancel safe.
    rx: AsyncMutex<mpsc::Receiver<u64>>,
    capacity: usize,
    queued: AtomicUsize,
    pending: Mutex<BTreeMap<u64, usize>>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
            capacity,
            queued: AtomicUsize::new(0),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of IDs sitting in the queue, not counting ones already claimed.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.tx).is_none()
    }

    /// Enqueues `id`, waiting for room when the queue is full.
    /// Returns `false` if the queue has been closed.
    ///
    /// Cancel safe: nothing is recorded until a slot has been reserved.
    pub async fn push(&self, id: u64) -> bool {
        let tx = lock(&self.tx).clone();
        let Some(tx) = tx else {
            return false;
        };
        let Ok(permit) = tx.reserve().await else {
            return false;
        };
        *lock(&self.pending).entry(id).or_insert(0) += 1;
        self.queued.fetch_add(1, Ordering::AcqRel);
        permit.send(id);
        true
    }

    /// Claims the next ID. Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<u64> {
        let id = self.rx.lock().await.recv().await?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(id)
    }

    /// Marks one claim of `id` as finished, whatever the outcome.
    pub fn ack(&self, id: u64) {
        let mut pending = lock(&self.pending);
        if let Some(count) = pending.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&id);
            }
        }
    }

    /// Highest ID pushed but not yet acknowledged.
    pub fn highest_pending(&self) -> Option<u64> {
        lock(&self.pending).last_key_value().map(|(id, _)| *id)
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).values().sum()
    }

    /// Stops accepting pushes. Queued IDs can still be popped.
    pub fn close(&self) {
        lock(&self.tx).take();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
