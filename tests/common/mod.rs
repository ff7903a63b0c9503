#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tailscan::fetch::{FetchOutcome, Fetcher};
use tailscan::record::{Entry, Record, ResultKind};
use tailscan::store::{InsertOutcome, MemoryResultStore, ResultStore, StoreCounts};
use tailscan::{FetchError, StoreError};

/// Fetcher with a fixed script: which IDs exist, which time out how often,
/// which hang forever and which fail outright.
#[derive(Default)]
pub struct ScriptedFetcher {
    pub assigned: HashSet<u64>,
    pub hang: HashSet<u64>,
    pub broken: HashSet<u64>,
    pub hang_all: bool,
    pub delay: Duration,
    timeouts: Mutex<HashMap<u64, usize>>,
    calls: Mutex<Vec<(u64, Duration)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    pub fn with_assigned(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.assigned.extend(ids);
        self
    }

    pub fn with_timeouts(self, id: u64, times: usize) -> Self {
        self.timeouts.lock().unwrap().insert(id, times);
        self
    }

    pub fn with_broken(mut self, id: u64) -> Self {
        self.broken.insert(id);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang_all = true;
        self
    }

    pub fn calls(&self) -> Vec<(u64, Duration)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: u64) -> Vec<Duration> {
        self.calls()
            .into_iter()
            .filter(|(i, _)| *i == id)
            .map(|(_, t)| t)
            .collect()
    }
}

pub fn record(id: u64) -> Record {
    let mut admin = BTreeMap::new();
    admin.insert("Name".to_owned(), format!("OFFENDER {id}"));
    admin.insert("TDCJ Number".to_owned(), format!("{id:08}"));
    Record::new(id, admin, Vec::new())
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, id: u64, timeout: Duration) -> Result<FetchOutcome, FetchError> {
        self.calls.lock().unwrap().push((id, timeout));
        if self.hang_all || self.hang.contains(&id) {
            std::future::pending::<()>().await;
        }
        let time_out = {
            let mut timeouts = self.timeouts.lock().unwrap();
            match timeouts.get_mut(&id) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if time_out {
            tokio::time::sleep(timeout).await;
            return Err(FetchError::Timeout(timeout));
        }
        tokio::time::sleep(self.delay).await;
        if self.broken.contains(&id) {
            return Err(FetchError::Request(format!("connection reset for {id}")));
        }
        if self.assigned.contains(&id) {
            Ok(FetchOutcome::Found(record(id)))
        } else {
            Ok(FetchOutcome::NotFound)
        }
    }
}

/// Memory store that fails every insert of one ID.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryResultStore,
    pub fail_on: u64,
    pub inserts: AtomicUsize,
}

impl FailingStore {
    pub fn failing_on(id: u64) -> Self {
        Self {
            fail_on: id,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ResultStore for FailingStore {
    async fn insert(&self, entry: Entry) -> Result<InsertOutcome, StoreError> {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        if entry.id() == self.fail_on {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.insert(entry).await
    }

    async fn kind_of(&self, id: u64) -> Result<Option<ResultKind>, StoreError> {
        self.inner.kind_of(id).await
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        self.inner.counts().await
    }
}
