use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::warn;

use crate::error::StoreError;
use crate::record::{Entry, ResultKind};

/// What an insert did. A duplicate is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The ID was already recorded, with the given kind. Nothing was written.
    Duplicate(ResultKind),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub assigned: u64,
    pub unassigned: u64,
}

/// Append-only storage of at most one entry per ID.
///
/// Implementations must tolerate concurrent writers; two racing inserts of the
/// same ID resolve to exactly one `Inserted` and one `Duplicate`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert(&self, entry: Entry) -> Result<InsertOutcome, StoreError>;
    async fn kind_of(&self, id: u64) -> Result<Option<ResultKind>, StoreError>;
    async fn counts(&self) -> Result<StoreCounts, StoreError>;

    async fn contains(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.kind_of(id).await?.is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryResultStore {
    entries: Mutex<HashMap<u64, Entry>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: u64) -> Option<Entry> {
        self.entries.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert(&self, entry: Entry) -> Result<InsertOutcome, StoreError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&entry.id()) {
            return Ok(InsertOutcome::Duplicate(existing.kind()));
        }
        entries.insert(entry.id(), entry);
        Ok(InsertOutcome::Inserted)
    }

    async fn kind_of(&self, id: u64) -> Result<Option<ResultKind>, StoreError> {
        Ok(self.entries.lock().await.get(&id).map(Entry::kind))
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let entries = self.entries.lock().await;
        Ok(count_kinds(entries.values().map(Entry::kind)))
    }
}

/// Result store backed by a JSON-lines file, one [`Entry`] per line.
///
/// The ID index is rebuilt by replaying the file on open. A torn final line
/// (crash mid-append) is cut off before new entries are appended.
#[derive(Debug)]
pub struct JsonlResultStore {
    path: PathBuf,
    inner: Mutex<JsonlInner>,
}

#[derive(Debug)]
struct JsonlInner {
    file: File,
    /// Length of the file up to the last complete entry.
    len: u64,
    index: HashMap<u64, ResultKind>,
}

impl JsonlResultStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let (index, valid_len) = replay(&contents)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if valid_len < contents.len() {
            warn!(path = %path.display(), "dropping torn trailing line from result store");
            file.set_len(valid_len as u64).await?;
        }
        let mut len = valid_len as u64;
        if valid_len > 0 && !contents[..valid_len].ends_with('\n') {
            // Last entry is whole but unterminated; close it before appending.
            file.write_all(b"\n").await?;
            file.flush().await?;
            len += 1;
        }

        Ok(Self {
            path,
            inner: Mutex::new(JsonlInner { file, len, index }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns the ID index and the byte length of the well-formed prefix.
fn replay(contents: &str) -> Result<(HashMap<u64, ResultKind>, usize), StoreError> {
    let mut index = HashMap::new();
    let mut offset = 0;
    for line in contents.split_inclusive('\n') {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            match serde_json::from_str::<Entry>(trimmed) {
                Ok(entry) => {
                    index.entry(entry.id()).or_insert(entry.kind());
                }
                Err(_) if !line.ends_with('\n') => return Ok((index, offset)),
                Err(e) => return Err(e.into()),
            }
        }
        offset += line.len();
    }
    Ok((index, offset))
}

#[async_trait]
impl ResultStore for JsonlResultStore {
    async fn insert(&self, entry: Entry) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(kind) = inner.index.get(&entry.id()) {
            return Ok(InsertOutcome::Duplicate(*kind));
        }
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        if let Err(e) = append_line(&mut inner.file, &line).await {
            // Cut partial bytes so the next entry does not land after them.
            if let Err(cut) = inner.file.set_len(inner.len).await {
                warn!(error = %cut, "could not cut failed append from result store");
            }
            return Err(e.into());
        }
        inner.len += line.len() as u64;
        inner.index.insert(entry.id(), entry.kind());
        Ok(InsertOutcome::Inserted)
    }

    async fn kind_of(&self, id: u64) -> Result<Option<ResultKind>, StoreError> {
        Ok(self.inner.lock().await.index.get(&id).copied())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let inner = self.inner.lock().await;
        Ok(count_kinds(inner.index.values().copied()))
    }
}

async fn append_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await
}

fn count_kinds(kinds: impl Iterator<Item = ResultKind>) -> StoreCounts {
    kinds.fold(StoreCounts::default(), |mut acc, kind| {
        match kind {
            ResultKind::Assigned => acc.assigned += 1,
            ResultKind::Unassigned => acc.unassigned += 1,
        }
        acc
    })
}
