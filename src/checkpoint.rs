use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::error::StoreError;

/// Durable key/value record of scan progress.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;
    async fn set(&self, key: &str, value: u64) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryCheckpoints {
    values: Mutex<BTreeMap<String, u64>>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoints {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.values.lock().await.get(key).copied())
    }

    async fn set(&self, key: &str, value: u64) -> Result<(), StoreError> {
        self.values.lock().await.insert(key.to_owned(), value);
        Ok(())
    }
}

/// Checkpoints kept as one JSON object on disk, `{"scan_name": tailmax, ..}`.
///
/// Every `set` rewrites the whole file through a temp file and a rename, so a
/// crash mid-write leaves the previous checkpoint intact.
#[derive(Debug)]
pub struct FileCheckpoints {
    path: PathBuf,
    values: Mutex<BTreeMap<String, u64>>,
}

impl FileCheckpoints {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    async fn write_all(&self, values: &BTreeMap<String, u64>) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(values)?;
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoints {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.values.lock().await.get(key).copied())
    }

    async fn set(&self, key: &str, value: u64) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        values.insert(key.to_owned(), value);
        self.write_all(&values).await
    }
}
