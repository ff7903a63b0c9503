use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::record::Record;

/// What the remote source said about one ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Record),
    NotFound,
}

/// The external page-fetch-and-extract operation.
///
/// Implementations must give up with [`FetchError::Timeout`] once `timeout`
/// has elapsed.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, id: u64, timeout: Duration) -> Result<FetchOutcome, FetchError>;
}
