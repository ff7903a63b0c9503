use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    ParseInvalidSelector(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
    #[error("The scanner was already started once, shutdown is one-way.")]
    AlreadyStarted,

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Fatal fetch failure for id {id}: {source}")]
    Fetch {
        id: u64,
        #[source]
        source: FetchError,
    },
    #[error("Result store failure for id {id}: {source}")]
    Store {
        id: u64,
        #[source]
        source: StoreError,
    },
    #[error("Result store failure: {0}")]
    ResultStore(#[source] StoreError),
    #[error("Checkpoint store failure: {0}")]
    Checkpoint(#[source] StoreError),
}

/// Failure modes of the external fetch collaborator.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("request failed: {0}")]
    Request(String),
    #[error("could not parse result page: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

/// Unexpected storage failure. Duplicate keys are not errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(String),
}
