use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

use crate::error::FetchError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::parse::{parse_result_page, Selectors};
use crate::Result;

/// The search form wants the ID left-padded with zeros to this width.
pub const ID_WIDTH: usize = 8;

/// Fetches one ID's result page over HTTP and extracts the record from it.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    // Client uses Arc so we can clone cheaply
    client: Client,
    base_url: String,
    selectors: Arc<Selectors>,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client,
            base_url: base_url.into(),
            selectors: Arc::new(Selectors::new()?),
        })
    }

    /// Requests the page for `id` and returns its HTML.
    async fn request_page_html(&self, id: u64) -> core::result::Result<String, reqwest::Error> {
        let res = self
            .client
            .get(&self.base_url)
            .query(&[("tdcj", padded_id(id))])
            .send()
            .await?
            .error_for_status()?;
        res.text().await
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, id: u64, timeout: Duration) -> core::result::Result<FetchOutcome, FetchError> {
        trace!(id, ?timeout, "requesting page");
        let html = match tokio::time::timeout(timeout, self.request_page_html(id)).await {
            Err(_) => return Err(FetchError::Timeout(timeout)),
            Ok(Err(e)) if e.is_timeout() => return Err(FetchError::Timeout(timeout)),
            Ok(Err(e)) => return Err(FetchError::Request(e.to_string())),
            Ok(Ok(html)) => html,
        };
        parse_result_page(id, html, self.selectors.clone()).await
    }
}

pub fn padded_id(id: u64) -> String {
    format!("{id:0width$}", width = ID_WIDTH)
}
