// Rate-limited client for the block explorer's confirmed-history endpoint.
// Requests are strictly serialized: one in flight at a time, one permit per
// WOC_RATE_LIMIT_MS.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::Config;

/// Page size the explorer serves; a shorter page means the history is
/// exhausted.
pub const HISTORY_PAGE_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("explorer rate limit exceeded")]
    RateLimited,

    #[error("explorer returned status {0}")]
    UpstreamError(u16),

    #[error("explorer transport error: {0}")]
    Transport(String),

    #[error("invalid explorer response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryItem {
    pub tx_hash: String,
    pub height: i64,
    #[serde(default)]
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub result: Vec<HistoryItem>,
    #[serde(default, rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait ExplorerClient: Send + Sync {
    /// One page of confirmed history for an address.
    async fn confirmed_history(
        &self,
        address: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ExplorerError>;
}

pub struct WocClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    permit: Semaphore,
}

impl WocClient {
    pub fn new(config: &Config) -> Self {
        let period = Duration::from_millis(config.woc_rate_limit_ms.max(1));
        let quota = Quota::with_period(period).expect("rate limit period must be non-zero");
        Self {
            http: reqwest::Client::new(),
            base_url: config.woc_url.trim_end_matches('/').to_string(),
            api_key: config.woc_api_key.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            permit: Semaphore::new(1),
        }
    }

    fn retry_policy() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(3)
            .with_jitter()
    }

    /// Wait for the next token before issuing a request.
    async fn pace(&self) {
        if let Err(negative) = self.rate_limiter.check() {
            let wait = negative.wait_time_from(DefaultClock::default().now());
            debug!("Explorer rate limit hit, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    async fn fetch_page(
        &self,
        address: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ExplorerError> {
        let url = format!("{}/address/{}/confirmed/history", self.base_url, address);
        let mut request = self.http.get(&url).timeout(Duration::from_secs(30));
        if let Some(token) = page_token {
            request = request.query(&[("token", token)]);
        }
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExplorerError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(HistoryPage::default()),
            StatusCode::TOO_MANY_REQUESTS => Err(ExplorerError::RateLimited),
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| ExplorerError::InvalidResponse(e.to_string())),
            status => Err(ExplorerError::UpstreamError(status.as_u16())),
        }
    }
}

#[async_trait]
impl ExplorerClient for WocClient {
    async fn confirmed_history(
        &self,
        address: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ExplorerError> {
        // The permit serializes callers; the token bucket spaces requests.
        let _guard = self
            .permit
            .acquire()
            .await
            .map_err(|e| ExplorerError::Transport(e.to_string()))?;

        (|| async {
            self.pace().await;
            self.fetch_page(address, page_token).await
        })
        .retry(&Self::retry_policy())
        .when(|e| matches!(e, ExplorerError::Transport(_)))
        .await
    }
}

/// Page through an address' confirmed history until the cap is reached or
/// the explorer runs dry, trimming the final page to exactly `max_tx`.
pub async fn paginate(
    client: &dyn ExplorerClient,
    address: &str,
    max_tx: usize,
) -> Result<Vec<HistoryItem>, ExplorerError> {
    let mut items: Vec<HistoryItem> = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = client.confirmed_history(address, token.as_deref()).await?;
        if page.result.is_empty() {
            break;
        }
        let page_len = page.result.len();
        items.extend(page.result);

        if items.len() >= max_tx {
            items.truncate(max_tx);
            break;
        }
        if page_len < HISTORY_PAGE_SIZE {
            break;
        }
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    if items.len() == max_tx {
        warn!(
            "History for {} hit the {} transaction cap",
            address, max_tx
        );
    }
    Ok(items)
}
