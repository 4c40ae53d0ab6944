//! HTTP page fetcher with retry and content-settle wait

use super::{FetchError, PageFetcher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Configuration for the HTTP page fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Fixed back-off between retries
    pub retry_backoff: Duration,
    /// Upper bound on waiting for dynamic content to appear
    pub settle_timeout: Duration,
    /// Delay between re-fetches while waiting for content to settle
    pub settle_poll: Duration,
    /// Any of these tokens in the body means the content has rendered
    pub settle_markers: Vec<String>,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            settle_timeout: Duration::from_secs(15),
            settle_poll: Duration::from_secs(3),
            settle_markers: vec!["FROST".to_string(), "Epoch".to_string()],
            user_agent: concat!("storage-metrics-harvester/", env!("CARGO_PKG_VERSION"))
                .to_string(),
        }
    }
}

/// Fetches page content over HTTP
pub struct HttpPageFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl HttpPageFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(2)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(FetcherConfig::default())
    }

    async fn fetch_once(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis(),
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(transport)?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        Ok(body)
    }

    /// Navigate with a fixed back-off between transient failures
    async fn fetch_with_retry(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, timeout).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        url = %url,
                        attempt = attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Transient fetch failure, retrying"
                    );
                    sleep(self.config.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn has_settled(&self, body: &str) -> bool {
        self.config.settle_markers.is_empty()
            || self
                .config
                .settle_markers
                .iter()
                .any(|marker| body.contains(marker.as_str()))
    }

    /// Re-fetch until a settle marker shows up or the settle window closes,
    /// then proceed with whatever content was last seen.
    async fn settle(&self, url: &str, mut body: String, timeout: Duration) -> String {
        let deadline = Instant::now() + self.config.settle_timeout;

        while !self.has_settled(&body) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(url = %url, "Content did not settle in time, proceeding anyway");
                break;
            }

            sleep(self.config.settle_poll.min(remaining)).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(url = %url, "Content did not settle in time, proceeding anyway");
                break;
            }

            match self.fetch_once(url, timeout.min(remaining)).await {
                Ok(next) => body = next,
                Err(e) => debug!(url = %url, error = %e, "Re-fetch while settling failed"),
            }
        }

        body
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_rendered(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let body = self.fetch_with_retry(url, timeout).await?;
        Ok(self.settle(url, body, timeout).await)
    }
}
