//! Page fetching
//!
//! The refresh pipeline only depends on the `PageFetcher` capability: given a
//! URL and a navigation timeout, return the page's (fully or partially)
//! rendered text. `HttpPageFetcher` is the production implementation over
//! plain HTTP with bounded retries and a content-settle wait.

mod http;

pub use http::{FetcherConfig, HttpPageFetcher};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Default navigation timeout per source
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(45);

/// Failure to obtain content from one source
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {timeout_ms} ms fetching {url}")]
    Timeout { url: String, timeout_ms: u128 },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("empty response body from {url}")]
    EmptyBody { url: String },
}

impl FetchError {
    /// Whether a retry of the same navigation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            FetchError::EmptyBody { .. } => false,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Http { .. } => "http",
            FetchError::Transport { .. } => "transport",
            FetchError::EmptyBody { .. } => "empty_body",
        }
    }
}

/// Capability to fetch rendered page content
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the rendered text of `url`, giving up after `timeout`
    async fn fetch_rendered(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}
