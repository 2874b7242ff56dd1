//! Page-fetch capability boundary
//!
//! The transport that turns a URL into rendered markup lives outside this
//! crate's core. It is modeled as an explicit trait with one required
//! operation and a typed error taxonomy so the dispatcher can tell
//! retryable failures apart from permanent ones.

use async_trait::async_trait;
use thiserror::Error;

/// Typed failure classes for a page fetch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The site refused automated access. Retried under a fresh identity.
    #[error("access banned by target site: {0}")]
    Ban(String),

    /// The site throttled us. Retried with backoff.
    #[error("rate limited by target site: {0}")]
    RateLimited(String),

    /// Timeouts, connection resets, 5xx responses. Retried with backoff.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// Malformed request or permanent 4xx. Never retried.
    #[error("permanent fetch failure: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Whether the dispatcher's retry wrapper may attempt this URL again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    /// Whether the next attempt should run under a renewed fetch identity.
    pub fn wants_fresh_identity(&self) -> bool {
        matches!(self, Self::Ban(_))
    }
}

/// Capability that retrieves rendered HTML for a URL.
///
/// `wait_marker` is an optional content marker the implementation should
/// ensure is present before returning, for pages whose interesting content
/// arrives late. `fresh_identity` forces a brand new underlying session for
/// this request (used when retrying after a ban) and is a call parameter
/// rather than hidden client state on purpose.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        url: &str,
        wait_marker: Option<&str>,
        fresh_identity: bool,
    ) -> Result<String, FetchError>;
}
