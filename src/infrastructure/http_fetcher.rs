//! HTTP page fetcher with rate limiting and identity rotation
//!
//! Implements [`PageFetcher`] over reqwest. Requests are throttled through
//! a shared rate limiter, and a ban response can be answered by rebuilding
//! the underlying client with a rotated user agent and a fresh cookie jar.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::fetch::{FetchError, PageFetcher};

/// Browser-like user agents rotated on identity renewal.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
];

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_requests_per_second: 2,
            follow_redirects: true,
        }
    }
}

/// Rate-limited HTTP fetcher with rotatable identity.
pub struct HttpPageFetcher {
    client: RwLock<Client>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpFetcherConfig,
}

impl HttpPageFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self> {
        let client = build_client(&config, pick_user_agent())?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client: RwLock::new(client),
            rate_limiter,
            config,
        })
    }

    /// Swap the client for one with a rotated user agent and an empty
    /// cookie jar.
    async fn renew_identity(&self) -> Result<(), FetchError> {
        let agent = pick_user_agent();
        info!("Renewing fetch identity (user agent: {})", agent);
        let client =
            build_client(&self.config, agent).map_err(|e| FetchError::Fatal(e.to_string()))?;
        *self.client.write().await = client;
        Ok(())
    }
}

fn pick_user_agent() -> &'static str {
    USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]
}

fn build_client(config: &HttpFetcherConfig, user_agent: &str) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).context("Invalid user agent")?,
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("pt-PT,pt;q=0.9,en;q=0.8"),
    );

    Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .cookie_store(true)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        })
        .build()
        .context("Failed to create HTTP client")
}

/// Responses the site serves when it has flagged the client.
fn classify_status(status: StatusCode) -> FetchError {
    match status {
        StatusCode::FORBIDDEN => FetchError::Ban(format!("HTTP {status}")),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited(format!("HTTP {status}")),
        s if s.is_server_error() => FetchError::Transient(format!("HTTP {s}")),
        s => FetchError::Fatal(format!("HTTP {s}")),
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(
        &self,
        url: &str,
        wait_marker: Option<&str>,
        fresh_identity: bool,
    ) -> Result<String, FetchError> {
        if fresh_identity {
            self.renew_identity().await?;
        }

        self.rate_limiter.until_ready().await;
        debug!("Fetching URL: {}", url);

        let response = {
            let client = self.client.read().await;
            client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Transient(format!("request to {url} failed: {e}")))?
        };

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("reading body of {url} failed: {e}")))?;

        // A block page can still answer 200; the marker check catches it.
        if let Some(marker) = wait_marker {
            if !body.contains(marker) {
                warn!("Expected content marker missing from {}", url);
                return Err(FetchError::Transient(format!(
                    "content marker {marker:?} not found in {url}"
                )));
            }
        }

        debug!("Fetched {} ({} chars)", url, body.len());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            FetchError::Ban(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            FetchError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            FetchError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            FetchError::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn fetcher_creation() {
        let fetcher = HttpPageFetcher::new(HttpFetcherConfig::default());
        assert!(fetcher.is_ok());
    }

    #[tokio::test]
    async fn zero_rate_limit_is_rejected() {
        let config = HttpFetcherConfig {
            max_requests_per_second: 0,
            ..Default::default()
        };
        assert!(HttpPageFetcher::new(config).is_err());
    }
}
