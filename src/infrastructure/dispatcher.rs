//! Concurrent fetch dispatcher with bounded parallelism and retry
//!
//! Fetches a bounded set of page URLs in parallel. A counting semaphore
//! caps in-flight fetches; per-fetch failures are captured as tagged
//! results so one bad page never aborts its siblings. Batch results are
//! resequenced by original page index before being handed downstream,
//! because price-segmentation bookkeeping depends on encountering pages in
//! ascending order.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::fetch::{FetchError, PageFetcher};

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 20;

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum in-flight fetches. Clamped to 1..=20.
    pub concurrency: usize,
    /// Retry attempts after the initial try, for retryable error classes.
    pub max_retries: u32,
    /// Initial backoff delay; doubles per attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Content marker passed through to the fetcher.
    pub wait_marker: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            wait_marker: None,
        }
    }
}

/// Result of fetching one page, tagged by its original page index.
#[derive(Debug, Clone)]
pub struct PageFetch {
    pub page: u32,
    pub url: String,
    pub html: Option<String>,
    pub error: Option<String>,
}

impl PageFetch {
    pub fn succeeded(&self) -> bool {
        self.html.is_some()
    }
}

/// Fans page fetches out onto a bounded pool of tasks.
#[derive(Clone)]
pub struct FetchDispatcher {
    fetcher: Arc<dyn PageFetcher>,
    semaphore: Arc<Semaphore>,
    config: DispatcherConfig,
}

impl FetchDispatcher {
    pub fn new(fetcher: Arc<dyn PageFetcher>, mut config: DispatcherConfig) -> Self {
        config.concurrency = config.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        Self {
            fetcher,
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            config,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Batches are capped at two waves of concurrency so no more than 2×C
    /// fetched pages are ever queued ahead of database application.
    pub fn batch_size(&self) -> usize {
        self.config.concurrency * 2
    }

    /// Fetch a single page under semaphore control. Failures are folded
    /// into the returned [`PageFetch`], never raised.
    pub async fn fetch_page(&self, url: String, page: u32) -> PageFetch {
        let permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(closed) => {
                return PageFetch {
                    page,
                    url,
                    html: None,
                    error: Some(closed.to_string()),
                };
            }
        };

        let result = self.fetch_with_retry(&url).await;
        drop(permit);

        match result {
            Ok(html) => PageFetch {
                page,
                url,
                html: Some(html),
                error: None,
            },
            Err(e) => {
                warn!("Failed to fetch page {}: {}", page, e);
                PageFetch {
                    page,
                    url,
                    html: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Fetch a batch of pages concurrently, resequenced by page index.
    pub async fn fetch_batch(&self, pages: Vec<(u32, String)>) -> Vec<PageFetch> {
        let tasks: Vec<_> = pages
            .into_iter()
            .map(|(page, url)| {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.fetch_page(url, page).await })
            })
            .collect();

        let mut results = Vec::new();
        for joined in join_all(tasks).await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Fetch task join failed: {}", e),
            }
        }

        // Downstream merge bookkeeping requires ascending page order.
        results.sort_by_key(|r| r.page);
        results
    }

    /// Retry loop around the fetcher. Ban, rate-limit and transient
    /// failures are retried with capped exponential backoff; a ban retries
    /// under a renewed fetch identity. Fatal errors surface immediately.
    async fn fetch_with_retry(&self, url: &str) -> Result<String, FetchError> {
        let mut fresh_identity = false;
        let mut attempt = 0_u32;

        loop {
            match self
                .fetcher
                .fetch_page(url, self.config.wait_marker.as_deref(), fresh_identity)
                .await
            {
                Ok(html) => {
                    debug!("Fetched {} ({} chars)", url, html.len());
                    return Ok(html);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    fresh_identity = e.wants_fresh_identity();
                    let delay = backoff_delay(attempt, self.config.base_delay, self.config.max_delay);
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt,
                        self.config.max_retries,
                        url,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff with ±10% jitter, capped at `max_delay`.
fn backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let exponential = base_delay
        .as_millis()
        .saturating_mul(1_u128 << attempt.saturating_sub(1).min(16));
    let capped = exponential.min(max_delay.as_millis()) as u64;
    let jitter = (capped as f64 * 0.1 * (fastrand::f64() * 2.0 - 1.0)) as i64;
    Duration::from_millis(capped.saturating_add_signed(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_config(concurrency: usize) -> DispatcherConfig {
        DispatcherConfig {
            concurrency,
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            wait_marker: None,
        }
    }

    /// Instrumented fetcher stub that records the peak number of fetches
    /// in flight at once.
    struct InstrumentedFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InstrumentedFetcher {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for InstrumentedFetcher {
        async fn fetch_page(
            &self,
            url: &str,
            _wait_marker: Option<&str>,
            _fresh_identity: bool,
        ) -> Result<String, FetchError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("<html>{url}</html>"))
        }
    }

    #[tokio::test]
    async fn batch_never_exceeds_concurrency_bound() {
        let fetcher = Arc::new(InstrumentedFetcher::new());
        let dispatcher = FetchDispatcher::new(fetcher.clone(), test_config(3));

        let pages: Vec<(u32, String)> = (1..=12).map(|p| (p, format!("u{p}"))).collect();
        let results = dispatcher.fetch_batch(pages).await;

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(PageFetch::succeeded));
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    /// Fetcher whose completion time decreases with page index, so raw
    /// completion order is the reverse of page order.
    struct ShuffledFetcher;

    #[async_trait]
    impl PageFetcher for ShuffledFetcher {
        async fn fetch_page(
            &self,
            url: &str,
            _wait_marker: Option<&str>,
            _fresh_identity: bool,
        ) -> Result<String, FetchError> {
            let page: u64 = url.trim_start_matches('u').parse().unwrap();
            sleep(Duration::from_millis(60_u64.saturating_sub(page * 10))).await;
            Ok(url.to_string())
        }
    }

    #[tokio::test]
    async fn batch_results_are_resequenced_by_page_index() {
        let dispatcher = FetchDispatcher::new(Arc::new(ShuffledFetcher), test_config(5));
        let pages: Vec<(u32, String)> = (1..=5).map(|p| (p, format!("u{p}"))).collect();

        let results = dispatcher.fetch_batch(pages).await;
        let order: Vec<u32> = results.iter().map(|r| r.page).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    /// Fails a configurable number of times before succeeding, recording
    /// each attempt's fresh-identity flag.
    struct FlakyFetcher {
        failures: AtomicU32,
        error: FetchError,
        identities: Mutex<Vec<bool>>,
    }

    impl FlakyFetcher {
        fn new(failures: u32, error: FetchError) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error,
                identities: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for FlakyFetcher {
        async fn fetch_page(
            &self,
            _url: &str,
            _wait_marker: Option<&str>,
            fresh_identity: bool,
        ) -> Result<String, FetchError> {
            self.identities.lock().unwrap().push(fresh_identity);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok("<html/>".into())
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let fetcher = Arc::new(FlakyFetcher::new(2, FetchError::Transient("reset".into())));
        let dispatcher = FetchDispatcher::new(fetcher.clone(), test_config(2));

        let result = dispatcher.fetch_page("u1".into(), 1).await;
        assert!(result.succeeded());
        assert_eq!(fetcher.identities.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn ban_retry_requests_a_fresh_identity() {
        let fetcher = Arc::new(FlakyFetcher::new(1, FetchError::Ban("blocked".into())));
        let dispatcher = FetchDispatcher::new(fetcher.clone(), test_config(2));

        let result = dispatcher.fetch_page("u1".into(), 1).await;
        assert!(result.succeeded());
        let identities = fetcher.identities.lock().unwrap();
        assert_eq!(*identities, vec![false, true]);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let fetcher = Arc::new(FlakyFetcher::new(9, FetchError::Fatal("410 gone".into())));
        let dispatcher = FetchDispatcher::new(fetcher.clone(), test_config(2));

        let result = dispatcher.fetch_page("u1".into(), 1).await;
        assert!(!result.succeeded());
        assert!(result.error.unwrap().contains("410"));
        assert_eq!(fetcher.identities.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_tagged_failure() {
        let fetcher = Arc::new(FlakyFetcher::new(9, FetchError::RateLimited("429".into())));
        let dispatcher = FetchDispatcher::new(fetcher.clone(), test_config(2));

        let result = dispatcher.fetch_page("u1".into(), 1).await;
        assert!(!result.succeeded());
        // Initial attempt plus max_retries.
        assert_eq!(fetcher.identities.lock().unwrap().len(), 4);
    }

    #[test]
    fn concurrency_is_clamped_to_supported_range() {
        struct Noop;
        #[async_trait]
        impl PageFetcher for Noop {
            async fn fetch_page(
                &self,
                _url: &str,
                _wait_marker: Option<&str>,
                _fresh_identity: bool,
            ) -> Result<String, FetchError> {
                Ok(String::new())
            }
        }
        let d = FetchDispatcher::new(Arc::new(Noop), test_config(0));
        assert_eq!(d.concurrency(), 1);
        let d = FetchDispatcher::new(Arc::new(Noop), test_config(99));
        assert_eq!(d.concurrency(), 20);
        assert_eq!(d.batch_size(), 40);
    }

    #[test]
    fn backoff_is_capped() {
        for attempt in 1..10 {
            let d = backoff_delay(
                attempt,
                Duration::from_millis(100),
                Duration::from_millis(400),
            );
            assert!(d <= Duration::from_millis(440), "attempt {attempt}: {d:?}");
        }
    }
}
