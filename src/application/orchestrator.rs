//! Crawl orchestrator
//!
//! Drives one full harvest sweep: for every configured (location,
//! operation, property type) tuple it paginates the current price window
//! through the fetch dispatcher, merges each page in order, and asks the
//! planner whether the window must be subdivided. A failing tuple is
//! recorded and the sweep moves on to the next one; the run only counts as
//! a success when every tuple finished cleanly.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::merge::MergeEngine;
use crate::domain::extract::ListingExtractor;
use crate::domain::listing::{CrawlRunStatus, ListingRecord, Operation, PageMetadata};
use crate::domain::repositories::{CrawlRunRepository, ListingRepository};
use crate::domain::segment::{PriceSegment, SegmentOutcome, SegmentPlanner};
use crate::domain::stats::RunStats;
use crate::domain::urls::{build_paginated_url, segment_search_url};
use crate::infrastructure::config::FilterConfig;
use crate::infrastructure::dispatcher::{FetchDispatcher, PageFetch};

/// Outcome of one orchestrated sweep.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub status: CrawlRunStatus,
    pub stats: RunStats,
    pub error: Option<String>,
}

pub struct CrawlOrchestrator {
    planner: SegmentPlanner,
    dispatcher: FetchDispatcher,
    extractor: Arc<dyn ListingExtractor>,
    listings: Arc<dyn ListingRepository>,
    runs: Arc<dyn CrawlRunRepository>,
    filters: FilterConfig,
    cancellation: CancellationToken,
}

impl CrawlOrchestrator {
    pub fn new(
        planner: SegmentPlanner,
        dispatcher: FetchDispatcher,
        extractor: Arc<dyn ListingExtractor>,
        listings: Arc<dyn ListingRepository>,
        runs: Arc<dyn CrawlRunRepository>,
        filters: FilterConfig,
    ) -> Self {
        Self {
            planner,
            dispatcher,
            extractor,
            listings,
            runs,
            filters,
            cancellation: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token, e.g. with one shared with a signal
    /// handler.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Execute one full sweep. The crawl run row is created up front and
    /// finalized exactly once, keeping whatever counters were accumulated
    /// even when the sweep fails partway.
    pub async fn run(&self) -> Result<RunSummary> {
        let snapshot = serde_json::to_string(&self.filters)?;
        let run_id = self.runs.create_run(&snapshot).await?;
        info!("Crawl run {} started", run_id);

        let mut stats = RunStats::default();
        let mut merge = MergeEngine::new(Arc::clone(&self.listings));
        let mut first_error: Option<String> = None;

        'sweep: for location in &self.filters.locations {
            for operation in self.filters.operations.operations() {
                for property_type in &self.filters.property_types {
                    if self.cancellation.is_cancelled() {
                        first_error.get_or_insert_with(|| "crawl cancelled".to_string());
                        break 'sweep;
                    }
                    if let Err(e) = self
                        .harvest_tuple(&mut merge, &mut stats, location, operation, property_type)
                        .await
                    {
                        let message =
                            format!("{location}/{operation}/{property_type}: {e:#}");
                        error!("Tuple failed, continuing with remaining tuples: {message}");
                        first_error.get_or_insert(message);
                    }
                }
            }
        }

        let status = if first_error.is_none() {
            CrawlRunStatus::Success
        } else {
            CrawlRunStatus::Failed
        };
        self.runs
            .finalize_run(run_id, status, &stats, first_error.as_deref())
            .await?;
        info!("Crawl run {} finished {}: {}", run_id, status.as_str(), stats);

        Ok(RunSummary {
            run_id,
            status,
            stats,
            error: first_error,
        })
    }

    /// Sweep one query tuple, subdividing price windows until the planner
    /// declares the tuple exhausted.
    async fn harvest_tuple(
        &self,
        merge: &mut MergeEngine,
        stats: &mut RunStats,
        location: &str,
        operation: Operation,
        property_type: &str,
    ) -> Result<()> {
        let mut segment = self.planner.first_segment(
            location,
            operation,
            property_type,
            self.filters.min_price_floor,
            self.filters.initial_max_price,
        );

        loop {
            if self.cancellation.is_cancelled() {
                return Err(anyhow!("crawl cancelled"));
            }
            info!("Sweeping window {}", segment);
            let outcome = self.harvest_segment(merge, stats, &segment).await?;
            stats.segments_scraped += 1;

            match self.planner.next_segment(&segment, &outcome) {
                Some(next) => {
                    info!(
                        "Window hit the page ceiling after {} pages, subdividing at {:?}€",
                        outcome.pages_fetched, next.max_price
                    );
                    segment = next;
                }
                None => return Ok(()),
            }
        }
    }

    /// Paginate one price window: page 1 establishes the page count, the
    /// rest is fetched in bounded batches and merged strictly in page
    /// order. A page whose fetch or extraction still fails after retries
    /// is logged and skipped; its absence may under-count the window but
    /// never aborts siblings. Only merge-path errors propagate.
    async fn harvest_segment(
        &self,
        merge: &mut MergeEngine,
        stats: &mut RunStats,
        segment: &PriceSegment,
    ) -> Result<SegmentOutcome> {
        let base_url = segment_search_url(segment);

        // Page 1 anchors the window; without it nothing is known about
        // the window's size, so the window yields an empty outcome.
        let first = self.dispatcher.fetch_page(base_url.clone(), 1).await;
        let Some((records, meta)) = self.extract_page(first, segment) else {
            warn!("Window {} skipped entirely: page 1 unusable", segment);
            return Ok(SegmentOutcome::default());
        };
        merge
            .merge_page(&records, &segment.location_slug, Utc::now(), stats)
            .await?;
        stats.pages_scraped += 1;

        let ceiling = self.planner.page_ceiling();
        let last_page = meta
            .last_page
            .unwrap_or(if meta.has_next_page { ceiling } else { 1 })
            .min(ceiling);
        let mut pages_fetched = 1_u32;
        let mut lowest = meta.lowest_price_on_page;
        // Assume more results exist beyond a ceiling-sized window unless
        // its final page merges and says otherwise. A skipped final page
        // therefore still subdivides, re-covering the gap.
        let mut reached_ceiling = last_page >= ceiling;
        if last_page == 1 {
            reached_ceiling = reached_ceiling && meta.has_next_page;
        }

        let remaining: Vec<(u32, String)> = (2..=last_page)
            .map(|page| (page, build_paginated_url(&base_url, page)))
            .collect();

        for batch in remaining.chunks(self.dispatcher.batch_size().max(1)) {
            if self.cancellation.is_cancelled() {
                return Err(anyhow!("crawl cancelled"));
            }

            let results = self.dispatcher.fetch_batch(batch.to_vec()).await;
            for result in results {
                let page = result.page;
                let Some((records, meta)) = self.extract_page(result, segment) else {
                    continue;
                };
                merge
                    .merge_page(&records, &segment.location_slug, Utc::now(), stats)
                    .await?;
                stats.pages_scraped += 1;
                pages_fetched += 1;

                lowest = match (lowest, meta.lowest_price_on_page) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                if page == last_page && last_page >= ceiling {
                    reached_ceiling = meta.has_next_page;
                }
            }
        }

        Ok(SegmentOutcome {
            pages_fetched,
            reached_ceiling,
            lowest_price_seen: lowest,
        })
    }

    /// Unpack one fetch result and run it through the extractor. Fetch
    /// and parse failures are downgraded to a logged `None`.
    fn extract_page(
        &self,
        result: PageFetch,
        segment: &PriceSegment,
    ) -> Option<(Vec<ListingRecord>, PageMetadata)> {
        let html = match (result.html, result.error) {
            (Some(html), _) => html,
            (None, error) => {
                warn!(
                    "Skipping page {} of {}: {}",
                    result.page,
                    segment,
                    error.unwrap_or_else(|| "no body".to_string())
                );
                return None;
            }
        };
        match self
            .extractor
            .extract(&html, segment.operation, &segment.property_type)
        {
            Ok(extracted) => Some(extracted),
            Err(e) => {
                warn!("Skipping page {} of {}: {}", result.page, segment, e);
                None
            }
        }
    }
}
