//! Repository interfaces for the persistence boundary
//!
//! Trait definitions for the data access the merge engine and orchestrator
//! depend on; the sqlite implementation lives in the infrastructure layer.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::listing::{CrawlRunStatus, Listing, ListingHistoryEntry, Location};
use crate::domain::stats::RunStats;

/// Persistence operations for listings and their change history.
#[async_trait]
pub trait ListingRepository: Send + Sync {
    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<Listing>>;

    /// Insert a new listing, returning its database id.
    async fn insert_listing(&self, listing: &Listing) -> Result<i64>;

    async fn update_listing(&self, listing: &Listing) -> Result<()>;

    /// Append one history entry. Append-only by contract.
    async fn append_history(&self, entry: &ListingHistoryEntry) -> Result<()>;

    async fn find_location_by_slug(&self, slug: &str) -> Result<Option<Location>>;
}

/// Lifecycle of the per-sweep crawl run row.
#[async_trait]
pub trait CrawlRunRepository: Send + Sync {
    /// Create a run in `running` state, returning its id.
    async fn create_run(&self, config_snapshot: &str) -> Result<i64>;

    /// Finalize a run exactly once, preserving whatever counters were
    /// accumulated even on failure.
    async fn finalize_run(
        &self,
        run_id: i64,
        status: CrawlRunStatus,
        stats: &RunStats,
        error_message: Option<&str>,
    ) -> Result<()>;
}
