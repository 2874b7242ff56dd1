//! Aggregate counters for one crawl run
//!
//! Accumulated only in the single-threaded merge path, never inside
//! concurrent fetch callbacks, so no atomics or locks are needed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub listings_processed: u64,
    pub listings_created: u64,
    pub listings_updated: u64,
    pub pages_scraped: u64,
    pub segments_scraped: u64,
}

impl RunStats {
    pub fn record_merge(&mut self, created: bool) {
        self.listings_processed += 1;
        if created {
            self.listings_created += 1;
        } else {
            self.listings_updated += 1;
        }
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} listings processed ({} created, {} updated), {} pages, {} segments",
            self.listings_processed,
            self.listings_created,
            self.listings_updated,
            self.pages_scraped,
            self.segments_scraped
        )
    }
}
