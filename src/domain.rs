//! Domain module - core entities and crawl-control logic
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod extract;
pub mod fetch;
pub mod listing;
pub mod repositories;
pub mod segment;
pub mod stats;
pub mod urls;

// Re-export commonly used items for convenience
pub use extract::{ExtractError, ListingExtractor};
pub use fetch::{FetchError, PageFetcher};
pub use listing::{
    CrawlRunStatus, Listing, ListingHistoryEntry, ListingRecord, Location, Operation, PageMetadata,
};
pub use repositories::{CrawlRunRepository, ListingRepository};
pub use segment::{PriceSegment, SegmentOutcome, SegmentPlanner, PAGE_CEILING};
pub use stats::RunStats;
