//! Imovel Harvester - incremental real-estate listings crawler
//!
//! Harvests listing cover data from a paginated search-results site that
//! caps the number of reachable pages per query. The page-count ceiling is
//! defeated by price-range subdivision; pages are fetched concurrently under
//! a bounded-parallelism policy with retry/backoff, and merged into a
//! durable store with idempotent upsert and change-history semantics.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export the main entry points for convenience
pub use application::orchestrator::CrawlOrchestrator;
pub use domain::segment::{PriceSegment, SegmentPlanner};
pub use infrastructure::config::HarvestConfig;
