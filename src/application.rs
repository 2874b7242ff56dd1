//! Application layer: merge/upsert and crawl orchestration

pub mod merge;
pub mod orchestrator;

pub use merge::MergeEngine;
pub use orchestrator::{CrawlOrchestrator, RunSummary};
