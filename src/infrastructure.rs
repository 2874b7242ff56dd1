//! Infrastructure layer for database access, fetching, and configuration

pub mod config;
pub mod database;
pub mod dispatcher;
pub mod http_fetcher;
pub mod logging;
pub mod repository;

// Re-export commonly used items
pub use config::{
    DatabaseConfig, FilterConfig, HarvestConfig, OperationSelection, ScrapingConfig,
};
pub use database::DatabaseConnection;
pub use dispatcher::{DispatcherConfig, FetchDispatcher, PageFetch};
pub use http_fetcher::{HttpFetcherConfig, HttpPageFetcher};
pub use logging::init_logging;
pub use repository::SqliteListingRepository;
