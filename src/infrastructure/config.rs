//! Configuration loading and management
//!
//! Settings are layered: built-in defaults, an optional TOML file, then
//! `HARVEST_*` environment variables. Validation normalizes out-of-range
//! values instead of failing where a safe clamp exists.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::domain::listing::Operation;
use crate::infrastructure::dispatcher::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scraping: ScrapingConfig,
    #[serde(default)]
    pub filters: FilterConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scraping: ScrapingConfig::default(),
            filters: FilterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:data/harvester.db".to_string()
}

/// Fetch and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingConfig {
    /// Maximum concurrent page fetches. Clamped to 1..=20.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_requests_per_second")]
    pub max_requests_per_second: u32,
    /// Content marker that must appear in a fetched page body.
    #[serde(default)]
    pub wait_marker: Option<String>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_concurrency(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            request_timeout_seconds: default_timeout_seconds(),
            max_requests_per_second: default_requests_per_second(),
            wait_marker: None,
        }
    }
}

impl ScrapingConfig {
    pub fn dispatcher_config(&self) -> crate::infrastructure::dispatcher::DispatcherConfig {
        crate::infrastructure::dispatcher::DispatcherConfig {
            concurrency: self.max_concurrent_requests,
            max_retries: self.max_retries,
            base_delay: std::time::Duration::from_millis(self.base_delay_ms),
            max_delay: std::time::Duration::from_millis(self.max_delay_ms),
            wait_marker: self.wait_marker.clone(),
        }
    }

    pub fn http_fetcher_config(&self) -> crate::infrastructure::http_fetcher::HttpFetcherConfig {
        crate::infrastructure::http_fetcher::HttpFetcherConfig {
            timeout_seconds: self.request_timeout_seconds,
            max_requests_per_second: self.max_requests_per_second,
            follow_redirects: true,
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_requests_per_second() -> u32 {
    2
}

/// Which operations to harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationSelection {
    Buy,
    Rent,
    Both,
}

impl OperationSelection {
    pub fn operations(self) -> Vec<Operation> {
        match self {
            Self::Buy => vec![Operation::Buy],
            Self::Rent => vec![Operation::Rent],
            Self::Both => vec![Operation::Buy, Operation::Rent],
        }
    }
}

/// What to harvest: the cross product of locations, operations, and
/// property types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Location slugs as used in search URLs, e.g. "lisboa".
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default = "default_operations")]
    pub operations: OperationSelection,
    #[serde(default = "default_property_types")]
    pub property_types: Vec<String>,
    /// Optional starting upper price bound for the first segment.
    #[serde(default)]
    pub initial_max_price: Option<i64>,
    /// Prices at or below this floor are not harvested.
    #[serde(default)]
    pub min_price_floor: Option<i64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            locations: Vec::new(),
            operations: default_operations(),
            property_types: default_property_types(),
            initial_max_price: None,
            min_price_floor: None,
        }
    }
}

fn default_operations() -> OperationSelection {
    OperationSelection::Both
}

fn default_property_types() -> Vec<String> {
    vec!["casas".to_string()]
}

impl HarvestConfig {
    /// Load configuration from an optional TOML file plus `HARVEST_*`
    /// environment variables, then validate.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("HARVEST").separator("__"));

        let mut config: HarvestConfig = builder
            .build()
            .context("Failed to assemble configuration sources")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Normalize out-of-range values and reject unusable combinations.
    pub fn validate(&mut self) -> Result<()> {
        let requested = self.scraping.max_concurrent_requests;
        let clamped = requested.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        if clamped != requested {
            warn!(
                "max_concurrent_requests {} outside {}..={}, using {}",
                requested, MIN_CONCURRENCY, MAX_CONCURRENCY, clamped
            );
            self.scraping.max_concurrent_requests = clamped;
        }

        if self.scraping.base_delay_ms == 0 {
            anyhow::bail!("base_delay_ms must be greater than 0");
        }
        if self.scraping.max_delay_ms < self.scraping.base_delay_ms {
            anyhow::bail!("max_delay_ms must be at least base_delay_ms");
        }
        if self.scraping.max_requests_per_second == 0 {
            anyhow::bail!("max_requests_per_second must be greater than 0");
        }

        if self.filters.locations.is_empty() {
            anyhow::bail!("at least one location slug must be configured");
        }
        if self.filters.property_types.is_empty() {
            anyhow::bail!("at least one property type must be configured");
        }

        if let (Some(max), Some(floor)) = (
            self.filters.initial_max_price,
            self.filters.min_price_floor,
        ) {
            if max <= floor {
                anyhow::bail!("initial_max_price must be above min_price_floor");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> HarvestConfig {
        let mut config = HarvestConfig::default();
        config.filters.locations = vec!["lisboa".to_string()];
        config
    }

    #[test]
    fn defaults_are_sane() {
        let config = HarvestConfig::default();
        assert_eq!(config.scraping.max_concurrent_requests, 5);
        assert_eq!(config.scraping.max_retries, 3);
        assert_eq!(config.filters.operations, OperationSelection::Both);
    }

    #[test]
    fn concurrency_is_clamped_not_rejected() {
        let mut config = valid_config();
        config.scraping.max_concurrent_requests = 500;
        config.validate().unwrap();
        assert_eq!(config.scraping.max_concurrent_requests, 20);

        config.scraping.max_concurrent_requests = 0;
        config.validate().unwrap();
        assert_eq!(config.scraping.max_concurrent_requests, 1);
    }

    #[test]
    fn empty_locations_are_rejected() {
        let mut config = HarvestConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn price_bounds_must_be_ordered() {
        let mut config = valid_config();
        config.filters.initial_max_price = Some(100_000);
        config.filters.min_price_floor = Some(200_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn operation_selection_expands() {
        assert_eq!(OperationSelection::Buy.operations(), vec![Operation::Buy]);
        assert_eq!(
            OperationSelection::Both.operations(),
            vec![Operation::Buy, Operation::Rent]
        );
    }

    #[test]
    fn load_from_toml_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("harvest.toml");
        std::fs::write(
            &path,
            r#"
[scraping]
max_concurrent_requests = 8

[filters]
locations = ["porto", "braga"]
operations = "rent"
initial_max_price = 900000
"#,
        )?;

        let config = HarvestConfig::load(Some(&path))?;
        assert_eq!(config.scraping.max_concurrent_requests, 8);
        assert_eq!(config.filters.locations, vec!["porto", "braga"]);
        assert_eq!(config.filters.operations, OperationSelection::Rent);
        assert_eq!(config.filters.initial_max_price, Some(900_000));
        Ok(())
    }
}
