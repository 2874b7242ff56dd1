//! Domain entities for harvested real-estate listings
//!
//! Contains the ephemeral pipeline types produced by the extractor as well
//! as the persisted entities owned by the merge engine and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation a search query targets. Serialized as the site's URL slugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "comprar")]
    Buy,
    #[serde(rename = "arrendar")]
    Rent,
}

impl Operation {
    /// URL path slug used by the target site.
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Buy => "comprar",
            Self::Rent => "arrendar",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_slug())
    }
}

impl std::str::FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comprar" => Ok(Self::Buy),
            "arrendar" => Ok(Self::Rent),
            other => Err(anyhow::anyhow!("unknown operation slug: {other}")),
        }
    }
}

/// Cover data for one listing as extracted from a search-results page.
///
/// Ephemeral: lives only between extraction and merge. Optional fields stay
/// `None` when the card omits them; the merge engine never lets a `None`
/// here erase richer previously-captured data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Stable site-assigned identifier.
    pub external_id: i64,
    pub url: String,
    pub title: String,
    /// `None` for "price on request" listings.
    pub price: Option<i64>,
    pub operation: Operation,
    pub property_type: String,
    pub summary_location: Option<String>,
    /// Raw detail fragments, e.g. `["T3", "110 m²"]`.
    pub details_raw: Vec<String>,
    pub description: Option<String>,
    pub agency_name: Option<String>,
    pub agency_url: Option<String>,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
}

/// Metadata extracted from one search-results page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMetadata {
    /// Total result count for the active price window.
    pub total_count: u32,
    /// Current page number (1-based).
    pub page: u32,
    pub has_next_page: bool,
    /// Last reachable page number, capped at the site's visible-page ceiling.
    pub last_page: Option<u32>,
    /// Lowest price among this page's priced records.
    pub lowest_price_on_page: Option<i64>,
}

/// A persisted real-estate listing.
///
/// Created on first sighting, updated on every re-sighting, never
/// hard-deleted: staleness is expressed via `is_active` / `last_seen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub external_id: i64,
    pub location_id: Option<i64>,
    pub operation: Operation,
    pub property_type: String,
    pub url: String,
    pub title: Option<String>,
    pub price: Option<i64>,
    pub typology: Option<String>,
    pub area_gross: Option<f64>,
    pub bedrooms: Option<i64>,
    pub agency_name: Option<String>,
    pub agency_url: Option<String>,
    pub image_url: Option<String>,
    /// Comma-separated tag list.
    pub tags: Option<String>,
    pub description: Option<String>,
    /// JSON blob carrying raw fragments that have no dedicated column yet.
    pub raw_data: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

/// Append-only history entry, written once per price-changing observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingHistoryEntry {
    pub listing_id: i64,
    /// Price at the time of the prior observation.
    pub price: Option<i64>,
    pub scraped_at: DateTime<Utc>,
    /// JSON description of what changed.
    pub changes: Option<String>,
}

/// A geographic lookup entry keyed by the location slug used in search URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Lifecycle status of a crawl run row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlRunStatus {
    Running,
    Success,
    Failed,
}

impl CrawlRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}
