//! Merge/upsert engine
//!
//! Applies extracted listing records to the store. A record either creates
//! a listing (first sighting) or updates the existing row; a price change
//! additionally appends one history entry carrying the prior price. Fields
//! never regress: an update missing a previously-captured optional field
//! keeps the stored value, while the price always follows the newest
//! sighting because "price on request" is itself a real state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::domain::listing::{Listing, ListingHistoryEntry, ListingRecord};
use crate::domain::repositories::ListingRepository;
use crate::domain::stats::RunStats;

static TYPOLOGY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^t\d+\+?$").unwrap());
static AREA: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\d.,]+)\s*m²").unwrap());
static BEDROOMS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*quarto").unwrap());

/// Structured attributes recovered from a card's raw detail fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDetails {
    pub typology: Option<String>,
    pub area_gross: Option<f64>,
    pub bedrooms: Option<i64>,
}

/// Interpret raw detail fragments such as `["T3", "110 m²", "3 quartos"]`.
/// Unrecognized fragments are left for the raw_data blob.
pub fn parse_details(details_raw: &[String]) -> ParsedDetails {
    let mut parsed = ParsedDetails::default();
    for fragment in details_raw {
        let fragment = fragment.trim();
        if parsed.typology.is_none() && TYPOLOGY.is_match(fragment) {
            parsed.typology = Some(fragment.to_uppercase());
            continue;
        }
        if parsed.area_gross.is_none() {
            if let Some(caps) = AREA.captures(fragment) {
                parsed.area_gross = parse_pt_number(&caps[1]);
                continue;
            }
        }
        if parsed.bedrooms.is_none() {
            if let Some(caps) = BEDROOMS.captures(fragment) {
                parsed.bedrooms = caps[1].parse().ok();
            }
        }
    }
    parsed
}

/// Parse a number in Portuguese formatting: `.` groups thousands, `,` is
/// the decimal separator.
fn parse_pt_number(raw: &str) -> Option<f64> {
    raw.replace('.', "").replace(',', ".").parse().ok()
}

/// Upserts extracted records into the listing store.
///
/// Driven only from the sequential merge path; the location cache and the
/// stats it touches are deliberately not synchronized.
pub struct MergeEngine {
    store: Arc<dyn ListingRepository>,
    location_cache: HashMap<String, Option<i64>>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn ListingRepository>) -> Self {
        Self {
            store,
            location_cache: HashMap::new(),
        }
    }

    /// Apply one extracted record, observed at `seen_at` while sweeping
    /// `location_slug`. Returns whether a new listing row was created.
    pub async fn merge_record(
        &mut self,
        record: &ListingRecord,
        location_slug: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<bool> {
        let location_id = self.resolve_location(location_slug).await?;

        match self.store.find_by_external_id(record.external_id).await? {
            None => {
                let listing = new_listing(record, location_id, seen_at);
                self.store
                    .insert_listing(&listing)
                    .await
                    .with_context(|| format!("inserting listing {}", record.external_id))?;
                debug!("Created listing {}", record.external_id);
                Ok(true)
            }
            Some(existing) => {
                if existing.price != record.price {
                    let entry = ListingHistoryEntry {
                        listing_id: existing.id,
                        price: existing.price,
                        scraped_at: seen_at,
                        changes: Some(
                            json!({
                                "price": { "old": existing.price, "new": record.price }
                            })
                            .to_string(),
                        ),
                    };
                    self.store.append_history(&entry).await?;
                    debug!(
                        "Price change for listing {}: {:?} -> {:?}",
                        record.external_id, existing.price, record.price
                    );
                }

                let updated = overlay_listing(&existing, record, location_id, seen_at);
                self.store
                    .update_listing(&updated)
                    .await
                    .with_context(|| format!("updating listing {}", record.external_id))?;
                Ok(false)
            }
        }
    }

    /// Merge a whole page of records, updating run counters.
    pub async fn merge_page(
        &mut self,
        records: &[ListingRecord],
        location_slug: &str,
        seen_at: DateTime<Utc>,
        stats: &mut RunStats,
    ) -> Result<()> {
        for record in records {
            let created = self.merge_record(record, location_slug, seen_at).await?;
            stats.record_merge(created);
        }
        Ok(())
    }

    async fn resolve_location(&mut self, slug: &str) -> Result<Option<i64>> {
        if let Some(cached) = self.location_cache.get(slug) {
            return Ok(*cached);
        }
        let id = self
            .store
            .find_location_by_slug(slug)
            .await?
            .map(|loc| loc.id);
        self.location_cache.insert(slug.to_string(), id);
        Ok(id)
    }
}

fn new_listing(
    record: &ListingRecord,
    location_id: Option<i64>,
    seen_at: DateTime<Utc>,
) -> Listing {
    let details = parse_details(&record.details_raw);
    Listing {
        id: 0,
        external_id: record.external_id,
        location_id,
        operation: record.operation,
        property_type: record.property_type.clone(),
        url: record.url.clone(),
        title: Some(record.title.clone()),
        price: record.price,
        typology: details.typology,
        area_gross: details.area_gross,
        bedrooms: details.bedrooms,
        agency_name: record.agency_name.clone(),
        agency_url: record.agency_url.clone(),
        image_url: record.image_url.clone(),
        tags: join_tags(&record.tags),
        description: record.description.clone(),
        raw_data: raw_data_blob(record),
        first_seen: seen_at,
        last_seen: seen_at,
        is_active: true,
    }
}

/// Existing row overlaid with the newest sighting. Optional fields keep
/// their stored value when the new record lacks them; the price is always
/// taken from the record.
fn overlay_listing(
    existing: &Listing,
    record: &ListingRecord,
    location_id: Option<i64>,
    seen_at: DateTime<Utc>,
) -> Listing {
    let details = parse_details(&record.details_raw);
    Listing {
        id: existing.id,
        external_id: existing.external_id,
        location_id: location_id.or(existing.location_id),
        operation: record.operation,
        property_type: record.property_type.clone(),
        url: record.url.clone(),
        title: Some(record.title.clone()),
        price: record.price,
        typology: details.typology.or_else(|| existing.typology.clone()),
        area_gross: details.area_gross.or(existing.area_gross),
        bedrooms: details.bedrooms.or(existing.bedrooms),
        agency_name: record
            .agency_name
            .clone()
            .or_else(|| existing.agency_name.clone()),
        agency_url: record
            .agency_url
            .clone()
            .or_else(|| existing.agency_url.clone()),
        image_url: record
            .image_url
            .clone()
            .or_else(|| existing.image_url.clone()),
        tags: join_tags(&record.tags).or_else(|| existing.tags.clone()),
        description: record
            .description
            .clone()
            .or_else(|| existing.description.clone()),
        raw_data: raw_data_blob(record).or_else(|| existing.raw_data.clone()),
        first_seen: existing.first_seen,
        last_seen: seen_at,
        is_active: true,
    }
}

fn join_tags(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(","))
    }
}

fn raw_data_blob(record: &ListingRecord) -> Option<String> {
    if record.details_raw.is_empty() {
        None
    } else {
        serde_json::to_string(&record.details_raw).ok()
    }
}
