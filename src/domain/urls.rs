//! Deterministic search-URL construction
//!
//! Pure functions producing one URL per (window, page) pair. The planner
//! consumes these as a black box; nothing here talks to the network.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::listing::Operation;
use crate::domain::segment::PriceSegment;

/// Base URL of the target site.
pub const SITE_BASE_URL: &str = "https://www.idealista.pt";

/// Sort order that makes price segmentation work: descending by price.
pub const ORDER_PRICE_DESC: &str = "precos-desc";

static PAGE_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"pagina=\d+").expect("valid regex"));

/// Build a search URL for one price window.
///
/// Path shape: `/{operation}-{property_type}/{location}/` with price
/// filters, sort order and pagination carried as query parameters.
pub fn build_search_url(
    location_slug: &str,
    operation: Operation,
    property_type: &str,
    max_price: Option<i64>,
    min_price: Option<i64>,
    order: Option<&str>,
) -> String {
    let mut params: Vec<String> = Vec::new();
    if let Some(max) = max_price {
        params.push(format!("maxPrice={max}"));
    }
    if let Some(min) = min_price {
        params.push(format!("minPrice={min}"));
    }
    if let Some(order) = order {
        params.push(format!("ordem={order}"));
    }

    let mut url = format!(
        "{SITE_BASE_URL}/{}-{property_type}/{location_slug}/",
        operation.as_slug()
    );
    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.join("&"));
    }
    url
}

/// Search URL for a whole segment, sorted descending by price.
pub fn segment_search_url(segment: &PriceSegment) -> String {
    build_search_url(
        &segment.location_slug,
        segment.operation,
        &segment.property_type,
        segment.max_price,
        segment.min_price,
        Some(ORDER_PRICE_DESC),
    )
}

/// Add or replace the pagination parameter on an existing search URL.
/// Page 1 is the bare URL.
pub fn build_paginated_url(base_url: &str, page: u32) -> String {
    if page <= 1 {
        return base_url.to_string();
    }
    if base_url.contains('?') {
        if base_url.contains("pagina=") {
            return PAGE_PARAM
                .replace(base_url, format!("pagina={page}"))
                .into_owned();
        }
        return format!("{base_url}&pagina={page}");
    }
    format!("{base_url}?pagina={page}")
}

/// Normalize a listing URL to absolute form.
pub fn normalize_listing_url(url: &str) -> String {
    if url.starts_with("http") {
        return url.to_string();
    }
    format!("{SITE_BASE_URL}{url}")
}
