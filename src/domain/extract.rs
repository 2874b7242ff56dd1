//! Extraction boundary
//!
//! Converting a search-results page's markup into typed records is a pure
//! function owned by a collaborator outside this crate's core; selector
//! design does not live here. The trait below is the seam the orchestrator
//! calls through.

use thiserror::Error;

use crate::domain::listing::{ListingRecord, Operation, PageMetadata};

/// Failure to turn markup into records.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("listings page markup not recognized: {0}")]
    Malformed(String),

    #[error("page metadata missing or inconsistent: {0}")]
    MetadataMissing(String),
}

/// Pure markup-to-records conversion for one search-results page.
///
/// Implementations must tolerate missing optional fields by returning
/// `None`s inside [`ListingRecord`] rather than failing the whole page.
pub trait ListingExtractor: Send + Sync {
    fn extract(
        &self,
        html: &str,
        operation: Operation,
        property_type: &str,
    ) -> Result<(Vec<ListingRecord>, PageMetadata), ExtractError>;
}
