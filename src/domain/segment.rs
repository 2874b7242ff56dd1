//! Price segmentation for defeating the visible-page ceiling
//!
//! A search query only exposes a bounded number of result pages. When a
//! price window still has results beyond that ceiling, the window is
//! subdivided: the next window's upper bound becomes the lowest price
//! observed on the last reachable page, the lower bound is inherited. Upper
//! bounds strictly decrease across subdivisions, which is the termination
//! argument.

use serde::{Deserialize, Serialize};

use crate::domain::listing::Operation;

/// Maximum page index the search UI exposes per query.
pub const PAGE_CEILING: u32 = 60;

/// One contiguous price window of a (location, operation, property type)
/// query. Bounds are inclusive; either may be unset. Created fresh for
/// every subdivision, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSegment {
    pub location_slug: String,
    pub operation: Operation,
    pub property_type: String,
    pub max_price: Option<i64>,
    pub min_price: Option<i64>,
}

impl PriceSegment {
    pub fn new(
        location_slug: impl Into<String>,
        operation: Operation,
        property_type: impl Into<String>,
        max_price: Option<i64>,
        min_price: Option<i64>,
    ) -> Self {
        if let (Some(min), Some(max)) = (min_price, max_price) {
            debug_assert!(min < max, "segment bounds inverted: {min} >= {max}");
        }
        Self {
            location_slug: location_slug.into(),
            operation,
            property_type: property_type.into(),
            max_price,
            min_price,
        }
    }
}

impl std::fmt::Display for PriceSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.location_slug, self.operation, self.property_type
        )?;
        if self.min_price.is_some() || self.max_price.is_some() {
            let min = self
                .min_price
                .map_or_else(|| "0".to_string(), |p| p.to_string());
            let max = self
                .max_price
                .map_or_else(|| "∞".to_string(), |p| p.to_string());
            write!(f, " [{min}€ - {max}€]")?;
        }
        Ok(())
    }
}

/// What the orchestrator observed while paginating one window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentOutcome {
    /// Pages successfully fetched and merged.
    pub pages_fetched: u32,
    /// Whether the window's last reachable page sat at the ceiling, i.e.
    /// more results exist beyond what pagination exposes.
    pub reached_ceiling: bool,
    /// Lowest price observed across the window's pages.
    pub lowest_price_seen: Option<i64>,
}

/// Decides the first price window for a query tuple and whether (and how)
/// a window must be subdivided after it has been paginated.
#[derive(Debug, Clone)]
pub struct SegmentPlanner {
    page_ceiling: u32,
}

impl Default for SegmentPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentPlanner {
    pub fn new() -> Self {
        Self {
            page_ceiling: PAGE_CEILING,
        }
    }

    /// Planner with a non-standard ceiling. The production ceiling is
    /// [`PAGE_CEILING`]; smaller values keep synthetic datasets manageable.
    pub fn with_ceiling(page_ceiling: u32) -> Self {
        Self { page_ceiling }
    }

    pub fn page_ceiling(&self) -> u32 {
        self.page_ceiling
    }

    /// First window of a sweep: the configured price filters, unmodified.
    pub fn first_segment(
        &self,
        location_slug: &str,
        operation: Operation,
        property_type: &str,
        min_price: Option<i64>,
        max_price: Option<i64>,
    ) -> PriceSegment {
        PriceSegment::new(location_slug, operation, property_type, max_price, min_price)
    }

    /// Next window after `current` has been fully paginated, or `None` when
    /// the sweep for this tuple is complete.
    ///
    /// The new upper bound is the lowest price observed in the current
    /// window. Because both the site's price filter and the window bounds
    /// are inclusive, a listing sitting exactly on the boundary is fetched
    /// again in the next window and deduplicated by the upsert; the bound
    /// itself must still strictly decrease. When every listing in a window
    /// shares one price the observed lowest equals the current upper bound,
    /// so it is clamped one unit below it to rule out refetching the same
    /// boundary forever.
    pub fn next_segment(
        &self,
        current: &PriceSegment,
        outcome: &SegmentOutcome,
    ) -> Option<PriceSegment> {
        if !outcome.reached_ceiling {
            return None;
        }
        // A window with zero priced results cannot be subdivided further.
        let lowest = outcome.lowest_price_seen?;

        let mut next_max = lowest;
        if let Some(current_max) = current.max_price {
            if next_max >= current_max {
                next_max = current_max - 1;
            }
        }
        if next_max <= 0 {
            return None;
        }
        if let Some(floor) = current.min_price {
            if next_max <= floor {
                return None;
            }
        }

        Some(PriceSegment::new(
            current.location_slug.clone(),
            current.operation,
            current.property_type.clone(),
            Some(next_max),
            current.min_price,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn planner() -> SegmentPlanner {
        SegmentPlanner::with_ceiling(5)
    }

    fn segment(max: Option<i64>, min: Option<i64>) -> PriceSegment {
        PriceSegment::new("cascais", Operation::Buy, "casas", max, min)
    }

    #[test]
    fn first_segment_carries_configured_filters() {
        let seg = planner().first_segment("cascais", Operation::Buy, "casas", Some(100), Some(900_000));
        assert_eq!(seg.min_price, Some(100));
        assert_eq!(seg.max_price, Some(900_000));
        assert_eq!(seg.location_slug, "cascais");
    }

    #[test]
    fn no_subdivision_when_window_fit_under_ceiling() {
        let outcome = SegmentOutcome {
            pages_fetched: 3,
            reached_ceiling: false,
            lowest_price_seen: Some(250_000),
        };
        assert!(planner().next_segment(&segment(None, None), &outcome).is_none());
    }

    #[test]
    fn subdivision_uses_lowest_observed_price_as_new_upper_bound() {
        let outcome = SegmentOutcome {
            pages_fetched: 5,
            reached_ceiling: true,
            lowest_price_seen: Some(320_000),
        };
        let next = planner()
            .next_segment(&segment(Some(900_000), Some(50_000)), &outcome)
            .unwrap();
        assert_eq!(next.max_price, Some(320_000));
        // Lower bound inherited unchanged.
        assert_eq!(next.min_price, Some(50_000));
    }

    #[test]
    fn upper_bound_strictly_decreases_when_boundary_price_repeats() {
        // Whole window at one price: observed lowest equals the current cap.
        let outcome = SegmentOutcome {
            pages_fetched: 5,
            reached_ceiling: true,
            lowest_price_seen: Some(500_000),
        };
        let next = planner()
            .next_segment(&segment(Some(500_000), None), &outcome)
            .unwrap();
        assert_eq!(next.max_price, Some(499_999));
    }

    #[test]
    fn subdivision_stops_at_configured_floor() {
        let outcome = SegmentOutcome {
            pages_fetched: 5,
            reached_ceiling: true,
            lowest_price_seen: Some(100_000),
        };
        assert!(planner()
            .next_segment(&segment(Some(300_000), Some(100_000)), &outcome)
            .is_none());
    }

    #[test]
    fn zero_priced_results_ends_the_sweep() {
        let outcome = SegmentOutcome {
            pages_fetched: 5,
            reached_ceiling: true,
            lowest_price_seen: None,
        };
        assert!(planner().next_segment(&segment(None, None), &outcome).is_none());
    }

    /// Simulate paginating one window of a descending-sorted price list:
    /// returns (listings reachable in the window, outcome as observed).
    fn paginate(
        prices: &[i64],
        seg: &PriceSegment,
        page_size: usize,
        ceiling: u32,
    ) -> (Vec<i64>, SegmentOutcome) {
        let in_window: Vec<i64> = prices
            .iter()
            .copied()
            .filter(|p| seg.max_price.is_none_or(|m| *p <= m))
            .filter(|p| seg.min_price.is_none_or(|m| *p >= m))
            .collect();
        let visible = ceiling as usize * page_size;
        let reachable: Vec<i64> = in_window.iter().copied().take(visible).collect();
        let total_pages = in_window.len().div_ceil(page_size);
        let outcome = SegmentOutcome {
            pages_fetched: reachable.len().div_ceil(page_size) as u32,
            reached_ceiling: total_pages >= ceiling as usize,
            lowest_price_seen: reachable.last().copied(),
        };
        (reachable, outcome)
    }

    proptest! {
        /// For any synthetic result set larger than the page ceiling,
        /// repeated subdivision terminates and collectively covers every
        /// listing, including ones sharing a boundary price.
        #[test]
        fn segmentation_terminates_and_covers_all_prices(
            mut prices in prop::collection::vec(1_i64..50_000, 1..2_000),
            page_size in 1_usize..40,
        ) {
            let ceiling = 5_u32;
            prices.sort_unstable_by(|a, b| b.cmp(a));

            let planner = SegmentPlanner::with_ceiling(ceiling);
            let mut seg = planner.first_segment("x", Operation::Buy, "casas", None, None);
            let mut covered: Vec<i64> = Vec::new();
            let mut windows = 0_u32;
            let mut prev_upper: Option<i64> = None;

            loop {
                windows += 1;
                prop_assert!(windows <= 60_000, "planner failed to terminate");

                if let Some(upper) = seg.max_price {
                    if let Some(prev) = prev_upper {
                        prop_assert!(upper < prev, "upper bound did not strictly decrease");
                    }
                    prev_upper = Some(upper);
                }

                let (reachable, outcome) = paginate(&prices, &seg, page_size, ceiling);
                covered.extend(reachable);

                match planner.next_segment(&seg, &outcome) {
                    Some(next) => seg = next,
                    None => break,
                }
            }

            // Every listing reachable at least once, across all windows.
            let mut expected = prices.clone();
            expected.sort_unstable();
            covered.sort_unstable();
            covered.dedup();
            expected.dedup();
            prop_assert_eq!(covered, expected);
        }
    }
}
