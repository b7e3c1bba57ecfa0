//! Availability- and region-aware top-N ranking.
//!
//! Ordering, highest priority first:
//! 1. available items before unavailable ones,
//! 2. the score for the requested region (missing region scores 0),
//! 3. the total score,
//! 4. original relative order (the sort is stable).

use std::cmp::Ordering;

use crate::domain::item::{ItemSet, RelatedItem};
use crate::domain::region::Region;

/// Ranks by availability then total score and keeps the first `limit` items.
pub fn rank_by_count(items: ItemSet, limit: usize) -> ItemSet {
    rank(items, limit, None)
}

/// Ranks by availability, then the score for `location`, then total score,
/// and keeps the first `limit` items.
pub fn rank_by_location(items: ItemSet, limit: usize, location: &Region) -> ItemSet {
    rank(items, limit, Some(location))
}

fn rank(items: ItemSet, limit: usize, location: Option<&Region>) -> ItemSet {
    if limit == 0 {
        return ItemSet::new();
    }

    let mut items = items.into_vec();
    items.sort_by(|left, right| compare(left, right, location));
    items.truncate(limit);
    ItemSet::from(items)
}

fn compare(left: &RelatedItem, right: &RelatedItem, location: Option<&Region>) -> Ordering {
    right
        .available
        .cmp(&left.available)
        .then_with(|| match location {
            Some(region) => right
                .scores_by_region
                .score_for(region)
                .cmp(&left.scores_by_region.score_for(region)),
            None => Ordering::Equal,
        })
        .then_with(|| right.total_score.cmp(&left.total_score))
}
