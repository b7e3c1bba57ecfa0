//! Parser for computed-result partition files.
//!
//! Each line carries one product's signals as a JSON object embedded in a
//! tuple, e.g. `(P1,{"productId":"P1",...})`. The payload runs from the first
//! `{` up to, not including, the last `)` on the line. Lines without such a
//! payload are ignored; lines whose payload does not decode are logged and
//! skipped.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::Deserialize;
use tracing::{trace, warn};

use relatedrec_core::domain::item::{ItemRole, ItemSet, RelatedItem};
use relatedrec_core::domain::product::ProductId;
use relatedrec_core::domain::record::RecommendationRecord;
use relatedrec_core::domain::region::{RegionScore, RegionScoreSet};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedPartition {
    pub records: HashMap<ProductId, RecommendationRecord>,
    pub lines: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProduct {
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    num_of_purchase: u64,
    #[serde(default)]
    bought_together_items: Option<Vec<WireItem>>,
    #[serde(default)]
    also_viewed_items: Option<Vec<WireItem>>,
    #[serde(default)]
    sales_by_region: Option<Vec<WireRegionScore>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireItem {
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    total_score: u64,
    #[serde(default)]
    score_by_region: Option<Vec<WireRegionScore>>,
}

#[derive(Debug, Deserialize)]
struct WireRegionScore {
    #[serde(rename = "Region", alias = "region", default)]
    region: Option<String>,
    #[serde(rename = "Score", alias = "score", default)]
    score: u64,
}

fn region_scores(raw: Option<Vec<WireRegionScore>>) -> RegionScoreSet {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            let region = entry.region.filter(|region| !region.trim().is_empty())?;
            Some(RegionScore::new(region, entry.score))
        })
        .collect()
}

fn item_set(raw: Option<Vec<WireItem>>, role: ItemRole) -> ItemSet {
    raw.unwrap_or_default()
        .into_iter()
        .filter(|item| !item.product_id.is_empty())
        .map(|item| RelatedItem {
            product_id: ProductId(item.product_id),
            role,
            total_score: item.total_score,
            scores_by_region: region_scores(item.score_by_region),
            product_name: item.product_name,
            image_url: item.image_url,
            ..RelatedItem::default()
        })
        .collect()
}

impl From<WireProduct> for RecommendationRecord {
    fn from(wire: WireProduct) -> Self {
        RecommendationRecord {
            product_id: ProductId(wire.product_id),
            num_of_purchases: wire.num_of_purchase,
            co_purchased: item_set(wire.bought_together_items, ItemRole::CoPurchased),
            co_viewed: item_set(wire.also_viewed_items, ItemRole::CoViewed),
            sales_by_region: region_scores(wire.sales_by_region),
            ..RecommendationRecord::default()
        }
    }
}

fn payload(line: &str) -> Option<&str> {
    let start = line.find('{')?;
    let end = line.rfind(')')?;
    (end > start).then(|| &line[start..end])
}

/// Parses one partition. A product that appears on several lines is folded
/// additively.
pub fn parse_partition(content: &str) -> ParsedPartition {
    let mut parsed = ParsedPartition::default();

    for (index, line) in content.lines().enumerate() {
        let Some(json) = payload(line) else {
            continue;
        };
        parsed.lines += 1;

        let wire = match serde_json::from_str::<WireProduct>(json) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(
                    event_name = "ingest.partition.line_skipped",
                    line = index + 1,
                    error = %err,
                    "could not decode partition line"
                );
                parsed.skipped += 1;
                continue;
            }
        };
        if wire.product_id.trim().is_empty() {
            warn!(
                event_name = "ingest.partition.line_skipped",
                line = index + 1,
                "partition line has no productId"
            );
            parsed.skipped += 1;
            continue;
        }

        let record = RecommendationRecord::from(wire);
        trace!(product_id = %record.product_id, "parsed partition line");
        match parsed.records.entry(record.product_id.clone()) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(&record),
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    parsed
}
