//! Blends co-viewed and co-purchased signals with catalog metadata into the
//! lists served for one anchor product.
//!
//! Blending happens in two phases so the caller can do the catalog I/O in
//! between: [`BlendingEngine::prepare`] trims the raw signal sets and reports
//! which product ids need metadata, then [`BlendingEngine::blend`] produces the
//! final bounded lists from a read-only [`CatalogLookup`].

use std::collections::HashSet;

use tracing::debug;

use crate::domain::catalog::{CatalogLookup, CatalogProduct, DEFAULT_CURRENCY};
use crate::domain::customer::Customer;
use crate::domain::item::{ItemRole, ItemSet, RelatedItem};
use crate::domain::product::ProductId;
use crate::domain::record::RecommendationRecord;
use crate::domain::region::Region;
use crate::ranking::{rank_by_count, rank_by_location};

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_SIGNIFICANCE_FLOOR: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecommendationRequest {
    pub product_id: ProductId,
    pub limit: usize,
    pub location: Option<Region>,
    pub customer_id: Option<String>,
    pub currency: String,
}

impl RecommendationRequest {
    pub fn new(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            limit: DEFAULT_LIMIT,
            location: None,
            customer_id: None,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_location(mut self, location: Region) -> Self {
        self.location = Some(location);
        self
    }
}

/// Gate for candidates outside the anchor's category: only scores at or
/// above `floor` are admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignificancePolicy {
    pub floor: u64,
}

impl Default for SignificancePolicy {
    fn default() -> Self {
        Self { floor: DEFAULT_SIGNIFICANCE_FLOOR }
    }
}

impl SignificancePolicy {
    pub fn is_significant(&self, item: &RelatedItem) -> bool {
        item.total_score >= self.floor
    }
}

/// A record trimmed for one request, waiting for catalog metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedRecommendation {
    record: RecommendationRecord,
    request: RecommendationRequest,
}

impl PreparedRecommendation {
    pub fn record(&self) -> &RecommendationRecord {
        &self.record
    }

    pub fn request(&self) -> &RecommendationRequest {
        &self.request
    }

    /// Anchor first, then co-viewed, then co-purchased ids, without repeats.
    pub fn candidate_ids(&self) -> Vec<ProductId> {
        let mut seen = HashSet::new();
        std::iter::once(&self.record.product_id)
            .chain(self.record.co_viewed.iter().map(|item| &item.product_id))
            .chain(self.record.co_purchased.iter().map(|item| &item.product_id))
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect()
    }

    /// Catalog-declared similar items of the anchor, for the second lookup round.
    pub fn similar_ids(&self, catalog: &dyn CatalogLookup) -> Vec<ProductId> {
        catalog
            .product(&self.record.product_id)
            .map(|anchor| anchor.similar_item_ids.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlendingEngine {
    significance: SignificancePolicy,
}

impl BlendingEngine {
    pub fn new(significance: SignificancePolicy) -> Self {
        Self { significance }
    }

    /// Removes the anchor from its own signals and keeps the top `2 × limit`
    /// candidates of each signal set by total score.
    pub fn prepare(
        &self,
        mut record: RecommendationRecord,
        request: RecommendationRequest,
    ) -> PreparedRecommendation {
        record.remove_self();
        let candidates = request.limit.saturating_mul(2);
        record.co_viewed = rank_by_count(std::mem::take(&mut record.co_viewed), candidates);
        record.co_purchased = rank_by_count(std::mem::take(&mut record.co_purchased), candidates);
        record.best_sellers = ItemSet::new();
        record.picked_for_you = ItemSet::new();

        PreparedRecommendation { record, request }
    }

    /// Produces the final lists. `catalog` must hold the anchor, its
    /// candidates and its similar items; ids it cannot resolve count as
    /// unavailable.
    pub fn blend(
        &self,
        prepared: PreparedRecommendation,
        catalog: &dyn CatalogLookup,
        customer: Option<&Customer>,
    ) -> RecommendationRecord {
        let PreparedRecommendation { mut record, request } = prepared;
        let colors: &[String] = customer.map(|c| c.color_prefs.as_slice()).unwrap_or(&[]);

        let anchor = catalog.product(&record.product_id);
        if let Some(anchor) = anchor {
            record.image_url = anchor.preferred_image(colors).to_string();
            record.parent_category = anchor.parent_category.clone();
            record.sales_by_region = anchor.sales_by_region.clone();
            record.num_of_purchases = anchor.num_of_purchases;
        }

        enrich(&mut record.co_viewed, catalog, colors, &request.currency);
        enrich(&mut record.co_purchased, catalog, colors, &request.currency);

        let best_sellers = match anchor {
            Some(anchor) => best_sellers(anchor, catalog, colors, &request),
            None => ItemSet::new(),
        };
        double_overlap(&mut record);
        let picked_for_you = self.picked_for_you(&record, &best_sellers, &request);

        record.co_purchased = rank_for(std::mem::take(&mut record.co_purchased), &request);
        record.co_purchased.remove_duplicates();
        record.co_viewed = rank_for(std::mem::take(&mut record.co_viewed), &request);
        record.co_viewed.remove_duplicates();
        record.best_sellers = best_sellers;
        record.picked_for_you = picked_for_you;

        debug!(
            event_name = "engine.blend.completed",
            product_id = %record.product_id,
            co_viewed = record.co_viewed.len(),
            co_purchased = record.co_purchased.len(),
            best_sellers = record.best_sellers.len(),
            picked_for_you = record.picked_for_you.len(),
            "recommendation blended"
        );
        record
    }

    /// Single-shot form of [`prepare`](Self::prepare) followed by [`blend`](Self::blend).
    pub fn recommend(
        &self,
        record: RecommendationRecord,
        request: RecommendationRequest,
        catalog: &dyn CatalogLookup,
        customer: Option<&Customer>,
    ) -> RecommendationRecord {
        let prepared = self.prepare(record, request);
        self.blend(prepared, catalog, customer)
    }

    fn picked_for_you(
        &self,
        record: &RecommendationRecord,
        best_sellers: &ItemSet,
        request: &RecommendationRequest,
    ) -> ItemSet {
        let same_category = |item: &RelatedItem| item.parent_category == record.parent_category;
        let mut candidates = ItemSet::new();

        for viewed in &record.co_viewed {
            if viewed.role == ItemRole::Picked {
                candidates.push(viewed.clone());
            } else if same_category(viewed) || self.significance.is_significant(viewed) {
                candidates.push(viewed.clone());
            }
        }

        for bought in &record.co_purchased {
            if candidates.contains(&bought.product_id) {
                continue;
            }
            if same_category(bought) || self.significance.is_significant(bought) {
                candidates.push(bought.clone());
            }
        }

        let available: ItemSet =
            candidates.into_iter().filter(|item| item.available).collect::<Vec<_>>().into();
        let mut picked = rank_for(available, request);

        for seller in best_sellers {
            if picked.len() >= request.limit {
                break;
            }
            if !picked.contains(&seller.product_id) {
                picked.push(seller.clone());
            }
        }
        picked
    }
}

fn rank_for(items: ItemSet, request: &RecommendationRequest) -> ItemSet {
    match &request.location {
        Some(location) => rank_by_location(items, request.limit, location),
        None => rank_by_count(items, request.limit),
    }
}

/// Copies catalog metadata onto each item; items without a catalog row are unavailable.
fn enrich(items: &mut ItemSet, catalog: &dyn CatalogLookup, colors: &[String], currency: &str) {
    for item in items.iter_mut() {
        match catalog.product(&item.product_id) {
            Some(product) => {
                item.product_name = product.name.clone();
                item.parent_category = product.parent_category.clone();
                item.available = product.available;
                item.image_url = product.preferred_image(colors).to_string();
                item.on_sale = product.is_on_sale(currency);
            }
            None => item.available = false,
        }
    }
}

/// Co-viewed items that were also co-purchased take twice the larger of
/// their two scores and are tagged [`ItemRole::Picked`] in place.
fn double_overlap(record: &mut RecommendationRecord) {
    let RecommendationRecord { co_viewed, co_purchased, .. } = record;
    for viewed in co_viewed.iter_mut() {
        let Some(bought) = co_purchased.get(&viewed.product_id) else {
            continue;
        };
        viewed.total_score = viewed.total_score.max(bought.total_score).saturating_mul(2);
        viewed.role = ItemRole::Picked;
        debug!(
            product_id = %viewed.product_id,
            total_score = viewed.total_score,
            "co-viewed item is also co-purchased, doubling its weight"
        );
    }
}

fn best_sellers(
    anchor: &CatalogProduct,
    catalog: &dyn CatalogLookup,
    colors: &[String],
    request: &RecommendationRequest,
) -> ItemSet {
    let mut similar = ItemSet::new();
    for id in &anchor.similar_item_ids {
        if id == &anchor.product_id {
            continue;
        }
        let Some(product) = catalog.product(id).filter(|product| product.available) else {
            continue;
        };
        similar.push(RelatedItem {
            product_id: product.product_id.clone(),
            role: ItemRole::Similar,
            total_score: product.num_of_purchases,
            scores_by_region: product.sales_by_region.clone(),
            product_name: product.name.clone(),
            image_url: product.preferred_image(colors).to_string(),
            parent_category: product.parent_category.clone(),
            available: true,
            on_sale: product.is_on_sale(&request.currency),
        });
    }
    similar.remove_duplicates();
    rank_by_count(similar, request.limit)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::domain::catalog::CatalogProduct;
    use crate::domain::customer::{Customer, CustomerId};
    use crate::domain::item::{ItemRole, ItemSet, RelatedItem};
    use crate::domain::product::ProductId;
    use crate::domain::record::RecommendationRecord;
    use crate::domain::region::{Region, RegionScore};

    use super::{BlendingEngine, RecommendationRequest, SignificancePolicy};

    type Catalog = HashMap<ProductId, CatalogProduct>;

    fn items(entries: &[(&str, u64)], role: ItemRole) -> ItemSet {
        ItemSet::from(
            entries
                .iter()
                .map(|(id, score)| RelatedItem::new(*id, role, *score))
                .collect::<Vec<_>>(),
        )
    }

    fn record(
        anchor: &str,
        viewed: &[(&str, u64)],
        bought: &[(&str, u64)],
    ) -> RecommendationRecord {
        RecommendationRecord {
            co_viewed: items(viewed, ItemRole::CoViewed),
            co_purchased: items(bought, ItemRole::CoPurchased),
            ..RecommendationRecord::empty(anchor)
        }
    }

    fn product(id: &str, category: &str, available: bool) -> CatalogProduct {
        CatalogProduct {
            product_id: ProductId::from(id),
            name: format!("name-{id}"),
            image_url: format!("https://img/{id}.jpg"),
            parent_category: category.to_string(),
            available,
            ..CatalogProduct::default()
        }
    }

    fn catalog(products: Vec<CatalogProduct>) -> Catalog {
        products.into_iter().map(|product| (product.product_id.clone(), product)).collect()
    }

    fn ids(set: &ItemSet) -> Vec<String> {
        set.iter().map(|item| item.product_id.to_string()).collect()
    }

    fn engine() -> BlendingEngine {
        BlendingEngine::new(SignificancePolicy { floor: 10 })
    }

    #[test]
    fn overlap_between_signals_doubles_the_larger_score() {
        let catalog = catalog(vec![product("X", "tops", true), product("Y", "tops", true)]);
        let result = engine().recommend(
            record("X", &[("Y", 5)], &[("Y", 8)]),
            RecommendationRequest::new("X"),
            &catalog,
            None,
        );

        let picked = result.picked_for_you.get(&ProductId::from("Y")).cloned().unwrap_or_default();
        assert_eq!(picked.total_score, 16);
        assert_eq!(picked.role, ItemRole::Picked);
        let viewed = result.co_viewed.get(&ProductId::from("Y")).cloned().unwrap_or_default();
        assert_eq!(viewed.total_score, 16);
        assert_eq!(viewed.role, ItemRole::Picked);
    }

    #[test]
    fn doubled_overlap_outranks_higher_raw_co_viewed_score() {
        let catalog = catalog(vec![
            product("X", "tops", true),
            product("Y", "tops", true),
            product("Z", "tops", true),
        ]);
        let result = engine().recommend(
            record("X", &[("Y", 5), ("Z", 12)], &[("Y", 8)]),
            RecommendationRequest::new("X"),
            &catalog,
            None,
        );

        let co_viewed: Vec<(String, u64, ItemRole)> = result
            .co_viewed
            .iter()
            .map(|item| (item.product_id.to_string(), item.total_score, item.role))
            .collect();
        assert_eq!(
            co_viewed,
            vec![
                ("Y".to_string(), 16, ItemRole::Picked),
                ("Z".to_string(), 12, ItemRole::CoViewed),
            ]
        );
        assert_eq!(ids(&result.picked_for_you), vec!["Y", "Z"]);
    }

    #[test]
    fn cross_category_candidates_need_a_significant_score() {
        let catalog = catalog(vec![
            product("X", "tops", true),
            product("same", "tops", true),
            product("weak", "shoes", true),
            product("strong", "shoes", true),
            product("bought-weak", "bags", true),
            product("bought-strong", "bags", true),
        ]);
        let result = engine().recommend(
            record("X", &[("same", 1), ("weak", 9), ("strong", 10)], &[
                ("bought-weak", 2),
                ("bought-strong", 40),
            ]),
            RecommendationRequest::new("X"),
            &catalog,
            None,
        );

        assert_eq!(ids(&result.picked_for_you), vec!["bought-strong", "strong", "same"]);
    }

    #[test]
    fn unavailable_and_unknown_candidates_are_left_out() {
        let catalog = catalog(vec![
            product("X", "tops", true),
            product("gone", "tops", false),
            product("kept", "tops", true),
        ]);
        let result = engine().recommend(
            record("X", &[("gone", 50), ("kept", 1), ("ghost", 99)], &[]),
            RecommendationRequest::new("X"),
            &catalog,
            None,
        );

        assert_eq!(ids(&result.picked_for_you), vec!["kept"]);
        assert_eq!(ids(&result.co_viewed), vec!["kept", "ghost", "gone"]);
        assert!(result
            .co_viewed
            .iter()
            .filter(|item| item.product_id.as_str() != "kept")
            .all(|item| !item.available));
    }

    #[test]
    fn best_sellers_use_available_similar_items_ranked_by_purchases() {
        let mut anchor = product("X", "tops", true);
        anchor.similar_item_ids =
            vec!["s1".into(), "s2".into(), "s3".into(), "X".into(), "missing".into()];
        let mut s1 = product("s1", "tops", true);
        s1.num_of_purchases = 3;
        let mut s2 = product("s2", "tops", true);
        s2.num_of_purchases = 30;
        s2.sales_by_region.add(RegionScore::new("US-MW", 12));
        let mut s3 = product("s3", "tops", false);
        s3.num_of_purchases = 300;

        let catalog = catalog(vec![anchor, s1, s2, s3]);
        let result = engine().recommend(
            record("X", &[], &[]),
            RecommendationRequest::new("X"),
            &catalog,
            None,
        );

        assert_eq!(ids(&result.best_sellers), vec!["s2", "s1"]);
        let top = &result.best_sellers.as_slice()[0];
        assert_eq!(top.role, ItemRole::Similar);
        assert_eq!(top.total_score, 30);
        assert_eq!(top.scores_by_region.score_for(&Region::new("US-MW")), 12);
    }

    #[test]
    fn short_picked_lists_are_backfilled_from_best_sellers() {
        let mut anchor = product("X", "tops", true);
        anchor.similar_item_ids = vec!["Y".into(), "s1".into(), "s2".into()];
        let mut y = product("Y", "tops", true);
        y.num_of_purchases = 100;
        let mut s1 = product("s1", "tops", true);
        s1.num_of_purchases = 50;
        let mut s2 = product("s2", "tops", true);
        s2.num_of_purchases = 5;

        let catalog = catalog(vec![anchor, y, s1, s2]);
        let result = engine().recommend(
            record("X", &[("Y", 4)], &[]),
            RecommendationRequest::new("X").with_limit(2),
            &catalog,
            None,
        );

        assert_eq!(ids(&result.picked_for_you), vec!["Y", "s1"]);
        assert_eq!(result.picked_for_you.as_slice()[0].role, ItemRole::CoViewed);
        assert_eq!(result.picked_for_you.as_slice()[1].role, ItemRole::Similar);
    }

    #[test]
    fn anchor_never_recommends_itself() {
        let catalog = catalog(vec![product("X", "tops", true), product("A", "tops", true)]);
        let result = engine().recommend(
            record("X", &[("X", 100), ("A", 1)], &[("X", 100)]),
            RecommendationRequest::new("X"),
            &catalog,
            None,
        );

        assert_eq!(ids(&result.co_viewed), vec!["A"]);
        assert!(result.co_purchased.is_empty());
        assert!(!result.picked_for_you.contains(&ProductId::from("X")));
    }

    #[test]
    fn prepare_keeps_twice_the_limit_per_signal() {
        let viewed: Vec<(String, u64)> = (0..10u64).map(|n| (format!("v{n}"), n)).collect();
        let viewed: Vec<(&str, u64)> = viewed.iter().map(|(id, n)| (id.as_str(), *n)).collect();
        let prepared = engine().prepare(
            record("X", &viewed, &[("b1", 1)]),
            RecommendationRequest::new("X").with_limit(2),
        );

        assert_eq!(ids(&prepared.record().co_viewed), vec!["v9", "v8", "v7", "v6"]);
        assert_eq!(prepared.candidate_ids().len(), 6);
        assert_eq!(prepared.candidate_ids()[0], ProductId::from("X"));
    }

    #[test]
    fn outputs_are_ranked_by_location_when_supplied() {
        let catalog = catalog(vec![
            product("X", "tops", true),
            product("A", "tops", true),
            product("B", "tops", true),
        ]);
        let mut input = record("X", &[("A", 50), ("B", 10)], &[]);
        if let Some(b) = input.co_viewed.iter_mut().find(|item| item.product_id.as_str() == "B") {
            b.scores_by_region.add(RegionScore::new("US-MW", 20));
        }

        let result = engine().recommend(
            input,
            RecommendationRequest::new("X").with_location(Region::new("us-mw")),
            &catalog,
            None,
        );

        assert_eq!(ids(&result.co_viewed), vec!["B", "A"]);
        assert_eq!(ids(&result.picked_for_you), vec!["B", "A"]);
    }

    #[test]
    fn customer_colour_preferences_pick_images() {
        let mut a = product("A", "tops", true);
        a.image_urls_by_color.insert("red".to_string(), "https://img/A-red.jpg".to_string());
        let catalog = catalog(vec![product("X", "tops", true), a]);
        let customer =
            Customer { customer_id: CustomerId::from("c1"), color_prefs: vec!["red".to_string()] };

        let result = engine().recommend(
            record("X", &[("A", 1)], &[]),
            RecommendationRequest::new("X"),
            &catalog,
            Some(&customer),
        );

        assert_eq!(result.co_viewed.as_slice()[0].image_url, "https://img/A-red.jpg");
        assert_eq!(result.image_url, "https://img/X.jpg");
    }

    #[test]
    fn unknown_anchor_yields_empty_lists() {
        let result = engine().recommend(
            RecommendationRecord::empty("nope"),
            RecommendationRequest::new("nope"),
            &Catalog::new(),
            None,
        );

        assert_eq!(result.product_id, ProductId::from("nope"));
        assert!(result.best_sellers.is_empty());
        assert!(result.picked_for_you.is_empty());
    }

    #[test]
    fn zero_limit_returns_empty_lists() {
        let catalog = catalog(vec![product("X", "tops", true), product("A", "tops", true)]);
        let result = engine().recommend(
            record("X", &[("A", 1)], &[("A", 1)]),
            RecommendationRequest::new("X").with_limit(0),
            &catalog,
            None,
        );

        assert!(result.co_viewed.is_empty());
        assert!(result.co_purchased.is_empty());
        assert!(result.picked_for_you.is_empty());
    }
}
