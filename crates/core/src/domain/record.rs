use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::item::ItemSet;
use crate::domain::product::ProductId;
use crate::domain::region::RegionScoreSet;
use crate::errors::DomainError;

/// How an incoming co-purchased set is combined with one already persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoPurchasedPolicy {
    /// Scores are summed like every other signal.
    #[default]
    Additive,
    /// The incoming set wins outright. Used for the bought-together source,
    /// which publishes complete co-purchase lists rather than deltas.
    Replace,
}

impl CoPurchasedPolicy {
    pub fn for_source(is_bought_together_source: bool) -> Self {
        if is_bought_together_source {
            Self::Replace
        } else {
            Self::Additive
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommendationRecord {
    pub product_id: ProductId,
    pub parent_category: String,
    pub image_url: String,
    pub num_of_purchases: u64,
    pub co_purchased: ItemSet,
    pub co_viewed: ItemSet,
    pub sales_by_region: RegionScoreSet,
    pub best_sellers: ItemSet,
    pub picked_for_you: ItemSet,
}

impl RecommendationRecord {
    pub fn empty(product_id: impl Into<ProductId>) -> Self {
        Self { product_id: product_id.into(), ..Self::default() }
    }

    /// Additive fold of another partial observation of the same product.
    pub fn merge(&mut self, incoming: &RecommendationRecord) {
        self.merge_with_policy(incoming, CoPurchasedPolicy::Additive);
    }

    /// Folds `incoming` into this record. Only the co-purchased set honours
    /// `policy`; co-viewed, purchase count and sales by region always add up.
    /// Records for different products are left untouched.
    pub fn merge_with_policy(
        &mut self,
        incoming: &RecommendationRecord,
        policy: CoPurchasedPolicy,
    ) {
        if self.product_id != incoming.product_id {
            debug!(
                target_product = %self.product_id,
                incoming_product = %incoming.product_id,
                "ignoring merge of mismatched recommendation records"
            );
            return;
        }

        match policy {
            CoPurchasedPolicy::Additive => self.co_purchased.merge(&incoming.co_purchased),
            CoPurchasedPolicy::Replace => self.co_purchased = incoming.co_purchased.clone(),
        }
        self.co_viewed.merge(&incoming.co_viewed);
        self.num_of_purchases = self.num_of_purchases.saturating_add(incoming.num_of_purchases);
        self.sales_by_region.merge(&incoming.sales_by_region);
    }

    /// Strict form of [`merge_with_policy`](Self::merge_with_policy) that
    /// reports a product mismatch instead of skipping it.
    pub fn try_merge_with_policy(
        &mut self,
        incoming: &RecommendationRecord,
        policy: CoPurchasedPolicy,
    ) -> Result<(), DomainError> {
        if self.product_id != incoming.product_id {
            return Err(DomainError::ProductMismatch {
                expected: self.product_id.clone(),
                actual: incoming.product_id.clone(),
            });
        }
        self.merge_with_policy(incoming, policy);
        Ok(())
    }

    /// Drops the anchor product from its own co-purchased and co-viewed sets.
    pub fn remove_self(&mut self) {
        let anchor = self.product_id.clone();
        self.co_viewed.remove(&anchor);
        self.co_purchased.remove(&anchor);
    }
}
