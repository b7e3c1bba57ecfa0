//! Related items and the item sets that hold them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::product::ProductId;
use crate::domain::region::RegionScoreSet;

/// Why an item was recommended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemRole {
    #[default]
    CoViewed,
    CoPurchased,
    Picked,
    Similar,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelatedItem {
    pub product_id: ProductId,
    pub role: ItemRole,
    pub total_score: u64,
    pub scores_by_region: RegionScoreSet,
    pub product_name: String,
    pub image_url: String,
    pub parent_category: String,
    pub available: bool,
    pub on_sale: bool,
}

impl RelatedItem {
    pub fn new(product_id: impl Into<ProductId>, role: ItemRole, total_score: u64) -> Self {
        Self { product_id: product_id.into(), role, total_score, ..Self::default() }
    }

    pub fn with_regions(mut self, scores_by_region: RegionScoreSet) -> Self {
        self.scores_by_region = scores_by_region;
        self
    }

    /// Folds another observation of the same product into this one. Additive only.
    pub fn absorb(&mut self, incoming: &RelatedItem) {
        self.total_score = self.total_score.saturating_add(incoming.total_score);
        self.scores_by_region.merge(&incoming.scores_by_region);
    }
}

/// Ordered related items, keyed by product id.
///
/// Merges keep ids unique. `push` appends without checking, for callers that
/// assemble a set from several sources and dedupe afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemSet(Vec<RelatedItem>);

impl ItemSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RelatedItem> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, RelatedItem> {
        self.0.iter_mut()
    }

    pub fn as_slice(&self) -> &[RelatedItem] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<RelatedItem> {
        self.0
    }

    pub fn get(&self, product_id: &ProductId) -> Option<&RelatedItem> {
        self.0.iter().find(|item| &item.product_id == product_id)
    }

    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.get(product_id).is_some()
    }

    pub fn push(&mut self, item: RelatedItem) {
        self.0.push(item);
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Removes the first item with `product_id`, if any.
    pub fn remove(&mut self, product_id: &ProductId) -> Option<RelatedItem> {
        let position = self.0.iter().position(|item| &item.product_id == product_id)?;
        Some(self.0.remove(position))
    }

    pub fn merge_item(&mut self, incoming: RelatedItem) {
        match self.0.iter_mut().find(|item| item.product_id == incoming.product_id) {
            Some(existing) => {
                trace!(product_id = %incoming.product_id, "merging related item");
                existing.absorb(&incoming);
            }
            None => {
                trace!(product_id = %incoming.product_id, "appending related item");
                self.0.push(incoming);
            }
        }
    }

    /// Additive merge: shared ids sum scores, new ids are appended in incoming order.
    pub fn merge(&mut self, incoming: &ItemSet) {
        for item in &incoming.0 {
            self.merge_item(item.clone());
        }
    }

    /// Keeps the first occurrence of every product id.
    pub fn remove_duplicates(&mut self) {
        let mut seen = HashSet::with_capacity(self.0.len());
        self.0.retain(|item| seen.insert(item.product_id.clone()));
    }
}

impl From<Vec<RelatedItem>> for ItemSet {
    fn from(items: Vec<RelatedItem>) -> Self {
        Self(items)
    }
}

impl IntoIterator for ItemSet {
    type Item = RelatedItem;
    type IntoIter = std::vec::IntoIter<RelatedItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ItemSet {
    type Item = &'a RelatedItem;
    type IntoIter = std::slice::Iter<'a, RelatedItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Collecting merges repeated ids instead of keeping duplicates.
impl FromIterator<RelatedItem> for ItemSet {
    fn from_iter<T: IntoIterator<Item = RelatedItem>>(iter: T) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.merge_item(item);
        }
        set
    }
}
