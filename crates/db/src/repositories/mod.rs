use async_trait::async_trait;
use thiserror::Error;

use relatedrec_core::domain::catalog::CatalogProduct;
use relatedrec_core::domain::customer::{Customer, CustomerId};
use relatedrec_core::domain::product::ProductId;
use relatedrec_core::domain::record::RecommendationRecord;
use relatedrec_core::domain::region::RegionScoreSet;

pub mod catalog;
pub mod customer;
pub mod memory;
pub mod recommendation;

pub use catalog::SqlCatalogRepository;
pub use customer::SqlCustomerRepository;
pub use memory::{
    InMemoryCatalogRepository, InMemoryCustomerRepository, InMemoryRecommendationStore, Throttle,
};
pub use recommendation::SqlRecommendationStore;

/// Largest key set a single batch read may carry.
pub const READ_BATCH_LIMIT: usize = 100;
/// Largest item set a single batch write may carry.
pub const WRITE_BATCH_LIMIT: usize = 25;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("batch of {size} entries exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
}

/// Result of one batch read. Keys the backend could not serve this round are
/// handed back in `unprocessed_keys`; keys with no row appear in neither list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchGetOutput<T> {
    pub items: Vec<T>,
    pub unprocessed_keys: Vec<ProductId>,
}

impl<T> BatchGetOutput<T> {
    pub fn complete(items: Vec<T>) -> Self {
        Self { items, unprocessed_keys: Vec::new() }
    }
}

pub(crate) fn ensure_batch_size(size: usize, limit: usize) -> Result<(), RepositoryError> {
    if size > limit {
        return Err(RepositoryError::BatchTooLarge { size, limit });
    }
    Ok(())
}

/// Persisted recommendation table keyed by anchor product id.
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn batch_get(
        &self,
        keys: &[ProductId],
    ) -> Result<BatchGetOutput<RecommendationRecord>, RepositoryError>;

    /// Writes up to [`WRITE_BATCH_LIMIT`] records and returns the ones the
    /// backend did not accept this round.
    async fn batch_put(
        &self,
        records: &[RecommendationRecord],
    ) -> Result<Vec<RecommendationRecord>, RepositoryError>;

    async fn get(&self, id: &ProductId) -> Result<Option<RecommendationRecord>, RepositoryError>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn batch_get(
        &self,
        ids: &[ProductId],
    ) -> Result<BatchGetOutput<CatalogProduct>, RepositoryError>;

    /// Returns `false` when the product has no catalog row.
    async fn update_sales(
        &self,
        id: &ProductId,
        num_of_purchases: u64,
        sales_by_region: &RegionScoreSet,
    ) -> Result<bool, RepositoryError>;

    async fn upsert(&self, product: CatalogProduct) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;
    async fn save(&self, customer: Customer) -> Result<(), RepositoryError>;
}
