use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use relatedrec_core::domain::catalog::CatalogProduct;
use relatedrec_core::domain::customer::{Customer, CustomerId};
use relatedrec_core::domain::product::ProductId;
use relatedrec_core::domain::record::RecommendationRecord;
use relatedrec_core::domain::region::RegionScoreSet;

use super::{
    ensure_batch_size, BatchGetOutput, CatalogRepository, CustomerRepository,
    RecommendationStore, RepositoryError, READ_BATCH_LIMIT, WRITE_BATCH_LIMIT,
};

/// Simulated backend pressure: at most `max_per_call` entries are served per
/// batch call and the remainder comes back unprocessed.
#[derive(Clone, Copy, Debug, Default)]
pub struct Throttle {
    pub max_per_call: Option<usize>,
}

impl Throttle {
    fn split(&self, size: usize) -> usize {
        self.max_per_call.map(|max| max.min(size)).unwrap_or(size)
    }
}

fn unavailable() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

#[derive(Default)]
pub struct InMemoryRecommendationStore {
    records: RwLock<HashMap<ProductId, RecommendationRecord>>,
    throttle: Throttle,
    unavailable: AtomicBool,
}

impl InMemoryRecommendationStore {
    pub fn with_throttle(throttle: Throttle) -> Self {
        Self { throttle, ..Self::default() }
    }

    /// Makes every call fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn batch_get(
        &self,
        keys: &[ProductId],
    ) -> Result<BatchGetOutput<RecommendationRecord>, RepositoryError> {
        self.check_available()?;
        ensure_batch_size(keys.len(), READ_BATCH_LIMIT)?;
        let (served, deferred) = keys.split_at(self.throttle.split(keys.len()));

        let records = self.records.read().await;
        Ok(BatchGetOutput {
            items: served.iter().filter_map(|key| records.get(key).cloned()).collect(),
            unprocessed_keys: deferred.to_vec(),
        })
    }

    async fn batch_put(
        &self,
        records: &[RecommendationRecord],
    ) -> Result<Vec<RecommendationRecord>, RepositoryError> {
        self.check_available()?;
        ensure_batch_size(records.len(), WRITE_BATCH_LIMIT)?;
        let (accepted, deferred) = records.split_at(self.throttle.split(records.len()));

        let mut stored = self.records.write().await;
        for record in accepted {
            stored.insert(record.product_id.clone(), record.clone());
        }
        Ok(deferred.to_vec())
    }

    async fn get(&self, id: &ProductId) -> Result<Option<RecommendationRecord>, RepositoryError> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCatalogRepository {
    products: RwLock<HashMap<ProductId, CatalogProduct>>,
    throttle: Throttle,
    unavailable: AtomicBool,
}

impl InMemoryCatalogRepository {
    pub fn with_throttle(throttle: Throttle) -> Self {
        Self { throttle, ..Self::default() }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn find(&self, id: &ProductId) -> Option<CatalogProduct> {
        self.products.read().await.get(id).cloned()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn batch_get(
        &self,
        ids: &[ProductId],
    ) -> Result<BatchGetOutput<CatalogProduct>, RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        ensure_batch_size(ids.len(), READ_BATCH_LIMIT)?;
        let (served, deferred) = ids.split_at(self.throttle.split(ids.len()));

        let products = self.products.read().await;
        Ok(BatchGetOutput {
            items: served.iter().filter_map(|id| products.get(id).cloned()).collect(),
            unprocessed_keys: deferred.to_vec(),
        })
    }

    async fn update_sales(
        &self,
        id: &ProductId,
        num_of_purchases: u64,
        sales_by_region: &RegionScoreSet,
    ) -> Result<bool, RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut products = self.products.write().await;
        match products.get_mut(id) {
            Some(product) => {
                product.num_of_purchases = num_of_purchases;
                product.sales_by_region = sales_by_region.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert(&self, product: CatalogProduct) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        products.insert(product.product_id.clone(), product);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    customers: RwLock<HashMap<CustomerId, Customer>>,
}

#[async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let customers = self.customers.read().await;
        Ok(customers.get(id).cloned())
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        let mut customers = self.customers.write().await;
        customers.insert(customer.customer_id.clone(), customer);
        Ok(())
    }
}
