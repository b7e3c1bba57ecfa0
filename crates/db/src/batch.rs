//! Chunked batch reads and writes with bounded resubmission of unprocessed
//! entries.
//!
//! Every backend call is wrapped in a timeout. Keys or items handed back as
//! unprocessed are resubmitted with exponential backoff until the attempt
//! budget runs out, at which point the caller gets
//! [`BatchError::RetriesExhausted`] instead of an endless loop.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use relatedrec_core::config::StoreConfig;
use relatedrec_core::domain::catalog::CatalogProduct;
use relatedrec_core::domain::product::ProductId;
use relatedrec_core::domain::record::RecommendationRecord;

use crate::repositories::{
    BatchGetOutput, CatalogRepository, RecommendationStore, RepositoryError, READ_BATCH_LIMIT,
    WRITE_BATCH_LIMIT,
};

const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch {operation} gave up after {attempts} attempts with {remaining} entries unprocessed")]
    RetriesExhausted { operation: &'static str, attempts: u32, remaining: usize },
    #[error("batch {operation} call timed out after {timeout:?}")]
    Timeout { operation: &'static str, timeout: Duration },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(50),
            max_backoff: MAX_BACKOFF,
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_attempts: config.max_batch_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: MAX_BACKOFF,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Delay before resubmission number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Clone, Debug, Default)]
pub struct BatchExecutor {
    policy: RetryPolicy,
}

impl BatchExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Reads every key through `fetch`, at most [`READ_BATCH_LIMIT`] keys per
    /// call. Duplicate keys are requested once. Missing rows are simply absent
    /// from the result.
    pub async fn read_all<T, F, Fut>(
        &self,
        keys: &[ProductId],
        mut fetch: F,
    ) -> Result<Vec<T>, BatchError>
    where
        F: FnMut(Vec<ProductId>) -> Fut,
        Fut: Future<Output = Result<BatchGetOutput<T>, RepositoryError>>,
    {
        let mut seen = HashSet::new();
        let unique: Vec<ProductId> =
            keys.iter().filter(|key| seen.insert((*key).clone())).cloned().collect();

        let mut found = Vec::with_capacity(unique.len());
        for chunk in unique.chunks(READ_BATCH_LIMIT) {
            let mut pending = chunk.to_vec();
            let mut attempt = 0;
            while !pending.is_empty() {
                self.before_attempt("read", attempt, pending.len()).await?;
                attempt += 1;
                let output = self.call("read", fetch(pending)).await?;
                found.extend(output.items);
                pending = output.unprocessed_keys;
            }
        }
        Ok(found)
    }

    /// Writes every item through `put`, at most [`WRITE_BATCH_LIMIT`] items
    /// per call, and returns the number written.
    pub async fn write_all<T, F, Fut>(&self, items: Vec<T>, mut put: F) -> Result<usize, BatchError>
    where
        T: Clone,
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, RepositoryError>>,
    {
        let total = items.len();
        for chunk in items.chunks(WRITE_BATCH_LIMIT) {
            let mut pending = chunk.to_vec();
            let mut attempt = 0;
            while !pending.is_empty() {
                self.before_attempt("write", attempt, pending.len()).await?;
                attempt += 1;
                pending = self.call("write", put(pending)).await?;
            }
        }
        Ok(total)
    }

    pub async fn read_records(
        &self,
        store: &dyn RecommendationStore,
        keys: &[ProductId],
    ) -> Result<Vec<RecommendationRecord>, BatchError> {
        self.read_all(keys, |chunk| async move { store.batch_get(&chunk).await }).await
    }

    pub async fn write_records(
        &self,
        store: &dyn RecommendationStore,
        records: Vec<RecommendationRecord>,
    ) -> Result<usize, BatchError> {
        self.write_all(records, |chunk| async move { store.batch_put(&chunk).await }).await
    }

    pub async fn read_catalog(
        &self,
        catalog: &dyn CatalogRepository,
        ids: &[ProductId],
    ) -> Result<Vec<CatalogProduct>, BatchError> {
        self.read_all(ids, |chunk| async move { catalog.batch_get(&chunk).await }).await
    }

    async fn before_attempt(
        &self,
        operation: &'static str,
        attempt: u32,
        remaining: usize,
    ) -> Result<(), BatchError> {
        if attempt == 0 {
            return Ok(());
        }
        if attempt >= self.policy.max_attempts {
            warn!(
                event_name = "store.batch.retries_exhausted",
                operation,
                attempts = attempt,
                remaining,
                "batch call still has unprocessed entries"
            );
            return Err(BatchError::RetriesExhausted { operation, attempts: attempt, remaining });
        }

        let delay = self.policy.backoff(attempt);
        debug!(
            event_name = "store.batch.resubmit",
            operation,
            attempt,
            remaining,
            delay_ms = delay.as_millis() as u64,
            "resubmitting unprocessed batch entries"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn call<R>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<R, RepositoryError>>,
    ) -> Result<R, BatchError> {
        let timeout = self.policy.call_timeout;
        match tokio::time::timeout(timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BatchError::Timeout { operation, timeout }),
        }
    }
}
