//! Folds computed-result partitions into the persisted recommendation table.
//!
//! A fixed pool of workers pulls partition keys from a shared queue, fetches
//! and parses each one, and sends the partial table back over a results
//! channel. A single collector folds exactly one result per partition, then
//! merges the folded table against what is already persisted and writes it
//! back. Finally each ingested product's catalog row receives its merged
//! purchase count and regional sales.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use relatedrec_core::config::IngestConfig;
use relatedrec_core::domain::product::ProductId;
use relatedrec_core::domain::record::{CoPurchasedPolicy, RecommendationRecord};
use relatedrec_core::errors::DomainError;
use relatedrec_core::ranking::rank_by_count;
use relatedrec_db::batch::{BatchError, BatchExecutor};
use relatedrec_db::repositories::{CatalogRepository, RecommendationStore};

use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::partition::{parse_partition, ParsedPartition};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("worker pool stopped after {received} of {expected} partition results")]
    WorkersStopped { received: usize, expected: usize },
    #[error("could not read persisted recommendations: {0}")]
    ReadExisting(#[source] BatchError),
    #[error("could not write merged recommendations: {0}")]
    WriteBack(#[source] BatchError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergerSettings {
    pub workers: usize,
    pub max_items_per_list: usize,
    pub max_concurrent_updates: usize,
    pub bought_together_bucket: String,
}

impl Default for MergerSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            max_items_per_list: 30,
            max_concurrent_updates: 10,
            bought_together_bucket: "ecomm-order-items".to_string(),
        }
    }
}

impl From<&IngestConfig> for MergerSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            workers: config.workers,
            max_items_per_list: config.max_items_per_list,
            max_concurrent_updates: config.max_concurrent_updates,
            bought_together_bucket: config.bought_together_bucket.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub bucket: String,
    pub partitions: usize,
    pub failed_partitions: Vec<String>,
    pub lines: usize,
    pub lines_skipped: usize,
    pub products: usize,
    pub merged_with_existing: usize,
    pub records_written: usize,
    pub catalog_updates: usize,
    pub catalog_rows_missing: usize,
    pub catalog_update_failures: usize,
}

struct PartitionOutcome {
    key: String,
    result: Result<ParsedPartition, ObjectStoreError>,
}

pub struct IngestionMerger {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecommendationStore>,
    catalog: Arc<dyn CatalogRepository>,
    batch: BatchExecutor,
    settings: MergerSettings,
}

impl IngestionMerger {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecommendationStore>,
        catalog: Arc<dyn CatalogRepository>,
        batch: BatchExecutor,
        settings: MergerSettings,
    ) -> Self {
        Self { objects, records, catalog, batch, settings }
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    /// Ingests `keys` from `bucket` end to end.
    pub async fn ingest(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport { bucket: bucket.to_string(), ..IngestReport::default() };
        let table = self.collect(bucket, keys, &mut report).await?;
        report.products = table.len();
        if table.is_empty() {
            info!(event_name = "ingest.bucket.empty", bucket, "no products in partitions");
            return Ok(report);
        }

        let merged = self.merge_with_persisted(bucket, table, &mut report).await?;
        report.records_written = self
            .batch
            .write_records(self.records.as_ref(), merged.clone())
            .await
            .map_err(IngestError::WriteBack)?;

        self.update_catalog_sales(&merged, &mut report).await;

        info!(
            event_name = "ingest.bucket.completed",
            bucket,
            partitions = report.partitions,
            failed_partitions = report.failed_partitions.len(),
            products = report.products,
            records_written = report.records_written,
            catalog_updates = report.catalog_updates,
            "ingestion completed"
        );
        Ok(report)
    }

    /// Runs the worker pool over `keys` and folds every partial table.
    pub async fn collect(
        &self,
        bucket: &str,
        keys: Vec<String>,
        report: &mut IngestReport,
    ) -> Result<HashMap<ProductId, RecommendationRecord>, IngestError> {
        let expected = keys.len();
        report.partitions = expected;
        let mut table: HashMap<ProductId, RecommendationRecord> = HashMap::new();
        if expected == 0 {
            return Ok(table);
        }

        let (work_tx, work_rx) = mpsc::channel::<String>(expected);
        for key in keys {
            if work_tx.send(key).await.is_err() {
                break;
            }
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let worker_count = self.settings.workers.clamp(1, expected);
        let (result_tx, mut result_rx) = mpsc::channel::<PartitionOutcome>(worker_count);
        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            let objects = Arc::clone(&self.objects);
            let bucket = bucket.to_string();
            workers.spawn(async move {
                loop {
                    let next = work_rx.lock().await.recv().await;
                    let Some(key) = next else {
                        break;
                    };
                    debug!(worker, bucket = %bucket, key = %key, "processing partition");
                    let result = objects
                        .get_object(&bucket, &key)
                        .await
                        .map(|body| parse_partition(&String::from_utf8_lossy(&body)));
                    if result_tx.send(PartitionOutcome { key, result }).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut received = 0;
        while received < expected {
            let Some(outcome) = result_rx.recv().await else {
                warn!(
                    event_name = "ingest.collector.workers_stopped",
                    bucket,
                    received,
                    expected,
                    "result channel closed early"
                );
                return Err(IngestError::WorkersStopped { received, expected });
            };
            received += 1;

            match outcome.result {
                Ok(parsed) => {
                    debug!(
                        event_name = "ingest.partition.parsed",
                        bucket,
                        key = %outcome.key,
                        products = parsed.records.len(),
                        skipped = parsed.skipped,
                        "partition folded"
                    );
                    report.lines += parsed.lines;
                    report.lines_skipped += parsed.skipped;
                    fold(&mut table, parsed);
                }
                Err(err) => {
                    warn!(
                        event_name = "ingest.partition.failed",
                        bucket,
                        key = %outcome.key,
                        error = %err,
                        "could not fetch partition"
                    );
                    report.failed_partitions.push(outcome.key);
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(event_name = "ingest.worker.failed", error = %err, "partition worker failed");
            }
        }
        Ok(table)
    }

    /// Merges the folded table against persisted rows. The co-purchased set
    /// of the bought-together source replaces what is stored; every other
    /// signal adds up.
    pub async fn merge_with_persisted(
        &self,
        bucket: &str,
        mut table: HashMap<ProductId, RecommendationRecord>,
        report: &mut IngestReport,
    ) -> Result<Vec<RecommendationRecord>, IngestError> {
        let policy =
            CoPurchasedPolicy::for_source(bucket == self.settings.bought_together_bucket);
        let mut ids: Vec<ProductId> = table.keys().cloned().collect();
        ids.sort();

        let existing = self
            .batch
            .read_records(self.records.as_ref(), &ids)
            .await
            .map_err(IngestError::ReadExisting)?;

        let cap = self.settings.max_items_per_list;
        for mut persisted in existing {
            let Some(fresh) = table.get_mut(&persisted.product_id) else {
                continue;
            };
            persisted.co_purchased =
                rank_by_count(std::mem::take(&mut persisted.co_purchased), cap);
            persisted.co_viewed = rank_by_count(std::mem::take(&mut persisted.co_viewed), cap);
            persisted.try_merge_with_policy(fresh, policy)?;
            debug!(
                product_id = %persisted.product_id,
                num_of_purchases = persisted.num_of_purchases,
                ?policy,
                "merged with persisted record"
            );
            *fresh = persisted;
            report.merged_with_existing += 1;
        }

        let mut merged: Vec<RecommendationRecord> = table.into_values().collect();
        merged.sort_by(|left, right| left.product_id.cmp(&right.product_id));
        Ok(merged)
    }

    async fn update_catalog_sales(
        &self,
        records: &[RecommendationRecord],
        report: &mut IngestReport,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_updates.max(1)));
        let mut updates = JoinSet::new();

        for record in records {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let catalog = Arc::clone(&self.catalog);
            let product_id = record.product_id.clone();
            let num_of_purchases = record.num_of_purchases;
            let sales = record.sales_by_region.sorted_by_score();
            updates.spawn(async move {
                let _permit = permit;
                let result = catalog.update_sales(&product_id, num_of_purchases, &sales).await;
                (product_id, result)
            });
        }

        while let Some(joined) = updates.join_next().await {
            match joined {
                Ok((_, Ok(true))) => report.catalog_updates += 1,
                Ok((product_id, Ok(false))) => {
                    debug!(product_id = %product_id, "no catalog row to update");
                    report.catalog_rows_missing += 1;
                }
                Ok((product_id, Err(err))) => {
                    warn!(
                        event_name = "ingest.catalog.update_failed",
                        product_id = %product_id,
                        error = %err,
                        "could not update catalog sales"
                    );
                    report.catalog_update_failures += 1;
                }
                Err(err) => {
                    warn!(
                        event_name = "ingest.catalog.update_failed",
                        error = %err,
                        "update task failed"
                    );
                    report.catalog_update_failures += 1;
                }
            }
        }
    }
}

fn fold(table: &mut HashMap<ProductId, RecommendationRecord>, parsed: ParsedPartition) {
    for (product_id, record) in parsed.records {
        match table.entry(product_id) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(&record),
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }
}
