use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::merger::{IngestError, IngestReport, IngestionMerger};
use crate::readiness::{partition_keys, ReadinessTracker, SUCCESS_SENTINEL};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollOutcome {
    pub bucket: String,
    pub sentinel: String,
    pub result: Result<IngestReport, String>,
}

/// Watches buckets for completed runs and ingests each one once.
pub struct IngestPipeline {
    merger: IngestionMerger,
    buckets: Vec<String>,
    poll_interval: Duration,
    tracker: ReadinessTracker,
}

impl IngestPipeline {
    pub fn new(merger: IngestionMerger, buckets: Vec<String>, poll_interval: Duration) -> Self {
        Self { merger, buckets, poll_interval, tracker: ReadinessTracker::new() }
    }

    pub fn buckets(&self) -> &[String] {
        &self.buckets
    }

    /// Ingests the partitions that belong to `sentinel` in `bucket`.
    pub async fn ingest_sentinel(
        &self,
        bucket: &str,
        sentinel: &str,
    ) -> Result<IngestReport, IngestError> {
        let objects = self.merger.objects().list_objects(bucket).await?;
        let keys = partition_keys(sentinel, &objects);
        info!(
            event_name = "ingest.run.started",
            bucket,
            sentinel,
            partitions = keys.len(),
            "ingesting completed run"
        );
        self.merger.ingest(bucket, keys).await
    }

    /// Ingests the most recently completed run in `bucket`, if any.
    pub async fn ingest_latest(&self, bucket: &str) -> Result<Option<IngestReport>, IngestError> {
        let objects = self.merger.objects().list_objects(bucket).await?;
        let latest = objects
            .iter()
            .filter(|object| object.key.ends_with(SUCCESS_SENTINEL))
            .max_by_key(|object| object.last_modified);
        let Some(latest) = latest else {
            return Ok(None);
        };

        let keys = partition_keys(&latest.key, &objects);
        self.merger.ingest(bucket, keys).await.map(Some)
    }

    /// Scans every bucket once. Sentinels present at the first scan are only
    /// recorded.
    pub async fn poll_once(&mut self) -> Vec<PollOutcome> {
        let mut outcomes = Vec::new();
        for bucket in self.buckets.clone() {
            let objects = match self.merger.objects().list_objects(&bucket).await {
                Ok(objects) => objects,
                Err(err) => {
                    warn!(
                        event_name = "ingest.bucket.list_failed",
                        bucket = %bucket,
                        error = %err,
                        "could not list bucket"
                    );
                    continue;
                }
            };

            let ready = self.tracker.scan(&bucket, &objects);
            if ready.is_empty() {
                info!(bucket = %bucket, "no new data in bucket");
            }
            for sentinel in ready {
                info!(
                    event_name = "ingest.bucket.ready",
                    bucket = %bucket,
                    sentinel = %sentinel,
                    "bucket is ready"
                );
                let keys = partition_keys(&sentinel, &objects);
                let result = self.merger.ingest(&bucket, keys).await.map_err(|err| {
                    error!(
                        event_name = "ingest.run.failed",
                        bucket = %bucket,
                        sentinel = %sentinel,
                        error = %err,
                        "ingestion failed"
                    );
                    err.to_string()
                });
                outcomes.push(PollOutcome { bucket: bucket.clone(), sentinel, result });
            }
        }
        self.tracker.prime();
        outcomes
    }

    /// Polls every `poll_interval` until `shutdown` resolves.
    pub async fn watch<F>(&mut self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut runs = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(event_name = "ingest.watch.stopped", runs, "watch loop stopped");
                    return runs;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    runs += self.poll_once().await.len();
                }
            }
        }
    }
}
