use std::sync::Arc;
use std::time::Duration;

use relatedrec_core::config::AppConfig;
use relatedrec_db::batch::{BatchExecutor, RetryPolicy};
use relatedrec_db::repositories::{SqlCatalogRepository, SqlRecommendationStore};
use relatedrec_db::DbPool;
use relatedrec_ingest::{IngestPipeline, IngestionMerger, LocalObjectStore, MergerSettings};

use crate::commands::{
    connect_and_migrate, finish, init_logging, load_config, runtime, CommandResult, StepError,
};

fn pipeline(config: &AppConfig, pool: &DbPool) -> IngestPipeline {
    let merger = IngestionMerger::new(
        Arc::new(LocalObjectStore::new(config.ingest.object_store_root.clone())),
        Arc::new(SqlRecommendationStore::new(pool.clone())),
        Arc::new(SqlCatalogRepository::new(pool.clone())),
        BatchExecutor::new(RetryPolicy::from_config(&config.store)),
        MergerSettings::from(&config.ingest),
    );
    IngestPipeline::new(
        merger,
        config.ingest.buckets.clone(),
        Duration::from_secs(config.ingest.poll_interval_secs),
    )
}

/// Ingests one run of `bucket`: the run of `sentinel` when given, the most
/// recently completed run otherwise.
pub fn run(bucket: &str, sentinel: Option<&str>) -> CommandResult {
    let config = match load_config("ingest") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    init_logging(&config);
    let runtime = match runtime("ingest") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let pipeline = pipeline(&config, &pool);
        let outcome = match sentinel {
            Some(sentinel) => pipeline.ingest_sentinel(bucket, sentinel).await.map(Some),
            None => pipeline.ingest_latest(bucket).await,
        };
        pool.close().await;

        let report = outcome.map_err(|error| ("ingest", error.to_string(), 6u8))?;
        let Some(report) = report else {
            return Ok(CommandResult::success(
                "ingest",
                format!("no completed run found in bucket `{bucket}`"),
            ));
        };
        let details = serde_json::to_value(&report)
            .map_err(|error| ("serialization", error.to_string(), 7u8))?;
        Ok::<_, StepError>(CommandResult::success_with_details(
            "ingest",
            format!(
                "ingested {} products from {} partitions of `{bucket}`",
                report.products, report.partitions
            ),
            Some(details),
        ))
    });
    finish("ingest", result)
}

/// Polls the configured buckets until Ctrl-C.
pub fn watch() -> CommandResult {
    let config = match load_config("watch") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    if config.ingest.buckets.is_empty() {
        return CommandResult::failure(
            "watch",
            "config_validation",
            "ingest.buckets is empty; set RELATEDREC_INGEST_BUCKETS or [ingest].buckets",
            2,
        );
    }
    init_logging(&config);
    let runtime = match runtime("watch") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let mut pipeline = pipeline(&config, &pool);
        tracing::info!(
            event_name = "ingest.watch.started",
            buckets = ?pipeline.buckets(),
            poll_interval_secs = config.ingest.poll_interval_secs,
            "watching buckets for completed runs"
        );
        let runs = pipeline
            .watch(async {
                if let Err(error) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %error, "could not listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            })
            .await;
        pool.close().await;
        let message = format!("watch stopped after {runs} ingested runs");
        Ok::<_, StepError>(CommandResult::success("watch", message))
    });
    finish("watch", result)
}
