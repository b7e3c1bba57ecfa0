use std::sync::Arc;

use relatedrec_core::config::{AppConfig, ConfigError};
use relatedrec_db::batch::{BatchExecutor, RetryPolicy};
use relatedrec_db::repositories::{
    SqlCatalogRepository, SqlCustomerRepository, SqlRecommendationStore,
};
use relatedrec_db::{connect, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::recommend::RecommendState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub recommend: RecommendState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let recommend = RecommendState::new(
        Arc::new(SqlRecommendationStore::new(db_pool.clone())),
        Arc::new(SqlCatalogRepository::new(db_pool.clone())),
        Arc::new(SqlCustomerRepository::new(db_pool.clone())),
        BatchExecutor::new(RetryPolicy::from_config(&config.store)),
        &config.ranking,
    );

    Ok(Application { config, db_pool, recommend })
}
