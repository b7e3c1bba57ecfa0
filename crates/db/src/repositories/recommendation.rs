use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::Row;

use relatedrec_core::domain::product::ProductId;
use relatedrec_core::domain::record::RecommendationRecord;

use super::{
    ensure_batch_size, BatchGetOutput, RecommendationStore, RepositoryError, READ_BATCH_LIMIT,
    WRITE_BATCH_LIMIT,
};
use crate::DbPool;

const SELECT_COLUMNS: &str = "product_id, parent_category, image_url, num_of_purchases,
        co_purchased_json, co_viewed_json, sales_by_region_json";

pub struct SqlRecommendationStore {
    pool: DbPool,
}

impl SqlRecommendationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Encode(e.to_string()))
}

pub(crate) fn from_json<T: DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_db_count(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: negative count {value}")))
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<RecommendationRecord, RepositoryError> {
    let product_id: String =
        row.try_get("product_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let parent_category: String =
        row.try_get("parent_category").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let image_url: String =
        row.try_get("image_url").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let num_of_purchases: i64 =
        row.try_get("num_of_purchases").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let co_purchased_json: String =
        row.try_get("co_purchased_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let co_viewed_json: String =
        row.try_get("co_viewed_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let sales_by_region_json: String =
        row.try_get("sales_by_region_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(RecommendationRecord {
        product_id: ProductId(product_id),
        parent_category,
        image_url,
        num_of_purchases: from_db_count("num_of_purchases", num_of_purchases)?,
        co_purchased: from_json("co_purchased_json", &co_purchased_json)?,
        co_viewed: from_json("co_viewed_json", &co_viewed_json)?,
        sales_by_region: from_json("sales_by_region_json", &sales_by_region_json)?,
        ..RecommendationRecord::default()
    })
}

#[async_trait]
impl RecommendationStore for SqlRecommendationStore {
    async fn batch_get(
        &self,
        keys: &[ProductId],
    ) -> Result<BatchGetOutput<RecommendationRecord>, RepositoryError> {
        ensure_batch_size(keys.len(), READ_BATCH_LIMIT)?;
        if keys.is_empty() {
            return Ok(BatchGetOutput::complete(Vec::new()));
        }

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM product_recommendation WHERE product_id IN ({})",
            placeholders(keys.len())
        );
        let mut query = sqlx::query(&sql);
        for key in keys {
            query = query.bind(key.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let items = rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?;
        Ok(BatchGetOutput::complete(items))
    }

    async fn batch_put(
        &self,
        records: &[RecommendationRecord],
    ) -> Result<Vec<RecommendationRecord>, RepositoryError> {
        ensure_batch_size(records.len(), WRITE_BATCH_LIMIT)?;
        let updated_at = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO product_recommendation (product_id, parent_category, image_url,
                                                     num_of_purchases, co_purchased_json,
                                                     co_viewed_json, sales_by_region_json,
                                                     updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(product_id) DO UPDATE SET
                     parent_category = excluded.parent_category,
                     image_url = excluded.image_url,
                     num_of_purchases = excluded.num_of_purchases,
                     co_purchased_json = excluded.co_purchased_json,
                     co_viewed_json = excluded.co_viewed_json,
                     sales_by_region_json = excluded.sales_by_region_json,
                     updated_at = excluded.updated_at",
            )
            .bind(record.product_id.as_str())
            .bind(&record.parent_category)
            .bind(&record.image_url)
            .bind(to_db_count(record.num_of_purchases))
            .bind(to_json(&record.co_purchased)?)
            .bind(to_json(&record.co_viewed)?)
            .bind(to_json(&record.sales_by_region)?)
            .bind(&updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(Vec::new())
    }

    async fn get(&self, id: &ProductId) -> Result<Option<RecommendationRecord>, RepositoryError> {
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM product_recommendation WHERE product_id = ?");
        let row = sqlx::query(&sql).bind(id.as_str()).fetch_optional(&self.pool).await?;

        match row {
            Some(ref r) => Ok(Some(row_to_record(r)?)),
            None => Ok(None),
        }
    }
}
