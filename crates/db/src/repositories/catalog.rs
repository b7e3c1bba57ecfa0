use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use relatedrec_core::domain::catalog::{CatalogProduct, Price};
use relatedrec_core::domain::product::ProductId;
use relatedrec_core::domain::region::RegionScoreSet;

use super::recommendation::{from_db_count, from_json, placeholders, to_db_count, to_json};
use super::{
    ensure_batch_size, BatchGetOutput, CatalogRepository, RepositoryError, READ_BATCH_LIMIT,
};
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<CatalogProduct, RepositoryError> {
    let product_id: String =
        row.try_get("product_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let image_url: String =
        row.try_get("image_url").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let images_json: String = row
        .try_get("image_urls_by_color_json")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let parent_category: String =
        row.try_get("parent_category").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let available: bool =
        row.try_get("available").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let num_of_purchases: i64 =
        row.try_get("num_of_purchases").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let sales_json: String =
        row.try_get("sales_by_region_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let prices_json: String =
        row.try_get("prices_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let similar_json: String = row
        .try_get("similar_item_ids_json")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let image_urls_by_color: BTreeMap<String, String> =
        from_json("image_urls_by_color_json", &images_json)?;
    let prices: BTreeMap<String, Price> = from_json("prices_json", &prices_json)?;

    Ok(CatalogProduct {
        product_id: ProductId(product_id),
        name,
        image_url,
        image_urls_by_color,
        parent_category,
        available,
        num_of_purchases: from_db_count("num_of_purchases", num_of_purchases)?,
        sales_by_region: from_json("sales_by_region_json", &sales_json)?,
        prices,
        similar_item_ids: from_json("similar_item_ids_json", &similar_json)?,
    })
}

#[async_trait]
impl CatalogRepository for SqlCatalogRepository {
    async fn batch_get(
        &self,
        ids: &[ProductId],
    ) -> Result<BatchGetOutput<CatalogProduct>, RepositoryError> {
        ensure_batch_size(ids.len(), READ_BATCH_LIMIT)?;
        if ids.is_empty() {
            return Ok(BatchGetOutput::complete(Vec::new()));
        }

        let sql = format!(
            "SELECT product_id, name, image_url, image_urls_by_color_json, parent_category,
                    available, num_of_purchases, sales_by_region_json, prices_json,
                    similar_item_ids_json
             FROM catalog_product WHERE product_id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let items = rows.iter().map(row_to_product).collect::<Result<Vec<_>, _>>()?;
        Ok(BatchGetOutput::complete(items))
    }

    async fn update_sales(
        &self,
        id: &ProductId,
        num_of_purchases: u64,
        sales_by_region: &RegionScoreSet,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE catalog_product
             SET num_of_purchases = ?, sales_by_region_json = ?, updated_at = ?
             WHERE product_id = ?",
        )
        .bind(to_db_count(num_of_purchases))
        .bind(to_json(sales_by_region)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert(&self, product: CatalogProduct) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO catalog_product (product_id, name, image_url, image_urls_by_color_json,
                                          parent_category, available, num_of_purchases,
                                          sales_by_region_json, prices_json,
                                          similar_item_ids_json, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(product_id) DO UPDATE SET
                 name = excluded.name,
                 image_url = excluded.image_url,
                 image_urls_by_color_json = excluded.image_urls_by_color_json,
                 parent_category = excluded.parent_category,
                 available = excluded.available,
                 num_of_purchases = excluded.num_of_purchases,
                 sales_by_region_json = excluded.sales_by_region_json,
                 prices_json = excluded.prices_json,
                 similar_item_ids_json = excluded.similar_item_ids_json,
                 updated_at = excluded.updated_at",
        )
        .bind(product.product_id.as_str())
        .bind(&product.name)
        .bind(&product.image_url)
        .bind(to_json(&product.image_urls_by_color)?)
        .bind(&product.parent_category)
        .bind(product.available)
        .bind(to_db_count(product.num_of_purchases))
        .bind(to_json(&product.sales_by_region)?)
        .bind(to_json(&product.prices)?)
        .bind(to_json(&product.similar_item_ids)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
