use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use relatedrec_core::domain::customer::{Customer, CustomerId};

use super::recommendation::{from_json, to_json};
use super::{CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row =
            sqlx::query("SELECT customer_id, color_prefs_json FROM customer WHERE customer_id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let customer_id: String =
            row.try_get("customer_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let color_prefs_json: String =
            row.try_get("color_prefs_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;

        Ok(Some(Customer {
            customer_id: CustomerId(customer_id),
            color_prefs: from_json("color_prefs_json", &color_prefs_json)?,
        }))
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer (customer_id, color_prefs_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(customer_id) DO UPDATE SET
                 color_prefs_json = excluded.color_prefs_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&customer.customer_id.0)
        .bind(to_json(&customer.color_prefs)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use relatedrec_core::domain::customer::{Customer, CustomerId};

    use super::SqlCustomerRepository;
    use crate::repositories::CustomerRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn sql_customer_repo_round_trip() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlCustomerRepository::new(pool);

        let customer = Customer {
            customer_id: CustomerId::from("C-1"),
            color_prefs: vec!["navy".to_string(), "ivory".to_string()],
        };
        repo.save(customer.clone()).await.expect("save");

        assert_eq!(repo.find_by_id(&CustomerId::from("C-1")).await.expect("find"), Some(customer));
        assert_eq!(repo.find_by_id(&CustomerId::from("C-2")).await.expect("find"), None);
    }
}
