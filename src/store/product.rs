use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::{debug, info};
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{AnyPool, Row};

use super::{Product, ProductStore};
use crate::predicate::Predicate;

/// The product catalog, MySQL in production and SQLite for local runs.
///
/// Predicates are interpolated into the `WHERE` clause, everything else is
/// bound as a parameter.
pub struct ProductDb {
    pool: AnyPool,
}

impl ProductDb {
    pub async fn connect(url: &str) -> Result<Self> {
        install_default_drivers();
        info!("connecting to product database");
        let pool = AnyPoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await
            .context("failed to connect to product database")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl ProductStore for ProductDb {
    async fn fetch_products(
        &self,
        predicate: &Predicate,
        page_size: usize,
        page: usize,
    ) -> Result<Vec<Product>> {
        let offset = page * page_size;
        let sql = format!(
            r#"
            SELECT id, main_image, status, primary_category_id, secondary_category_id
            FROM product
            WHERE {predicate}
            ORDER BY id
            LIMIT {page_size} OFFSET {offset}
            "#
        );
        debug!("fetching products: {predicate} (limit {page_size}, offset {offset})");

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(Product {
                    id: row.try_get("id")?,
                    image: row.try_get("main_image")?,
                    status: row.try_get("status")?,
                    primary_category_id: row.try_get("primary_category_id")?,
                    secondary_category_id: row.try_get("secondary_category_id")?,
                })
            })
            .collect()
    }

    async fn fetch_ids(&self, predicate: &Predicate) -> Result<Vec<i64>> {
        let sql = format!("SELECT id FROM product WHERE {predicate} ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.try_get("id")).collect::<Result<_, _>>()?)
    }

    async fn fetch_links(&self, id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT link FROM product WHERE id = ?")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        let mut links = vec![];
        for row in rows {
            if let Some(link) = row.try_get::<Option<String>, _>("link")? {
                if !link.is_empty() {
                    links.push(link);
                }
            }
        }
        Ok(links)
    }

    async fn write_similar_ids(&self, similar: &BTreeMap<i64, Vec<i64>>) -> Result<()> {
        if similar.is_empty() {
            return Ok(());
        }
        // dropping the transaction on error rolls it back
        let mut tx = self.pool.begin().await?;
        for (id, ids) in similar {
            sqlx::query("UPDATE product SET similar_ids = ? WHERE id = ?")
                .bind(serde_json::to_string(ids)?)
                .bind(*id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!("wrote similar ids for {} products", similar.len());
        Ok(())
    }
}
