use std::collections::BTreeMap;

use anyhow::{Context, Result, ensure};
use log::info;
use pgvector::Vector;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::validate_batch;
use crate::store::{EmbeddedProduct, Neighbor, VectorStore};

/// Embeddings in PostgreSQL with the pgvector extension.
///
/// Neighbors are ranked by the `<=>` cosine distance operator.
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("connecting to pgvector database");
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await
            .context("failed to connect to vector database")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl VectorStore for PgVectorStore {
    async fn ensure_schema(&self, dimension: usize) -> Result<()> {
        ensure!(dimension > 0, "embedding dimension must be positive");
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .context("failed to ensure pgvector extension")?;
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS product_embedding (
                product_id BIGINT PRIMARY KEY,
                embedding VECTOR({dimension}) NOT NULL
            )
            "#
        );
        sqlx::query(&ddl).execute(&self.pool).await.context("failed to create product_embedding")?;
        info!("product_embedding ready, dimension {dimension}");
        Ok(())
    }

    async fn upsert(&self, items: &[EmbeddedProduct]) -> Result<()> {
        if validate_batch(items)?.is_none() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO product_embedding (product_id, embedding)
                VALUES ($1, $2)
                ON CONFLICT (product_id)
                DO UPDATE SET embedding = EXCLUDED.embedding
                "#,
            )
            .bind(item.id)
            .bind(Vector::from(item.vector.clone()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!("upserted {} embeddings", items.len());
        Ok(())
    }

    async fn query_similar(
        &self,
        ids: &[i64],
        top_k: usize,
    ) -> Result<BTreeMap<i64, Vec<Neighbor>>> {
        let mut result = BTreeMap::new();
        for &id in ids {
            // an id without a row yields no rows here
            let rows: Vec<(i64, f64)> = sqlx::query_as(
                r#"
                WITH target AS (
                    SELECT embedding FROM product_embedding WHERE product_id = $1
                )
                SELECT e.product_id, e.embedding <=> target.embedding AS distance
                FROM product_embedding e, target
                WHERE e.product_id <> $1
                ORDER BY distance, e.product_id
                LIMIT $2
                "#,
            )
            .bind(id)
            .bind(top_k as i64)
            .fetch_all(&self.pool)
            .await?;
            let neighbors =
                rows.into_iter().map(|(id, distance)| Neighbor { id, distance }).collect();
            result.insert(id, neighbors);
        }
        Ok(result)
    }
}
