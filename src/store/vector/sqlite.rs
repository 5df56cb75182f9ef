use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::validate_batch;
use crate::similarity::{self, SimilarityError};
use crate::store::{EmbeddedProduct, Neighbor, VectorStore};

/// Embeddings in a local SQLite file, ranked by brute force.
///
/// Vectors are stored as raw `f32` blobs together with their dimension. Meant
/// for local runs and small catalogs.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub async fn open(url: &str) -> Result<Self> {
        info!("opening sqlite vector store: {url}");

        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        // one writer per run, and `sqlite::memory:` only lives on one connection
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

        debug!("running vector store migrations");
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Dimension of the stored vectors, None while the table is empty
    async fn stored_dimension(&self) -> Result<Option<usize>> {
        let dim: Option<i64> = sqlx::query_scalar("SELECT dimension FROM product_embedding LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dim.map(|d| d as usize))
    }

    async fn load_all(&self) -> Result<BTreeMap<i64, Vec<f32>>> {
        let rows = sqlx::query("SELECT product_id, embedding FROM product_embedding")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("product_id")?;
                let blob: Vec<u8> = row.try_get("embedding")?;
                Ok((id, bytemuck::pod_collect_to_vec::<u8, f32>(&blob)))
            })
            .collect()
    }
}

impl VectorStore for SqliteVectorStore {
    async fn ensure_schema(&self, dimension: usize) -> Result<()> {
        // the table itself comes from the migration
        match self.stored_dimension().await? {
            Some(stored) if stored != dimension => {
                Err(SimilarityError::DimensionMismatch { expected: stored, found: dimension })
                    .context("vector store already holds embeddings of another dimension")
            }
            _ => Ok(()),
        }
    }

    async fn upsert(&self, items: &[EmbeddedProduct]) -> Result<()> {
        let Some(dim) = validate_batch(items)? else {
            return Ok(());
        };
        self.ensure_schema(dim).await?;

        let mut tx = self.pool.begin().await?;
        for item in items {
            let blob: &[u8] = bytemuck::cast_slice(&item.vector);
            sqlx::query(
                r#"
                INSERT INTO product_embedding (product_id, dimension, embedding)
                VALUES (?, ?, ?)
                ON CONFLICT (product_id)
                DO UPDATE SET dimension = excluded.dimension, embedding = excluded.embedding
                "#,
            )
            .bind(item.id)
            .bind(dim as i64)
            .bind(blob)
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
        let corpus = self.load_all().await?;
        let mut result = BTreeMap::new();
        for id in ids {
            let neighbors = match corpus.get(id) {
                Some(query) => similarity::nearest(id, query, &corpus, top_k)?
                    .into_iter()
                    .map(|(id, distance)| Neighbor { id, distance })
                    .collect(),
                None => vec![],
            };
            result.insert(*id, neighbors);
        }
        Ok(result)
    }
}
