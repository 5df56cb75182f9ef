use std::collections::BTreeMap;

use anyhow::{Result, bail};

mod postgres;
mod sqlite;

pub use postgres::PgVectorStore;
pub use sqlite::SqliteVectorStore;

use super::{EmbeddedProduct, Neighbor, VectorStore};
use crate::similarity::{SimilarityError, checked_norm};

/// Vector store selected by URL scheme
pub enum VectorDb {
    Postgres(PgVectorStore),
    Sqlite(SqliteVectorStore),
}

impl VectorDb {
    /// `postgres://` uses pgvector, `sqlite:` the local brute-force store
    pub async fn connect(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres(PgVectorStore::connect(url).await?))
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite(SqliteVectorStore::open(url).await?))
        } else {
            bail!("unsupported vector database url, expected postgres:// or sqlite:")
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Postgres(store) => store.close().await,
            Self::Sqlite(store) => store.close().await,
        }
    }
}

impl VectorStore for VectorDb {
    async fn ensure_schema(&self, dimension: usize) -> Result<()> {
        match self {
            Self::Postgres(store) => store.ensure_schema(dimension).await,
            Self::Sqlite(store) => store.ensure_schema(dimension).await,
        }
    }

    async fn upsert(&self, items: &[EmbeddedProduct]) -> Result<()> {
        match self {
            Self::Postgres(store) => store.upsert(items).await,
            Self::Sqlite(store) => store.upsert(items).await,
        }
    }

    async fn query_similar(
        &self,
        ids: &[i64],
        top_k: usize,
    ) -> Result<BTreeMap<i64, Vec<Neighbor>>> {
        match self {
            Self::Postgres(store) => store.query_similar(ids, top_k).await,
            Self::Sqlite(store) => store.query_similar(ids, top_k).await,
        }
    }
}

/// Rejects a batch before anything is written: every vector must be finite
/// and non-zero, and all of them must share one dimension. Returns that
/// dimension.
fn validate_batch(items: &[EmbeddedProduct]) -> Result<Option<usize>, SimilarityError> {
    let Some(first) = items.first() else {
        return Ok(None);
    };
    let dim = first.vector.len();
    for item in items {
        if item.vector.len() != dim {
            return Err(SimilarityError::DimensionMismatch { expected: dim, found: item.vector.len() });
        }
        checked_norm(&item.vector)?;
    }
    Ok(Some(dim))
}
