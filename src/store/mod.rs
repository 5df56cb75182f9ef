use std::collections::BTreeMap;

use anyhow::Result;

pub mod model;
pub mod product;
pub mod vector;

pub use model::*;
pub use product::ProductDb;
pub use vector::{PgVectorStore, SqliteVectorStore, VectorDb};

use crate::predicate::Predicate;

/// Read access to the product catalog plus the similar-ids write-back
pub trait ProductStore {
    /// Returns one page of products, `page` counts from zero
    fn fetch_products(
        &self,
        predicate: &Predicate,
        page_size: usize,
        page: usize,
    ) -> impl Future<Output = Result<Vec<Product>>> + Send;

    fn fetch_ids(&self, predicate: &Predicate) -> impl Future<Output = Result<Vec<i64>>> + Send;

    /// Returns the non-empty links stored for a product
    fn fetch_links(&self, id: i64) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Overwrites `similar_ids` for every product in the map, all or nothing
    fn write_similar_ids(
        &self,
        similar: &BTreeMap<i64, Vec<i64>>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Storage for product embeddings with nearest-neighbor lookup
pub trait VectorStore {
    /// Creates the embedding table if needed
    fn ensure_schema(&self, dimension: usize) -> impl Future<Output = Result<()>> + Send;

    /// Inserts or replaces embeddings in one transaction
    fn upsert(&self, items: &[EmbeddedProduct]) -> impl Future<Output = Result<()>> + Send;

    /// Finds the `top_k` nearest other products for each id.
    ///
    /// Ids without a stored embedding map to an empty list.
    fn query_similar(
        &self,
        ids: &[i64],
        top_k: usize,
    ) -> impl Future<Output = Result<BTreeMap<i64, Vec<Neighbor>>>> + Send;
}
