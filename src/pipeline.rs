use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info};

use crate::embedder::{Embedder, ImageSource};
use crate::metrics;
use crate::predicate::Predicate;
use crate::resolver::ImageResolver;
use crate::similarity::{calculate_similarity, select_extremes};
use crate::store::{EmbeddedProduct, Neighbor, Product, ProductStore, VectorStore};

/// One page of products to process
#[derive(Debug, Clone)]
pub struct BatchWindow {
    pub predicate: Predicate,
    pub page_size: usize,
    /// Zero based, offset is `page * page_size`
    pub page: usize,
}

impl BatchWindow {
    pub fn new(predicate: Predicate, page_size: usize, page: usize) -> Self {
        Self { predicate, page_size, page }
    }
}

/// Counters of an embed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedSummary {
    /// Products returned by the product store
    pub fetched: usize,
    /// Products without a usable image url
    pub unresolved: usize,
    pub embedded: usize,
    /// Products whose image failed to embed
    pub failed: usize,
    pub elapsed: Duration,
}

impl EmbedSummary {
    fn merge(&mut self, other: &EmbedSummary) {
        self.fetched += other.fetched;
        self.unresolved += other.unresolved;
        self.embedded += other.embedded;
        self.failed += other.failed;
        self.elapsed += other.elapsed;
    }
}

/// Result of ranking a window in memory
#[derive(Debug, Clone, Default)]
pub struct LocalRanking {
    pub products: Vec<Product>,
    /// Every embedded product against every other, ascending distance
    pub similarities: BTreeMap<i64, Vec<(i64, f64)>>,
    pub most_similar: BTreeMap<i64, Vec<i64>>,
    pub least_similar: BTreeMap<i64, Vec<i64>>,
}

/// Drives product store, embedder and vector store through batch windows.
///
/// Everything runs sequentially: one window after another, one image after
/// another inside a window.
pub struct Pipeline<P, V> {
    products: P,
    vectors: V,
    resolver: ImageResolver,
    pb: ProgressBar,
}

impl<P: ProductStore, V: VectorStore> Pipeline<P, V> {
    pub fn new(products: P, vectors: V, resolver: ImageResolver) -> Self {
        Self { products, vectors, resolver, pb: ProgressBar::hidden() }
    }

    /// Reports processed products on this progress bar
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    pub fn products(&self) -> &P {
        &self.products
    }

    pub fn vectors(&self) -> &V {
        &self.vectors
    }

    pub fn into_inner(self) -> (P, V) {
        (self.products, self.vectors)
    }

    /// Fetches, resolves and embeds one window, then upserts the vectors.
    ///
    /// Items that fail to embed are dropped; store errors abort the window.
    pub async fn embed_window<E>(
        &self,
        embedder: &E,
        window: &BatchWindow,
        size: (u32, u32),
    ) -> Result<EmbedSummary>
    where
        E: Embedder + Sync,
    {
        let start = Instant::now();
        let (products, sources) = self.fetch_sources(window).await?;
        let requested = sources.len();

        let embedded = embedder.embed_batch(sources, size).await;
        if !embedded.is_empty() {
            self.vectors.upsert(&embedded).await.context("failed to upsert embeddings")?;
        }

        let summary = EmbedSummary {
            fetched: products.len(),
            unresolved: products.len() - requested,
            embedded: embedded.len(),
            failed: requested - embedded.len(),
            elapsed: start.elapsed(),
        };
        self.pb.inc(products.len() as u64);
        metrics::observe_window("embed", summary.elapsed.as_secs_f64());
        info!(
            "page {}: {} fetched, {} embedded, {} failed, {} without image ({:.2}s)",
            window.page,
            summary.fetched,
            summary.embedded,
            summary.failed,
            summary.unresolved,
            summary.elapsed.as_secs_f32()
        );
        Ok(summary)
    }

    /// Runs [`Self::embed_window`] page after page until a short page or
    /// `max_pages` is reached
    pub async fn embed_pages<E>(
        &self,
        embedder: &E,
        predicate: &Predicate,
        page_size: usize,
        max_pages: Option<usize>,
        size: (u32, u32),
    ) -> Result<EmbedSummary>
    where
        E: Embedder + Sync,
    {
        let mut total = EmbedSummary::default();
        let page_size = page_size.max(1);
        for page in 0.. {
            if max_pages.is_some_and(|max| page >= max) {
                break;
            }
            let window = BatchWindow::new(predicate.clone(), page_size, page);
            let summary = self.embed_window(embedder, &window, size).await?;
            total.merge(&summary);
            if summary.fetched < page_size {
                break;
            }
        }
        info!(
            "embedding done: {} fetched, {} embedded, {} failed, {} without image",
            total.fetched, total.embedded, total.failed, total.unresolved
        );
        Ok(total)
    }

    /// Nearest neighbors from the vector store, without writing anything
    pub async fn similar(&self, ids: &[i64], top_k: usize) -> Result<BTreeMap<i64, Vec<Neighbor>>> {
        self.vectors.query_similar(ids, top_k).await.context("failed to query similar products")
    }

    /// Queries the `top_k` neighbors of every id and writes the id lists back
    /// in one transaction.
    ///
    /// Ids without an embedding get an empty list.
    pub async fn extract_ids(&self, ids: &[i64], top_k: usize) -> Result<BTreeMap<i64, Vec<i64>>> {
        if ids.is_empty() {
            info!("no products to extract");
            return Ok(BTreeMap::new());
        }
        let start = Instant::now();
        let neighbors = self.similar(ids, top_k).await?;

        let similar = ids
            .iter()
            .map(|id| {
                let list = neighbors.get(id).map(|n| n.iter().map(|x| x.id).collect());
                (*id, list.unwrap_or_default())
            })
            .collect::<BTreeMap<_, _>>();

        self.products.write_similar_ids(&similar).await.context("failed to write similar ids")?;

        self.pb.inc(similar.len() as u64);
        metrics::inc_write_back(similar.len());
        metrics::observe_window("extract", start.elapsed().as_secs_f64());
        info!(
            "extracted similar products for {} ids ({:.2}s)",
            similar.len(),
            start.elapsed().as_secs_f32()
        );
        Ok(similar)
    }

    /// [`Self::extract_ids`] for every product matching the predicate
    pub async fn extract_predicate(
        &self,
        predicate: &Predicate,
        top_k: usize,
    ) -> Result<BTreeMap<i64, Vec<i64>>> {
        let ids = self.products.fetch_ids(predicate).await.context("failed to fetch product ids")?;
        info!("{} products match: {predicate}", ids.len());
        self.extract_ids(&ids, top_k).await
    }

    /// Runs [`Self::extract_predicate`] for each predicate in turn, stopping at
    /// the first error
    pub async fn extract_conditions(
        &self,
        predicates: &[Predicate],
        top_k: usize,
    ) -> Result<BTreeMap<i64, Vec<i64>>> {
        let mut all = BTreeMap::new();
        for predicate in predicates {
            let similar = self.extract_predicate(predicate, top_k).await?;
            all.extend(similar);
        }
        Ok(all)
    }

    /// Embeds one window and ranks it in memory.
    ///
    /// Nothing is written to the vector store. `k` bounds both the most and
    /// the least similar lists.
    pub async fn rank_local<E>(
        &self,
        embedder: &E,
        window: &BatchWindow,
        size: (u32, u32),
        k: usize,
    ) -> Result<LocalRanking>
    where
        E: Embedder + Sync,
    {
        let (products, sources) = self.fetch_sources(window).await?;
        let embedded = embedder.embed_batch(sources, size).await;
        self.pb.inc(products.len() as u64);
        info!("ranking {} embedded products of {}", embedded.len(), products.len());

        let embeddings = embedded
            .into_iter()
            .map(|EmbeddedProduct { id, vector }| (id, vector))
            .collect::<BTreeMap<_, _>>();
        let similarities = calculate_similarity(&embeddings)?;
        let (most_similar, least_similar) = select_extremes(&similarities, k);

        Ok(LocalRanking { products, similarities, most_similar, least_similar })
    }

    /// First link of every product that has one
    pub async fn links(&self, ids: impl IntoIterator<Item = i64>) -> Result<BTreeMap<i64, String>> {
        let mut links = BTreeMap::new();
        for id in ids {
            if links.contains_key(&id) {
                continue;
            }
            if let Some(link) = self.products.fetch_links(id).await?.into_iter().next() {
                links.insert(id, link);
            }
        }
        Ok(links)
    }

    async fn fetch_sources(&self, window: &BatchWindow) -> Result<(Vec<Product>, Vec<ImageSource>)> {
        let products = self
            .products
            .fetch_products(&window.predicate, window.page_size, window.page)
            .await
            .context("failed to fetch products")?;

        let mut sources = Vec::with_capacity(products.len());
        for product in &products {
            match self.resolver.resolve(product.image.as_deref()) {
                Some(url) => sources.push(ImageSource { id: product.id, url }),
                None => debug!("product {} has no image url", product.id),
            }
        }
        Ok((products, sources))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::anyhow;
    use rstest::*;
    use sqlx::Row;
    use tempfile::TempDir;

    use super::*;
    use crate::store::{ProductDb, SqliteVectorStore};

    /// Looks vectors up by url, unknown urls fail
    struct TableEmbedder(HashMap<String, Vec<f32>>);

    impl Embedder for TableEmbedder {
        async fn embed_one(&self, url: &str, _size: (u32, u32)) -> Result<Vec<f32>> {
            self.0.get(url).cloned().ok_or_else(|| anyhow!("no image at {url}"))
        }
    }

    fn embedder() -> TableEmbedder {
        let table = [
            (1, vec![1., 0., 0.]),
            (2, vec![0.9, 0.1, 0.]),
            (4, vec![0., 0., 1.]),
            (5, vec![0.8, 0.2, 0.]),
        ];
        TableEmbedder(
            table
                .into_iter()
                .map(|(id, v)| (format!("https://cdn.example.com/p/{id}.jpg"), v))
                .collect(),
        )
    }

    async fn open(dir: &TempDir) -> Pipeline<ProductDb, SqliteVectorStore> {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("product.db").display());
        let products = ProductDb::connect(&url).await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE product (
                id INTEGER PRIMARY KEY,
                main_image TEXT,
                status TEXT,
                primary_category_id INTEGER,
                secondary_category_id INTEGER,
                link TEXT,
                similar_ids TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(products.pool())
        .await
        .unwrap();
        // product 3 has no image, product 6 has an image nobody can embed
        for id in 1..=6i64 {
            let image = (id != 3).then(|| format!("p/{id}.jpg"));
            sqlx::query("INSERT INTO product (id, main_image, status, link) VALUES (?, ?, 'SALE', ?)")
                .bind(id)
                .bind(image)
                .bind(format!("https://shop.example.com/{id}"))
                .execute(products.pool())
                .await
                .unwrap();
        }

        let vector_url = format!("sqlite://{}", dir.path().join("vector.db").display());
        let vectors = SqliteVectorStore::open(&vector_url).await.unwrap();
        Pipeline::new(products, vectors, ImageResolver::new(Some("cdn.example.com".into())))
    }

    async fn similar_ids(pipeline: &Pipeline<ProductDb, SqliteVectorStore>, id: i64) -> String {
        sqlx::query("SELECT similar_ids FROM product WHERE id = ?")
            .bind(id)
            .fetch_one(pipeline.products().pool())
            .await
            .unwrap()
            .get("similar_ids")
    }

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[rstest]
    #[tokio::test]
    async fn test_embed_window(temp_dir: TempDir) {
        let pipeline = open(&temp_dir).await;
        let window = BatchWindow::new(Predicate::raw("1 = 1"), 10, 0);

        let summary = pipeline.embed_window(&embedder(), &window, (224, 224)).await.unwrap();

        assert_eq!(summary.fetched, 6);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.embedded, 4);
        assert_eq!(summary.failed, 1);

        let result = pipeline.similar(&[1, 3, 6], 10).await.unwrap();
        assert_eq!(result[&1].iter().map(|n| n.id).collect::<Vec<_>>(), vec![2, 5, 4]);
        assert!(result[&3].is_empty());
        assert!(result[&6].is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_embed_pages_stops_on_short_page(temp_dir: TempDir) {
        let pipeline = open(&temp_dir).await;
        let all = Predicate::raw("1 = 1");

        let summary = pipeline.embed_pages(&embedder(), &all, 4, None, (224, 224)).await.unwrap();
        assert_eq!(summary.fetched, 6);
        assert_eq!(summary.embedded, 4);

        let summary = pipeline.embed_pages(&embedder(), &all, 2, Some(1), (224, 224)).await.unwrap();
        assert_eq!(summary.fetched, 2);
    }

    #[rstest]
    #[tokio::test]
    async fn test_window_past_the_end(temp_dir: TempDir) {
        let pipeline = open(&temp_dir).await;
        let window = BatchWindow::new(Predicate::raw("1 = 1"), 10, 3);
        let summary = pipeline.embed_window(&embedder(), &window, (224, 224)).await.unwrap();
        assert_eq!(summary, EmbedSummary { elapsed: summary.elapsed, ..Default::default() });
    }

    #[rstest]
    #[tokio::test]
    async fn test_extract_ids_writes_back(temp_dir: TempDir) {
        let pipeline = open(&temp_dir).await;
        let window = BatchWindow::new(Predicate::raw("1 = 1"), 10, 0);
        pipeline.embed_window(&embedder(), &window, (224, 224)).await.unwrap();

        let similar = pipeline.extract_ids(&[1, 3], 2).await.unwrap();
        assert_eq!(similar[&1], vec![2, 5]);
        assert!(similar[&3].is_empty());

        assert_eq!(similar_ids(&pipeline, 1).await, "[2,5]");
        assert_eq!(similar_ids(&pipeline, 3).await, "[]");
        assert_eq!(similar_ids(&pipeline, 2).await, "[]");

        // nothing to do is not an error
        assert!(pipeline.extract_ids(&[], 2).await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_extract_conditions(temp_dir: TempDir) {
        let pipeline = open(&temp_dir).await;
        let window = BatchWindow::new(Predicate::raw("1 = 1"), 10, 0);
        pipeline.embed_window(&embedder(), &window, (224, 224)).await.unwrap();

        let predicates = [Predicate::ids(&[4]), Predicate::ids(&[5]).with_status("SALE")];
        let similar = pipeline.extract_conditions(&predicates, 1).await.unwrap();
        assert_eq!(similar.keys().copied().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(similar[&5], vec![2]);

        // everything embedded but 3 and 6 is no longer pending
        let pending = pipeline.extract_predicate(&Predicate::pending(), 1).await.unwrap();
        assert_eq!(pending.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 6]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_rank_local(temp_dir: TempDir) {
        let pipeline = open(&temp_dir).await;
        let window = BatchWindow::new(Predicate::raw("1 = 1"), 10, 0);

        let ranking = pipeline.rank_local(&embedder(), &window, (224, 224), 1).await.unwrap();

        assert_eq!(ranking.products.len(), 6);
        assert_eq!(ranking.similarities.keys().copied().collect::<Vec<_>>(), vec![1, 2, 4, 5]);
        assert_eq!(ranking.similarities[&1].len(), 3);
        assert_eq!(ranking.most_similar[&1], vec![2]);
        assert_eq!(ranking.least_similar[&1], vec![4]);

        // the vector store is left alone
        assert!(pipeline.similar(&[1], 10).await.unwrap()[&1].is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_links(temp_dir: TempDir) {
        let pipeline = open(&temp_dir).await;
        let links = pipeline.links([2, 2, 99]).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[&2], "https://shop.example.com/2");
    }
}
