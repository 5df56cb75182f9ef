use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{EmbedderOptions, SelectionOptions};
use crate::embedder::Embedder;
use crate::pipeline::{BatchWindow, Pipeline};
use crate::report::{ids_to_links, write_report};
use crate::store::{ProductStore, VectorDb, VectorStore};
use crate::utils::pb_style;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct RankCommand {
    #[command(flatten)]
    pub selection: SelectionOptions,
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    /// Products ranked together
    #[arg(long, value_name = "SIZE", default_value_t = 500)]
    pub page_size: usize,
    /// Page of the selection to rank, counting from zero
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub page: usize,
    /// Length of the most and least similar lists
    #[arg(long, value_name = "K", default_value_t = 10)]
    pub top_k: usize,
    /// Directory receiving the report
    #[arg(long, value_name = "DIR", default_value = "save")]
    pub output_dir: PathBuf,
    /// Report file name prefix
    #[arg(long, value_name = "NAME", default_value = "extraction_sample")]
    pub name: String,
    /// Also write the most similar ids back to the catalog
    #[arg(long)]
    pub write_back: bool,
}

impl SubCommandExtend for RankCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let embedder = self.embedder.build()?;
        let window = BatchWindow::new(self.selection.predicate(), self.page_size, self.page);
        info!("ranking page {} of products where {}", window.page, window.predicate);

        let pb = ProgressBar::new(self.page_size as u64).with_style(pb_style());
        // ranking happens in memory, the vector store stays empty
        let vectors = VectorDb::connect("sqlite::memory:").await?;
        let pipeline = Pipeline::new(opts.db.product_store().await?, vectors, opts.db.resolver())
            .with_progress(pb.clone());

        let result = self.rank(&pipeline, &embedder, &window).await;
        pb.finish();

        let (products, vectors) = pipeline.into_inner();
        products.close().await;
        vectors.close().await;

        let path = result?;
        println!("{}", path.display());
        Ok(())
    }
}

impl RankCommand {
    async fn rank<P, V, E>(
        &self,
        pipeline: &Pipeline<P, V>,
        embedder: &E,
        window: &BatchWindow,
    ) -> Result<PathBuf>
    where
        P: ProductStore,
        V: VectorStore,
        E: Embedder + Sync,
    {
        let ranking = pipeline.rank_local(embedder, window, self.embedder.size, self.top_k).await?;
        if self.write_back {
            pipeline.products().write_similar_ids(&ranking.most_similar).await?;
        }

        let links = pipeline.links(ranking.similarities.keys().copied().collect::<Vec<_>>()).await?;
        let similar = ids_to_links(&ranking.most_similar, &links);
        let dissimilar = ids_to_links(&ranking.least_similar, &links);
        write_report(&self.output_dir, &self.name, &similar, &dissimilar)
    }
}
