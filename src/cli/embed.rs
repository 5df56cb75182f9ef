use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{EmbedderOptions, SelectionOptions};
use crate::pipeline::Pipeline;
use crate::utils::pb_style;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct EmbedCommand {
    #[command(flatten)]
    pub selection: SelectionOptions,
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    /// Products fetched per page
    #[arg(long, value_name = "SIZE", default_value_t = 5000)]
    pub page_size: usize,
    /// Stop after this many pages, by default run until the selection is exhausted
    #[arg(long, value_name = "N")]
    pub pages: Option<usize>,
}

impl SubCommandExtend for EmbedCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let embedder = self.embedder.build()?;
        let predicate = self.selection.predicate();
        info!("embedding products where {predicate}");

        let pb = match self.pages {
            Some(pages) => ProgressBar::new((pages * self.page_size) as u64),
            None => ProgressBar::no_length(),
        };
        let pipeline = Pipeline::new(
            opts.db.product_store().await?,
            opts.db.vector_store().await?,
            opts.db.resolver(),
        )
        .with_progress(pb.clone().with_style(pb_style()));

        let summary = pipeline
            .embed_pages(&embedder, &predicate, self.page_size, self.pages, self.embedder.size)
            .await;
        pb.finish();

        let (products, vectors) = pipeline.into_inner();
        products.close().await;
        vectors.close().await;

        let summary = summary?;
        info!(
            "embedded {} of {} products in {:.2}s",
            summary.embedded,
            summary.fetched,
            summary.elapsed.as_secs_f32()
        );
        Ok(())
    }
}
