use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::store::VectorStore;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct InitCommand {
    /// Length of the embedding vectors
    #[arg(long, value_name = "N", default_value_t = 1024)]
    pub dimension: usize,
}

impl SubCommandExtend for InitCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let vectors = opts.db.vector_store().await?;
        vectors.ensure_schema(self.dimension).await?;
        vectors.close().await;
        info!("vector store initialized");
        Ok(())
    }
}
