use std::collections::BTreeMap;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::with_status;
use crate::pipeline::Pipeline;
use crate::predicate::{Predicate, parse_product_ids};
use crate::report::ids_to_links;
use crate::store::{ProductStore, VectorStore};
use crate::utils::pb_style;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    /// Raw SQL condition, may be repeated and each one is processed in turn
    #[arg(long = "where", value_name = "SQL")]
    pub conditions: Vec<String>,
    /// Comma separated product ids, used as given without the status filter.
    /// Takes precedence over --where
    #[arg(long, env = "PRODUCT_IDS", value_name = "IDS")]
    pub ids: Option<String>,
    /// Only products in this state, empty for any.
    /// Without --where or --ids all products still waiting for similar ids are processed.
    #[arg(long, default_value = "SALE", verbatim_doc_comment)]
    pub status: String,
    /// Number of similar products kept per product
    #[arg(long, value_name = "K", default_value_t = 20)]
    pub top_k: usize,
    /// Print the links of every product and its similar products
    #[arg(long)]
    pub check: bool,
}

impl ExtractCommand {
    fn predicates(&self) -> Vec<Predicate> {
        if let Some(ids) = &self.ids {
            vec![Predicate::ids(&parse_product_ids(ids))]
        } else if self.conditions.is_empty() {
            vec![with_status(Predicate::pending(), &self.status)]
        } else {
            self.conditions.iter().map(|c| with_status(Predicate::raw(c), &self.status)).collect()
        }
    }
}

impl SubCommandExtend for ExtractCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let pb = ProgressBar::no_length().with_style(pb_style());
        let pipeline = Pipeline::new(
            opts.db.product_store().await?,
            opts.db.vector_store().await?,
            opts.db.resolver(),
        )
        .with_progress(pb.clone());

        let result = run_extract(&pipeline, &self.predicates(), self.top_k, self.check).await;
        pb.finish();

        let (products, vectors) = pipeline.into_inner();
        products.close().await;
        vectors.close().await;

        let count = result?;
        info!("similar ids written for {count} products");
        Ok(())
    }
}

async fn run_extract<P: ProductStore, V: VectorStore>(
    pipeline: &Pipeline<P, V>,
    predicates: &[Predicate],
    top_k: usize,
    check: bool,
) -> Result<usize> {
    let similar = pipeline.extract_conditions(predicates, top_k).await?;
    if check {
        print_links(pipeline, &similar).await?;
    }
    Ok(similar.len())
}

async fn print_links<P: ProductStore, V: VectorStore>(
    pipeline: &Pipeline<P, V>,
    similar: &BTreeMap<i64, Vec<i64>>,
) -> Result<()> {
    let ids = similar.iter().flat_map(|(id, peers)| std::iter::once(*id).chain(peers.iter().copied()));
    let links = pipeline.links(ids.collect::<Vec<_>>()).await?;
    for (link, peers) in ids_to_links(similar, &links) {
        println!("{link}");
        for peer in peers {
            println!("\t{peer}");
        }
    }
    Ok(())
}
