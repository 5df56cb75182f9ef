use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::cli::SubCommandExtend;
use crate::pipeline::Pipeline;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct SimilarCommand {
    /// Products to look up
    #[arg(required = true)]
    pub ids: Vec<i64>,
    /// Number of neighbors per product
    #[arg(long, value_name = "K", default_value_t = 10)]
    pub top_k: usize,
    /// Output format
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct SimilarRow {
    id: i64,
    distance: f64,
    link: Option<String>,
}

impl SubCommandExtend for SimilarCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let pipeline = Pipeline::new(
            opts.db.product_store().await?,
            opts.db.vector_store().await?,
            opts.db.resolver(),
        );

        let result = async {
            let neighbors = pipeline.similar(&self.ids, self.top_k).await?;
            let ids = neighbors.values().flatten().map(|n| n.id).collect::<Vec<_>>();
            let links = pipeline.links(ids).await?;
            let rows = neighbors
                .into_iter()
                .map(|(id, list)| {
                    let rows = list
                        .into_iter()
                        .map(|n| SimilarRow { id: n.id, distance: n.distance, link: links.get(&n.id).cloned() })
                        .collect::<Vec<_>>();
                    (id, rows)
                })
                .collect::<std::collections::BTreeMap<_, _>>();
            anyhow::Ok(rows)
        }
        .await;

        let (products, vectors) = pipeline.into_inner();
        products.close().await;
        vectors.close().await;

        let rows = result?;
        match self.output_format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&rows)?)
            }
            OutputFormat::Table => {
                for (id, list) in &rows {
                    println!("{id}");
                    for row in list {
                        println!("{:.4}\t{}\t{}", row.distance, row.id, row.link.as_deref().unwrap_or("-"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
