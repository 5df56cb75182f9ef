pub mod cli;
pub mod config;
pub mod embedder;
pub mod metrics;
pub mod pipeline;
pub mod predicate;
pub mod report;
pub mod resolver;
pub mod similarity;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use pipeline::{BatchWindow, Pipeline};
pub use resolver::ImageResolver;
