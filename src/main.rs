use std::process::ExitCode;

use clap::Parser;
use log::{error, warn};

use prodsim::cli::SubCommandExtend;
use prodsim::config::{Opts, SubCommand};
use prodsim::metrics;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    let result = match &opts.subcmd {
        SubCommand::Init(config) => config.run(&opts).await,
        SubCommand::Embed(config) => config.run(&opts).await,
        SubCommand::Extract(config) => config.run(&opts).await,
        SubCommand::Similar(config) => config.run(&opts).await,
        SubCommand::Rank(config) => config.run(&opts).await,
    };

    if let Some(url) = &opts.prometheus_push {
        if let Err(e) = metrics::push(url.clone(), opts.subcmd.name().to_owned()).await {
            warn!("failed to push metrics: {e:#}");
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
