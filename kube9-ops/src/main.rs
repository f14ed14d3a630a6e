use anyhow::Result;
use clap::Parser;

mod args;
mod normalize;
mod reap;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    kube9_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ReapPodNetworks(args) => reap::run(args).await,
        Commands::NormalizeNodePorts(args) => normalize::run(args).await,
    }
}
