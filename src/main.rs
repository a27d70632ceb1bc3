mod analysis;
mod cli;
mod config;
mod error;
mod ingest;
mod model;
mod orchestrator;
mod output;
mod query;
mod store;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting ciscope - CI Pipeline Analysis Engine");
    cli.execute().await?;

    Ok(())
}
