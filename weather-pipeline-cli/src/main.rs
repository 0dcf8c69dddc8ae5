//! Binary crate for the `weather-pipeline` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments and merging them over the config file
//! - Interactive configuration
//! - Triggering the pipeline once or on its schedule

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();

    let default_level = if cmd.global.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    cmd.run().await
}
