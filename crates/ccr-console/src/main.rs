mod cli_args;
mod startup;

use anyhow::Result;
use clap::Parser;

use crate::cli_args::Cli;
use crate::startup::{init_tracing, run_cli};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    run_cli(Cli::parse()).await
}
