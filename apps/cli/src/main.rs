//! Tabdrome CLI: replays recorded browser tab events through the
//! synchronize → enrich → arrange pipeline and prints the resulting trees.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
