//! mangaroo CLI: harvest a manga from its work page into an archive.
//!
//! Drives a headless browser through the work's chapters, downloads every
//! page image, and stores them in the configured archive backend.

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
