//! xlxc-create entry point.

use clap::Parser;
use color_eyre::eyre::Result;

use xlxc::cli::{CreateCli, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = CreateCli::parse();

    // Initialize tracing
    init_tracing(cli.common.debug)?;

    // Execute command
    cli.execute().await
}
