//! satgrab CLI entrypoint.
//!
//! Provides a thin wrapper over the `cli` module: parse args, dispatch to
//! the `pull`, `pull-id` or `search` flow, and exit with appropriate status.
//! For programmatic use, prefer the library API (`satgrab::api`).

use clap::Parser;

mod cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();
    cli::run(args).await?;
    Ok(())
}
