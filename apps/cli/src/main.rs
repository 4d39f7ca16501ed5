//! diplomagen CLI: turn a graduate spreadsheet into a merged diploma document.
//!
//! Runs the same background task pipeline a server would, relaying its
//! progress to a terminal bar or to stdout as server-sent events.

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
