//! Tether Binary
//!
//! Front end for remote development sessions: loads the config, drives the
//! session manager and maps every outcome to a process exit code.

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod output;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise warnings only, or debug with -v
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match commands::dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            debug!("{:?}", e);
            output::error(format!("{:#}", e));
            1
        }
    };

    std::process::exit(code);
}
