//! Command-line arguments

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tether::ConnectionConfig;

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Edit locally, build and run on a remote host over one persistent SSH connection"
)]
pub struct Cli {
    /// Config file (defaults to ~/.config/tether/config.toml)
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Write a starter config
    Init {
        /// Remote host
        #[arg(long)]
        host: Option<String>,

        /// Remote login name
        #[arg(short, long)]
        user: Option<String>,

        /// Password to store (prompted for on every connect when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sync the current directory and run a command in its workspace
    Run {
        /// Skip the push, only make sure the workspace exists
        #[arg(long)]
        no_sync: bool,

        /// Command to run remotely
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Push the current directory to its workspace
    Sync,

    /// Copy the workspace back to a local directory
    Pull {
        /// Local destination (default: current directory)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },

    /// Interactive login shell in the workspace
    Ssh,

    /// Push and rerun a command whenever a local file changes
    Watch {
        /// Command to run remotely on every change
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Remove every remote workspace
    Clean,

    /// Show the config file path and contents
    Config,

    /// Close the shared SSH connection
    Disconnect,
}

impl Cli {
    /// Config file in effect
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => ConnectionConfig::default_path().context("Could not determine home directory"),
        }
    }
}

/// Remote command line from its tokens
pub fn command_line(tokens: &[String]) -> String {
    tokens.join(" ")
}
