//! Error types for the Tether library

use thiserror::Error;
use std::path::PathBuf;

/// Main error type for Tether operations
#[derive(Debug, Error)]
pub enum TetherError {
    /// Config file missing
    #[error("No config found at {}. Run: tether init", path.display())]
    ConfigMissing {
        /// Path that was looked up
        path: PathBuf,
    },

    /// Config file unreadable or invalid
    #[error("Invalid config: {0}")]
    Config(String),

    /// Connection establishment or ssh invocation failed
    #[error(transparent)]
    Transport(#[from] tether_ssh::TransportError),

    /// Directory transfer failed
    #[error(transparent)]
    Sync(#[from] tether_ssh::SyncError),

    /// Password could not be obtained
    #[error("Password prompt failed: {0}")]
    Prompt(String),

    /// Change detection failed
    #[error("Watch error: {0}")]
    Watch(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for TetherError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
