//! SSH-specific error types

use thiserror::Error;
use std::io;
use std::time::Duration;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// External program could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying spawn error
        #[source]
        source: io::Error,
    },

    /// Bounded operation did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that was running
        operation: String,
        /// Bound that was exceeded
        after: Duration,
    },

    /// Control master could not be established
    #[error("SSH connection failed: {reason}")]
    Connect {
        /// Short description of the failure
        reason: String,
        /// Raw stderr captured from ssh
        stderr: String,
    },

    /// Password helper could not be prepared
    #[error("Credential supply failed: {0}")]
    Credentials(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether this error came from an elapsed bound rather than a rejection
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Direction of a directory transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Local tree mirrored to the remote workspace
    Push,
    /// Remote workspace copied into a local directory
    Pull,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::Pull => f.write_str("pull"),
        }
    }
}

/// rsync failures
#[derive(Debug, Error)]
pub enum SyncError {
    /// rsync exited non-zero
    #[error("rsync {direction} failed with exit code {code}: {stderr}")]
    Failed {
        /// Transfer direction
        direction: SyncDirection,
        /// rsync exit status
        code: i32,
        /// Captured stderr
        stderr: String,
    },

    /// rsync did not finish within the transfer bound
    #[error("rsync {direction} timed out after {after:?}")]
    TimedOut {
        /// Transfer direction
        direction: SyncDirection,
        /// Bound that was exceeded
        after: Duration,
    },

    /// rsync could not be run at all
    #[error(transparent)]
    Transport(#[from] TransportError),
}
