//! # Tether
//!
//! Local editing, remote execution. Tether keeps one multiplexed SSH master
//! connection per endpoint alive across invocations, mirrors the working
//! directory into a stable per-project remote workspace with rsync, and runs
//! commands there, once or on every change.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use tether_ssh as ssh;

/// Error types for the Tether library
pub mod error;

/// Connection configuration
pub mod config;

/// Remote workspace naming
pub mod workspace;

/// Session management and connection handling
pub mod session;

/// Change-triggered sync and run
pub mod watch;

pub use error::TetherError;
pub use config::{AuthMethod, ConnectionConfig};
pub use workspace::{RemoteWorkspace, WORKSPACES_ROOT};
pub use session::{NoPrompt, PasswordSource, RunOptions, RunStep, SessionManager};
pub use watch::{ChangeDetector, EventDetector, PollDetector, WatchEvent, WatchLoop, WatchState};

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, TetherError>;
