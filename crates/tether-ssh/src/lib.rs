//! # Tether SSH Transport
//!
//! OpenSSH ControlMaster and rsync plumbing for Tether. Every external
//! program is started through [`ProcessRunner`].

#![warn(missing_docs)]

/// External process execution
pub mod process;

/// ControlMaster transport
pub mod transport;

/// Disposable password helper
pub mod askpass;

/// rsync directory transfers
pub mod sync;

/// SSH-specific error types
pub mod error;

/// Test doubles
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use process::{CommandSpec, ProcessOutput, ProcessRunner, TokioRunner};
pub use transport::{SshConfig, SshTransport, control_socket_path};
pub use askpass::AskPass;
pub use sync::Rsync;
pub use error::{SyncDirection, SyncError, TransportError};
