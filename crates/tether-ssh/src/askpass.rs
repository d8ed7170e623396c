//! Password supply through a disposable `SSH_ASKPASS` helper
//!
//! ssh reads passwords from a terminal, never from its stdin. For a
//! backgrounded `ssh -fNM` there is no terminal, so the password is handed
//! over through a short-lived executable that ssh invokes as its prompt
//! program. The password never appears in an argument list.

use crate::TransportError;
use std::io::Write;
use std::path::Path;
use tempfile::TempPath;
use tracing::debug;

/// Environment variable naming the prompt program
pub const ASKPASS_VAR: &str = "SSH_ASKPASS";
/// Environment variable forcing ssh to use the prompt program
pub const ASKPASS_REQUIRE_VAR: &str = "SSH_ASKPASS_REQUIRE";

/// A temporary prompt program that prints one password.
///
/// The file is removed when the value is dropped, on every exit path.
#[derive(Debug)]
pub struct AskPass {
    path: TempPath,
}

impl AskPass {
    /// Write the helper script for `password`
    pub fn new(password: &str) -> Result<Self, TransportError> {
        let mut file = tempfile::Builder::new()
            .prefix("tether-askpass-")
            .suffix(".sh")
            .tempfile()
            .map_err(|e| TransportError::Credentials(format!("Failed to create askpass helper: {}", e)))?;

        write!(file, "#!/bin/sh\nprintf '%s\\n' {}\n", shell_words::quote(password))
            .and_then(|_| file.flush())
            .map_err(|e| TransportError::Credentials(format!("Failed to write askpass helper: {}", e)))?;

        // Closing the handle here avoids ETXTBSY when ssh executes the file
        let path = file.into_temp_path();
        restrict_to_owner(&path)?;

        debug!("Created askpass helper at {}", path.display());
        Ok(Self { path })
    }

    /// Location of the helper
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Variables to overlay on the ssh environment
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (ASKPASS_VAR.to_string(), self.path.to_string_lossy().to_string()),
            (ASKPASS_REQUIRE_VAR.to_string(), "force".to_string()),
        ];

        // Older OpenSSH releases ignore SSH_ASKPASS without a DISPLAY
        if std::env::var_os("DISPLAY").is_none() {
            env.push(("DISPLAY".to_string(), ":0".to_string()));
        }

        env
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<(), TransportError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| TransportError::Credentials(format!("Failed to set askpass permissions: {}", e)))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<(), TransportError> {
    Ok(())
}
