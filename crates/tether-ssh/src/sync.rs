//! rsync over the master connection

use crate::error::{SyncDirection, SyncError};
use crate::process::{CommandSpec, ProcessRunner};
use crate::transport::SshTransport;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Program used for directory transfers
pub const RSYNC_PROGRAM: &str = "rsync";

/// Per-directory ignore files honoured on push
pub const IGNORE_FILES: [&str; 2] = [".gitignore", ".ignore"];

/// Directory mirroring between a local tree and a remote path
pub struct Rsync<'t, R> {
    transport: &'t SshTransport<R>,
    timeout: Duration,
    mkdir_timeout: Duration,
}

impl<'t, R: ProcessRunner> Rsync<'t, R> {
    /// Transfers riding on `transport`
    pub fn new(transport: &'t SshTransport<R>) -> Self {
        Self {
            transport,
            timeout: Duration::from_secs(120),
            mkdir_timeout: Duration::from_secs(30),
        }
    }

    /// Override the transfer bound
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mirror the contents of `local_dir` into `remote_dir`.
    ///
    /// Remote files absent locally are deleted. Ignore files and `excludes`
    /// filter what is sent, excludes passed in order.
    pub async fn push(&self, local_dir: &Path, remote_dir: &str, excludes: &[String]) -> Result<(), SyncError> {
        let mkdir = format!("mkdir -p {}", shell_words::quote(remote_dir));
        match self.transport.capture(&mkdir, None, self.mkdir_timeout).await {
            Ok(output) if !output.success() => {
                warn!("mkdir of {} returned {}: {}", remote_dir, output.status, output.stderr.trim());
            }
            Ok(_) => {}
            Err(e) => warn!("mkdir of {} failed: {}", remote_dir, e),
        }

        let mut spec = CommandSpec::new(RSYNC_PROGRAM).args(["-az", "--delete"]);
        for ignore_file in IGNORE_FILES {
            spec = spec.arg(format!("--filter=:- {}", ignore_file));
        }
        for pattern in excludes {
            spec = spec.args(["--exclude", pattern.as_str()]);
        }
        let spec = spec
            .args(["-e".to_string(), self.transport.rsync_shell()])
            .arg(local_contents(local_dir))
            .arg(self.remote_contents(remote_dir));

        info!("Pushing {} to {}", local_dir.display(), remote_dir);
        self.run(&spec, SyncDirection::Push).await
    }

    /// Copy the contents of `remote_dir` into `local_dir`.
    ///
    /// Never deletes local files.
    pub async fn pull(&self, remote_dir: &str, local_dir: &Path) -> Result<(), SyncError> {
        let spec = CommandSpec::new(RSYNC_PROGRAM)
            .arg("-az")
            .args(["-e".to_string(), self.transport.rsync_shell()])
            .arg(self.remote_contents(remote_dir))
            .arg(local_contents(local_dir));

        info!("Pulling {} into {}", remote_dir, local_dir.display());
        self.run(&spec, SyncDirection::Pull).await
    }

    fn remote_contents(&self, remote_dir: &str) -> String {
        format!(
            "{}:{}/",
            self.transport.config().destination(),
            remote_dir.trim_end_matches('/')
        )
    }

    async fn run(&self, spec: &CommandSpec, direction: SyncDirection) -> Result<(), SyncError> {
        let output = self
            .transport
            .runner()
            .output(spec, self.timeout)
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::TimedOut {
                        direction,
                        after: self.timeout,
                    }
                } else {
                    SyncError::Transport(e)
                }
            })?;

        if !output.success() {
            return Err(SyncError::Failed {
                direction,
                code: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }

        debug!("rsync {} finished", direction);
        Ok(())
    }
}

/// `dir/` so rsync transfers the contents rather than the directory itself
fn local_contents(dir: &Path) -> String {
    let dir = dir.to_string_lossy();
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", trimmed)
    }
}
