//! External process execution
//!
//! Every call to `ssh`, `rsync` or `fswatch` goes through [`ProcessRunner`],
//! so the orchestration above it can be exercised without spawning anything.

use async_trait::async_trait;
use crate::TransportError;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// A single external program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Variables overlaid on the inherited environment
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Overlay an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Look up an overlaid environment variable
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Shell-quoted command line for logs
    pub fn display(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit status, see [`exit_code`]
    pub status: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ProcessOutput {
    /// Whether the process exited with status 0
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Capability to run external programs
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion with stdin closed and output captured.
    ///
    /// Returns [`TransportError::Timeout`] if `limit` elapses; the child is
    /// killed in that case.
    async fn output(&self, spec: &CommandSpec, limit: Duration) -> Result<ProcessOutput, TransportError>;

    /// Run with the terminal's stdio inherited and return the exit status.
    ///
    /// `None` waits for as long as the program runs.
    async fn status(&self, spec: &CommandSpec, limit: Option<Duration>) -> Result<i32, TransportError>;

    /// Whether `program` can be found on `PATH`
    fn which(&self, program: &str) -> bool;
}

/// Map an exit status to a shell-style integer.
///
/// A child killed by signal `N` reads as `128 + N`, the same value a remote
/// shell reports for a signalled command.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl TokioRunner {
    /// Create a new runner
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            // In-flight helpers die with the future that awaits them
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> TransportError {
        TransportError::Spawn {
            program: spec.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn output(&self, spec: &CommandSpec, limit: Duration) -> Result<ProcessOutput, TransportError> {
        debug!("Running: {}", spec.display());

        let child = Self::command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;

        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ProcessOutput {
                status: exit_code(&output.status),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::Timeout {
                operation: spec.display(),
                after: limit,
            }),
        }
    }

    async fn status(&self, spec: &CommandSpec, limit: Option<Duration>) -> Result<i32, TransportError> {
        debug!("Running attached: {}", spec.display());

        let mut child = Self::command(spec)
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;

        let status = match limit {
            Some(limit) => timeout(limit, child.wait())
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: spec.display(),
                    after: limit,
                })??,
            None => child.wait().await?,
        };

        Ok(exit_code(&status))
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
