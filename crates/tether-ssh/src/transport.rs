//! OpenSSH ControlMaster transport
//!
//! One multiplexed master connection per `user@host:port`, addressed by a
//! deterministic control socket so separate invocations converge on it.
//! Liveness is always asked of ssh itself (`-O check`), never cached.

use crate::askpass::AskPass;
use crate::process::{CommandSpec, ProcessOutput, ProcessRunner};
use crate::TransportError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Program used for every remote operation
pub const SSH_PROGRAM: &str = "ssh";

/// SSH configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port (default: 22)
    pub port: u16,
    /// Username
    pub username: String,
    /// SSH key path, already expanded
    pub key_path: Option<PathBuf>,
    /// Control socket of the master connection
    pub control_path: PathBuf,
    /// How long an idle master stays up
    pub control_persist: Duration,
    /// Extra `-o` options
    pub options: BTreeMap<String, String>,
    /// Bound on `-O check`
    pub check_timeout: Duration,
    /// Bound on establishing the master
    pub connect_timeout: Duration,
    /// Bound on `-O exit`
    pub close_timeout: Duration,
}

impl SshConfig {
    /// Configuration for `username@host:port` with default bounds
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        let host = host.into();
        let username = username.into();
        let control_path = control_socket_path(Path::new("/tmp"), &username, &host, port);

        let mut options = BTreeMap::new();
        options.insert("ServerAliveInterval".to_string(), "60".to_string());
        options.insert("ServerAliveCountMax".to_string(), "3".to_string());
        options.insert("StrictHostKeyChecking".to_string(), "accept-new".to_string());

        Self {
            host,
            port,
            username,
            key_path: None,
            control_path,
            control_persist: Duration::from_secs(30 * 60),
            options,
            check_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
        }
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

/// Control socket for `user@host:port` inside `dir`.
///
/// The name depends only on the endpoint, so any process targeting the same
/// endpoint finds the same master.
pub fn control_socket_path(dir: &Path, username: &str, host: &str, port: u16) -> PathBuf {
    dir.join(format!("tether-{}@{}-{}", username, host, port))
}

/// SSH transport driving the system `ssh` binary
pub struct SshTransport<R> {
    /// SSH configuration
    config: SshConfig,
    /// Process runner
    runner: R,
    /// Whether stdin is a terminal
    terminal: bool,
}

impl<R: ProcessRunner> SshTransport<R> {
    /// Create a new transport
    pub fn new(config: SshConfig, runner: R) -> Self {
        use std::io::IsTerminal;

        Self {
            config,
            runner,
            terminal: std::io::stdin().is_terminal(),
        }
    }

    /// Override terminal detection
    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    /// SSH configuration
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Process runner
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Options shared by every ssh invocation
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ControlPath={}", self.config.control_path.display()),
        ];

        for (key, value) in &self.config.options {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push("-p".to_string());
        args.push(self.config.port.to_string());
        args
    }

    /// Authentication options
    fn auth_args(&self) -> Vec<String> {
        match &self.config.key_path {
            Some(key_path) => vec!["-i".to_string(), key_path.to_string_lossy().to_string()],
            None => Vec::new(),
        }
    }

    fn control_command(&self, operation: &str) -> CommandSpec {
        CommandSpec::new(SSH_PROGRAM)
            .args(["-O", operation])
            .args(self.base_args())
            .arg(self.config.destination())
    }

    /// The `-e` value rsync needs to ride on the master connection
    pub fn rsync_shell(&self) -> String {
        shell_words::join(
            std::iter::once(SSH_PROGRAM.to_string())
                .chain(self.base_args())
                .chain(self.auth_args()),
        )
    }

    /// Whether a master connection is up for this endpoint.
    ///
    /// Never fails: a timeout or a missing ssh binary reads as "not alive".
    pub async fn check_alive(&self) -> bool {
        let spec = self.control_command("check");
        match self.runner.output(&spec, self.config.check_timeout).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Control master check failed: {}", e);
                false
            }
        }
    }

    /// Establish the master connection unless one is already up.
    ///
    /// With a password, ssh is started without a terminal and reads it from
    /// an [`AskPass`] helper that is gone by the time this returns.
    pub async fn open(&self, password: Option<&str>) -> Result<(), TransportError> {
        if self.check_alive().await {
            debug!("Reusing control master at {}", self.config.control_path.display());
            return Ok(());
        }

        self.establish(password).await
    }

    /// Start a new master connection without checking for an existing one.
    ///
    /// Callers must have seen [`check_alive`](Self::check_alive) return false.
    pub async fn establish(&self, password: Option<&str>) -> Result<(), TransportError> {
        if let Some(key_path) = &self.config.key_path {
            std::fs::File::open(key_path).map_err(|e| TransportError::Connect {
                reason: format!("key file {} is not readable: {}", key_path.display(), e),
                stderr: String::new(),
            })?;
        }

        info!(
            "Opening control master to {}:{}",
            self.config.destination(),
            self.config.port
        );

        let spec = CommandSpec::new(SSH_PROGRAM)
            .arg("-fNM")
            .args([
                "-o".to_string(),
                format!("ControlPersist={}", self.config.control_persist.as_secs()),
            ])
            .args(self.base_args())
            .args(self.auth_args())
            .arg(self.config.destination());

        let (status, stderr) = match password {
            Some(password) => {
                let askpass = AskPass::new(password)?;
                let spec = askpass
                    .env()
                    .into_iter()
                    .fold(spec, |spec, (key, value)| spec.env(key, value));
                let output = self.runner.output(&spec, self.config.connect_timeout).await;
                drop(askpass);
                let output = output?;
                (output.status, output.stderr)
            }
            None => {
                let status = self
                    .runner
                    .status(&spec, Some(self.config.connect_timeout))
                    .await?;
                (status, String::new())
            }
        };

        if status != 0 {
            return Err(TransportError::Connect {
                reason: format!("ssh exited with status {}", status),
                stderr: stderr.trim().to_string(),
            });
        }

        if !self.check_alive().await {
            return Err(TransportError::Connect {
                reason: "control master did not come up".to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        info!("Control master established for {}", self.config.destination());
        Ok(())
    }

    /// Run `command` remotely over the master connection.
    ///
    /// The remote exit status is returned as-is; only a failure to start ssh
    /// is an error. With `interactive` and a terminal attached a remote pty
    /// is allocated.
    pub async fn execute(
        &self,
        command: &str,
        interactive: bool,
        cwd: Option<&str>,
    ) -> Result<i32, TransportError> {
        let tty_flag = if interactive && self.terminal { "-tt" } else { "-T" };
        let spec = CommandSpec::new(SSH_PROGRAM)
            .arg(tty_flag)
            .args(self.base_args())
            .args(self.auth_args())
            .arg(self.config.destination())
            .arg(remote_command(command, cwd));

        let code = self.runner.status(&spec, None).await?;
        debug!("Remote command exited with {}", code);
        Ok(code)
    }

    /// Run `command` remotely with output captured, within `limit`
    pub async fn capture(
        &self,
        command: &str,
        cwd: Option<&str>,
        limit: Duration,
    ) -> Result<ProcessOutput, TransportError> {
        let spec = CommandSpec::new(SSH_PROGRAM)
            .arg("-T")
            .args(self.base_args())
            .args(self.auth_args())
            .arg(self.config.destination())
            .arg(remote_command(command, cwd));

        self.runner.output(&spec, limit).await
    }

    /// Ask the master connection to exit; no-op when none is up
    pub async fn close(&self) {
        if !self.check_alive().await {
            debug!("No control master to close for {}", self.config.destination());
            return;
        }

        let spec = self.control_command("exit");
        match self.runner.output(&spec, self.config.close_timeout).await {
            Ok(output) if output.success() => {
                info!("Closed control master for {}", self.config.destination());
            }
            Ok(output) => warn!("ssh -O exit returned {}: {}", output.status, output.stderr.trim()),
            Err(e) => warn!("Failed to close control master: {}", e),
        }
    }
}

/// Prefix `command` with a directory change when `cwd` is given
pub fn remote_command(command: &str, cwd: Option<&str>) -> String {
    match cwd {
        Some(dir) => format!("cd {} && {}", shell_words::quote(dir), command),
        None => command.to_string(),
    }
}
