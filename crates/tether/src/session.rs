//! Session management and connection handling
//!
//! [`SessionManager`] is the single entry point for remote work. Every
//! operation first asks ssh whether the master connection is up and only
//! establishes one when it is not, so concurrent invocations from separate
//! processes never open a second master.

use crate::config::{AuthMethod, ConnectionConfig};
use crate::workspace::{RemoteWorkspace, WORKSPACES_ROOT};
use crate::{Result, TetherError};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_ssh::{ProcessOutput, ProcessRunner, Rsync, SshTransport, SyncError};
use tracing::{debug, info, warn};

/// Source of a password when the config has none
pub trait PasswordSource: Send + Sync {
    /// Ask for the password, showing `prompt`
    fn password(&self, prompt: &str) -> Result<String>;
}

impl<F> PasswordSource for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn password(&self, prompt: &str) -> Result<String> {
        self(prompt)
    }
}

/// Fails every request; used when no prompt is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl PasswordSource for NoPrompt {
    fn password(&self, _prompt: &str) -> Result<String> {
        Err(TetherError::Prompt(
            "no password configured and no terminal to prompt on".to_string(),
        ))
    }
}

/// Options for [`SessionManager::run`]
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Push the local tree before running
    pub sync: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { sync: true }
    }
}

/// Progress of [`SessionManager::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStep {
    /// Checking or opening the master connection
    Connecting,
    /// Master connection ready
    Connected(Duration),
    /// Pushing the local tree
    Syncing,
    /// Push finished
    Synced(Duration),
    /// Push skipped on request
    SyncSkipped,
    /// Remote command starting
    Running(String),
}

/// Remote operations for one endpoint
pub struct SessionManager<R> {
    /// Endpoint configuration
    config: ConnectionConfig,
    /// ControlMaster transport
    transport: SshTransport<R>,
    /// Where passwords come from when the config has none
    passwords: Arc<dyn PasswordSource>,
}

impl<R: ProcessRunner> SessionManager<R> {
    /// Create a manager for `config`
    pub fn new(config: ConnectionConfig, runner: R) -> Self {
        let transport = SshTransport::new(config.ssh_config(), runner);
        Self {
            config,
            transport,
            passwords: Arc::new(NoPrompt),
        }
    }

    /// Set the password prompt
    pub fn with_password_source(mut self, source: impl PasswordSource + 'static) -> Self {
        self.passwords = Arc::new(source);
        self
    }

    /// Override terminal detection
    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.transport = self.transport.with_terminal(terminal);
        self
    }

    /// Endpoint configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport(&self) -> &SshTransport<R> {
        &self.transport
    }

    /// Whether the master connection is up right now
    pub async fn is_connected(&self) -> bool {
        self.transport.check_alive().await
    }

    /// Reuse the master connection, or establish one.
    ///
    /// A password is only resolved, and prompted for, when a new master is
    /// actually needed.
    pub async fn connect(&self) -> Result<()> {
        if self.transport.check_alive().await {
            debug!("Control master for {} is alive", self.config.destination());
            return Ok(());
        }

        let password = match self.config.auth_method {
            AuthMethod::Password => Some(self.resolve_password().await?),
            AuthMethod::Key => None,
        };

        self.transport.establish(password.as_deref()).await?;
        Ok(())
    }

    /// Configured password, or one read from the prompt.
    ///
    /// The prompt blocks on the terminal, so it runs off the async thread
    /// and the caller can still be cancelled while it waits.
    async fn resolve_password(&self) -> Result<String> {
        if let Some(password) = &self.config.password {
            return Ok(password.clone());
        }

        let prompt = format!("Password for {}", self.config.destination());
        let source = Arc::clone(&self.passwords);
        tokio::task::spawn_blocking(move || source.password(&prompt))
            .await
            .map_err(|e| TetherError::Prompt(format!("prompt task failed: {}", e)))?
    }

    /// Close the master connection if it is up
    pub async fn disconnect(&self) {
        self.transport.close().await;
    }

    /// Workspace for a local directory
    pub fn workspace(&self, local_dir: &Path) -> Result<RemoteWorkspace> {
        RemoteWorkspace::for_local_dir(local_dir)
    }

    /// Run `command` remotely, returning its exit status unchanged
    pub async fn execute(&self, command: &str, interactive: bool, cwd: Option<&str>) -> Result<i32> {
        Ok(self.transport.execute(command, interactive, cwd).await?)
    }

    /// Mirror the local tree into the workspace
    pub async fn push(&self, workspace: &RemoteWorkspace) -> std::result::Result<(), SyncError> {
        Rsync::new(&self.transport)
            .push(workspace.local(), workspace.remote(), &self.config.exclude)
            .await
    }

    /// Copy the workspace into `dest`
    pub async fn pull(&self, workspace: &RemoteWorkspace, dest: &Path) -> std::result::Result<(), SyncError> {
        Rsync::new(&self.transport).pull(workspace.remote(), dest).await
    }

    /// Create the workspace directory without syncing into it.
    ///
    /// Best effort: failures are logged and the caller carries on.
    pub async fn ensure_workspace(&self, workspace: &RemoteWorkspace) {
        let command = format!("mkdir -p {}", shell_words::quote(workspace.remote()));
        match self
            .transport
            .capture(&command, None, self.transport.config().connect_timeout)
            .await
        {
            Ok(output) if !output.success() => {
                debug!("mkdir returned {}: {}", output.status, output.stderr.trim());
            }
            Ok(_) => {}
            Err(e) => warn!("mkdir of {} failed: {}", workspace.remote(), e),
        }
    }

    /// Connect, sync, then run `command` interactively inside the workspace.
    ///
    /// Connection and sync failures are errors. The remote command's exit
    /// status is returned as-is.
    pub async fn run<F>(
        &self,
        workspace: &RemoteWorkspace,
        command: &str,
        options: RunOptions,
        mut on_step: F,
    ) -> Result<i32>
    where
        F: FnMut(RunStep),
    {
        on_step(RunStep::Connecting);
        let started = Instant::now();
        self.connect().await?;
        on_step(RunStep::Connected(started.elapsed()));

        if options.sync {
            on_step(RunStep::Syncing);
            let started = Instant::now();
            self.push(workspace).await?;
            on_step(RunStep::Synced(started.elapsed()));
        } else {
            on_step(RunStep::SyncSkipped);
            self.ensure_workspace(workspace).await;
        }

        on_step(RunStep::Running(command.to_string()));
        let code = self.execute(command, true, Some(workspace.remote())).await?;
        info!("{} exited with {}", command, code);
        Ok(code)
    }

    /// Interactive login shell started in the workspace
    pub async fn shell(&self, workspace: &RemoteWorkspace) -> Result<i32> {
        let command = format!(
            "cd {} 2>/dev/null; exec $SHELL -l",
            shell_words::quote(workspace.remote())
        );
        self.execute(&command, true, None).await
    }

    /// Remove every workspace on the remote host
    pub async fn clean(&self) -> Result<ProcessOutput> {
        let command = format!("rm -rf {} && echo Cleaned", WORKSPACES_ROOT);
        Ok(self
            .transport
            .capture(&command, None, self.transport.config().connect_timeout)
            .await?)
    }
}

#[cfg(test)]
mod tests;
