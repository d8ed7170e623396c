//! Subcommand handlers
//!
//! Each handler returns the process exit code. `run` passes the remote
//! command's status through; everything else is 0 or 1. Handlers that talk
//! to the remote host give up when their `interrupt` future resolves.

use crate::cli::{command_line, Cli, Command};
use crate::output::{self, RunProgress};
use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::{Input, Password};
use std::future::Future;
use std::path::Path;
use tether::config::write_default;
use tether::ssh::{ProcessRunner, TokioRunner};
use tether::{ConnectionConfig, RemoteWorkspace, RunOptions, SessionManager, TetherError, WatchLoop};
use tracing::{debug, info};

/// Exit code after Ctrl-C
pub const INTERRUPTED: i32 = 130;

/// Run the selected subcommand
pub async fn dispatch(cli: Cli) -> Result<i32> {
    let config_path = cli.config_path()?;
    debug!("Using config {}", config_path.display());

    match cli.command {
        Command::Init { host, user, password } => init(&config_path, host, user, password),
        Command::Config => show_config(&config_path),
        Command::Run { no_sync, command } => {
            let (session, workspace) = open_session(&config_path)?;
            let options = RunOptions { sync: !no_sync };
            Ok(run(&session, &workspace, &command_line(&command), options, ctrl_c()).await)
        }
        Command::Sync => {
            let (session, workspace) = open_session(&config_path)?;
            Ok(sync(&session, &workspace, ctrl_c()).await)
        }
        Command::Pull { dest } => {
            let (session, workspace) = open_session(&config_path)?;
            let dest = dest.unwrap_or_else(|| workspace.local().to_path_buf());
            Ok(pull(&session, &workspace, &dest, ctrl_c()).await)
        }
        Command::Ssh => {
            let (session, workspace) = open_session(&config_path)?;
            Ok(shell(&session, &workspace, ctrl_c()).await)
        }
        Command::Watch { command } => {
            let (session, workspace) = open_session(&config_path)?;
            watch(&session, workspace, &command_line(&command), ctrl_c()).await
        }
        Command::Clean => {
            let (session, _) = open_session(&config_path)?;
            Ok(clean(&session, ctrl_c()).await)
        }
        Command::Disconnect => {
            let (session, _) = open_session(&config_path)?;
            Ok(disconnect(&session).await)
        }
    }
}

/// Resolves on the first Ctrl-C
async fn ctrl_c() {
    let _ = tokio::signal::ctrl_c().await;
}

fn prompt_password(prompt: &str) -> tether::Result<String> {
    Password::new()
        .with_prompt(prompt)
        .interact()
        .map_err(|e| TetherError::Prompt(e.to_string()))
}

/// Session for the configured endpoint and the workspace of the current directory
fn open_session(config_path: &Path) -> Result<(SessionManager<TokioRunner>, RemoteWorkspace)> {
    let config = ConnectionConfig::load(config_path)?;
    info!("Loaded config for {}", config.destination());
    let session = SessionManager::new(config, TokioRunner::new()).with_password_source(prompt_password);

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let workspace = session.workspace(&cwd)?;
    Ok((session, workspace))
}

/// Await `task`, giving up when `interrupt` resolves.
///
/// Dropping the task kills whatever ssh or rsync child it was waiting on and
/// removes any password helper it holds.
async fn interruptible<F, I>(task: F, interrupt: I) -> i32
where
    F: Future<Output = i32>,
    I: Future<Output = ()>,
{
    tokio::select! {
        code = task => code,
        _ = interrupt => {
            println!();
            output::error("Interrupted");
            INTERRUPTED
        }
    }
}

/// Connect or report the failure; false means the caller should exit 1
async fn connect<R: ProcessRunner>(session: &SessionManager<R>) -> bool {
    match session.connect().await {
        Ok(()) => true,
        Err(e) => {
            output::error(format!("Connection failed: {}", e));
            false
        }
    }
}

fn init(path: &Path, host: Option<String>, user: Option<String>, password: Option<String>) -> Result<i32> {
    let host = match host {
        Some(host) => host,
        None => Input::new().with_prompt("Remote host").interact_text()?,
    };
    let user = match user {
        Some(user) => user,
        None => Input::new().with_prompt("Username").interact_text()?,
    };
    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password (leave empty to prompt each time)")
            .allow_empty_password(true)
            .interact()?,
    };

    write_default(path, host.trim(), user.trim(), Some(password.as_str()))?;
    println!("Config created: {}", path.display());
    println!("Edit with: {} {}", "nano".bold(), path.display());
    Ok(0)
}

fn show_config(path: &Path) -> Result<i32> {
    println!("Config: {}", path.display());
    if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        println!("{}", text);
    }
    Ok(0)
}

async fn run<R, I>(
    session: &SessionManager<R>,
    workspace: &RemoteWorkspace,
    command: &str,
    options: RunOptions,
    interrupt: I,
) -> i32
where
    R: ProcessRunner,
    I: Future<Output = ()>,
{
    let mut progress = RunProgress::new(session.config().host.clone());

    let result = {
        let task = session.run(workspace, command, options, |step| progress.step(step));
        tokio::select! {
            result = task => Some(result),
            _ = interrupt => None,
        }
    };

    match result {
        Some(Ok(code)) => {
            progress.finish(code);
            code
        }
        Some(Err(e)) => {
            progress.fail();
            output::error(e);
            1
        }
        None => {
            progress.fail();
            output::error("Interrupted");
            INTERRUPTED
        }
    }
}

async fn sync<R, I>(session: &SessionManager<R>, workspace: &RemoteWorkspace, interrupt: I) -> i32
where
    R: ProcessRunner,
    I: Future<Output = ()>,
{
    let task = async {
        if !connect(session).await {
            return 1;
        }

        println!("Syncing to {}:{}...", session.config().host, workspace.remote());
        match session.push(workspace).await {
            Ok(()) => {
                println!("Done");
                0
            }
            Err(e) => {
                output::error(format!("Sync failed: {}", e));
                1
            }
        }
    };
    interruptible(task, interrupt).await
}

async fn pull<R, I>(session: &SessionManager<R>, workspace: &RemoteWorkspace, dest: &Path, interrupt: I) -> i32
where
    R: ProcessRunner,
    I: Future<Output = ()>,
{
    let task = async {
        if !connect(session).await {
            return 1;
        }

        println!("Pulling from {}:{}...", session.config().host, workspace.remote());
        match session.pull(workspace, dest).await {
            Ok(()) => {
                println!("Done");
                0
            }
            Err(e) => {
                output::error(format!("Pull failed: {}", e));
                1
            }
        }
    };
    interruptible(task, interrupt).await
}

async fn shell<R, I>(session: &SessionManager<R>, workspace: &RemoteWorkspace, interrupt: I) -> i32
where
    R: ProcessRunner,
    I: Future<Output = ()>,
{
    let task = async {
        if !connect(session).await {
            return 1;
        }
        match session.shell(workspace).await {
            Ok(_) => 0,
            Err(e) => {
                output::error(e);
                1
            }
        }
    };
    interruptible(task, interrupt).await
}

async fn watch<R, I>(
    session: &SessionManager<R>,
    workspace: RemoteWorkspace,
    command: &str,
    interrupt: I,
) -> Result<i32>
where
    R: ProcessRunner,
    I: Future<Output = ()>,
{
    tokio::pin!(interrupt);

    let connected = tokio::select! {
        up = connect(session) => up,
        _ = &mut interrupt => false,
    };
    if !connected {
        return Ok(1);
    }

    let mut watch = WatchLoop::new(session, workspace, command).await?;
    println!("Watching for changes with {}... (Ctrl+C to stop)", watch.strategy());
    println!("Command: {}\n", command.yellow());

    let cycles = watch.run(interrupt, output::print_watch_event).await?;
    println!("\nStopped watching after {} runs", cycles);
    Ok(0)
}

async fn clean<R, I>(session: &SessionManager<R>, interrupt: I) -> i32
where
    R: ProcessRunner,
    I: Future<Output = ()>,
{
    let task = async {
        if !connect(session).await {
            return 1;
        }

        println!("Cleaning remote workspaces...");
        match session.clean().await {
            Ok(cleaned) if cleaned.success() => {
                print!("{}", cleaned.stdout);
                0
            }
            Ok(cleaned) => {
                output::error(format!("Clean failed: {}", cleaned.stderr.trim()));
                1
            }
            Err(e) => {
                output::error(format!("Clean failed: {}", e));
                1
            }
        }
    };
    interruptible(task, interrupt).await
}

async fn disconnect<R: ProcessRunner>(session: &SessionManager<R>) -> i32 {
    session.disconnect().await;
    println!("Disconnected");
    0
}

#[cfg(test)]
mod tests;
