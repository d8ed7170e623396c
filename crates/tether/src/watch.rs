//! Change-triggered sync and run
//!
//! [`WatchLoop`] waits for a change in the local tree, pushes it, runs the
//! command in the workspace and waits again, until its shutdown future
//! resolves. How changes are noticed is decided once, up front: `fswatch`
//! when it is installed, mtime polling otherwise.

use crate::config::ConnectionConfig;
use crate::session::SessionManager;
use crate::workspace::RemoteWorkspace;
use crate::{Result, TetherError};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tether_ssh::{CommandSpec, ProcessRunner};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Event watcher program
pub const FSWATCH_PROGRAM: &str = "fswatch";

/// Directory never watched or synced
const GIT_DIR: &str = ".git";

/// How long one fswatch run may wait before it is restarted
const FSWATCH_RESTART: Duration = Duration::from_secs(60 * 60);

/// Something that can wait for the next change in a tree
#[async_trait]
pub trait ChangeDetector: Send {
    /// Resolve once a change has been seen
    async fn next_change(&mut self) -> Result<()>;

    /// Short name for logs
    fn strategy(&self) -> &'static str;
}

/// Latest observed modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchState {
    /// Newest mtime seen so far
    pub last_change: SystemTime,
}

impl WatchState {
    /// Record `current`; true only when it is strictly newer
    pub fn observe(&mut self, current: SystemTime) -> bool {
        if current > self.last_change {
            self.last_change = current;
            true
        } else {
            false
        }
    }
}

fn is_excluded(name: &str, exclude: &[String]) -> bool {
    name == GIT_DIR || exclude.iter().any(|pattern| pattern == name)
}

/// Newest mtime of any file under `root`.
///
/// Directories named in `exclude` and `.git` are not descended into.
/// Unreadable entries are skipped.
pub fn latest_mtime(root: &Path, exclude: &[String]) -> SystemTime {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !is_excluded(&entry.file_name().to_string_lossy(), exclude)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok()?.modified().ok())
        .max()
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Polls the tree every interval
pub struct PollDetector {
    root: PathBuf,
    exclude: Vec<String>,
    interval: Duration,
    state: WatchState,
}

impl PollDetector {
    /// Detector whose baseline is the tree as it is now.
    ///
    /// Walks the whole tree before returning; async callers use
    /// [`PollDetector::start`].
    pub fn new(root: PathBuf, exclude: Vec<String>, interval: Duration) -> Self {
        let last_change = latest_mtime(&root, &exclude);
        Self {
            root,
            exclude,
            interval,
            state: WatchState { last_change },
        }
    }

    /// [`PollDetector::new`] with the baseline scan on the blocking pool
    pub async fn start(root: PathBuf, exclude: Vec<String>, interval: Duration) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::new(root, exclude, interval))
            .await
            .map_err(|e| TetherError::Watch(format!("mtime scan failed: {}", e)))
    }

    /// Current state
    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Scan once; true when something is newer than the last scan
    pub fn poll(&mut self) -> bool {
        let current = latest_mtime(&self.root, &self.exclude);
        self.state.observe(current)
    }
}

#[async_trait]
impl ChangeDetector for PollDetector {
    async fn next_change(&mut self) -> Result<()> {
        loop {
            tokio::time::sleep(self.interval).await;

            let root = self.root.clone();
            let exclude = self.exclude.clone();
            let current = tokio::task::spawn_blocking(move || latest_mtime(&root, &exclude))
                .await
                .map_err(|e| TetherError::Watch(format!("mtime scan failed: {}", e)))?;

            if self.state.observe(current) {
                return Ok(());
            }
        }
    }

    fn strategy(&self) -> &'static str {
        "poll"
    }
}

/// Runs `fswatch -1` and treats its exit as one change
pub struct EventDetector<'r, R> {
    runner: &'r R,
    spec: CommandSpec,
}

impl<'r, R: ProcessRunner> EventDetector<'r, R> {
    /// Detector for `root` with the given latency and excludes
    pub fn new(runner: &'r R, root: &Path, exclude: &[String], latency: Duration) -> Self {
        let mut spec = CommandSpec::new(FSWATCH_PROGRAM)
            .arg("-1")
            .arg(format!("--latency={}", latency.as_secs().max(1)));
        for pattern in exclude.iter().map(String::as_str).chain(std::iter::once(GIT_DIR)) {
            spec = spec.args(["--exclude", pattern]);
        }
        let spec = spec.arg(root.to_string_lossy().to_string());

        Self { runner, spec }
    }

    /// The fswatch invocation
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

#[async_trait]
impl<'r, R: ProcessRunner> ChangeDetector for EventDetector<'r, R> {
    async fn next_change(&mut self) -> Result<()> {
        loop {
            match self.runner.output(&self.spec, FSWATCH_RESTART).await {
                Ok(output) if output.success() => {
                    debug!("fswatch reported {}", output.stdout.trim());
                    return Ok(());
                }
                Ok(output) => {
                    return Err(TetherError::Watch(format!(
                        "fswatch exited with {}: {}",
                        output.status,
                        output.stderr.trim()
                    )));
                }
                Err(e) if e.is_timeout() => debug!("Restarting idle fswatch"),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn strategy(&self) -> &'static str {
        "fswatch"
    }
}

/// Pick the event watcher when available, polling otherwise
pub async fn select_detector<'r, R: ProcessRunner>(
    runner: &'r R,
    root: &Path,
    config: &ConnectionConfig,
) -> Result<Box<dyn ChangeDetector + 'r>> {
    if runner.which(FSWATCH_PROGRAM) {
        return Ok(Box::new(EventDetector::new(
            runner,
            root,
            &config.exclude,
            config.watch_latency,
        )));
    }

    let detector = PollDetector::start(root.to_path_buf(), config.exclude.clone(), config.poll_interval).await?;
    Ok(Box::new(detector))
}

/// What happened during one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A change was detected
    Changed,
    /// Push failed; the command still runs
    SyncFailed(String),
    /// Remote command starting
    Running(String),
    /// Remote command exited
    Finished(i32),
    /// Remote command could not be started
    ExecFailed(String),
    /// Detector failed; retried after one poll interval
    DetectorFailed(String),
}

/// Watch, push, run, repeat
pub struct WatchLoop<'s, R> {
    session: &'s SessionManager<R>,
    workspace: RemoteWorkspace,
    command: String,
    detector: Box<dyn ChangeDetector + 's>,
}

impl<'s, R: ProcessRunner> WatchLoop<'s, R> {
    /// Loop for `command` in `workspace`, detector chosen from the environment
    pub async fn new(
        session: &'s SessionManager<R>,
        workspace: RemoteWorkspace,
        command: impl Into<String>,
    ) -> Result<Self> {
        let detector = select_detector(session.transport().runner(), workspace.local(), session.config()).await?;
        Ok(Self::with_detector(session, workspace, command, detector))
    }

    /// Loop with an explicit detector
    pub fn with_detector(
        session: &'s SessionManager<R>,
        workspace: RemoteWorkspace,
        command: impl Into<String>,
        detector: Box<dyn ChangeDetector + 's>,
    ) -> Self {
        Self {
            session,
            workspace,
            command: command.into(),
            detector,
        }
    }

    /// Detection strategy in use
    pub fn strategy(&self) -> &'static str {
        self.detector.strategy()
    }

    /// Run until `shutdown` resolves; returns the number of cycles run.
    ///
    /// Whatever is in flight when `shutdown` fires is dropped, which kills
    /// its child process. Push and command failures are reported through
    /// `on_event` and never end the loop.
    pub async fn run<S, F>(&mut self, shutdown: S, mut on_event: F) -> Result<u64>
    where
        S: Future<Output = ()>,
        F: FnMut(WatchEvent),
    {
        tokio::pin!(shutdown);
        info!("Watching {} with {}", self.workspace.local().display(), self.strategy());

        let mut cycles = 0u64;
        loop {
            let step = async {
                match self.detector.next_change().await {
                    Ok(()) => {
                        self.cycle(&mut on_event).await;
                        true
                    }
                    Err(e) => {
                        warn!("Change detection failed: {}", e);
                        on_event(WatchEvent::DetectorFailed(e.to_string()));
                        tokio::time::sleep(self.session.config().poll_interval).await;
                        false
                    }
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopped watching after {} cycles", cycles);
                    return Ok(cycles);
                }
                ran = step => {
                    if ran {
                        cycles += 1;
                    }
                }
            }
        }
    }

    async fn cycle<F>(&self, on_event: &mut F)
    where
        F: FnMut(WatchEvent),
    {
        on_event(WatchEvent::Changed);

        if let Err(e) = self.session.push(&self.workspace).await {
            warn!("Push failed, running anyway: {}", e);
            on_event(WatchEvent::SyncFailed(e.to_string()));
        }

        on_event(WatchEvent::Running(self.command.clone()));
        match self
            .session
            .execute(&self.command, true, Some(self.workspace.remote()))
            .await
        {
            Ok(code) => on_event(WatchEvent::Finished(code)),
            Err(e) => {
                warn!("Remote command failed to start: {}", e);
                on_event(WatchEvent::ExecFailed(e.to_string()));
            }
        }
    }
}
