//! Exit codes of the subcommand handlers

use super::*;
use std::time::Duration;
use tempfile::TempDir;
use tether::ssh::CommandSpec;
use tether_ssh::testing::{FakeRunner, Scripted};
use tether_ssh::ProcessOutput;

fn session(runner: FakeRunner) -> SessionManager<FakeRunner> {
    let config = ConnectionConfig::from_toml_str(
        r#"
        [server]
        host = "h"
        user = "z1111111"

        [auth]
        password = "pw"
        "#,
    )
    .unwrap();
    SessionManager::new(config, runner)
}

fn workspace() -> RemoteWorkspace {
    RemoteWorkspace::for_absolute(Path::new("/home/me/lab01"))
}

fn is_check(spec: &CommandSpec) -> bool {
    spec.program == "ssh" && spec.args.get(1).map(String::as_str) == Some("check")
}

fn is_open(spec: &CommandSpec) -> bool {
    spec.program == "ssh" && spec.args.first().map(String::as_str) == Some("-fNM")
}

fn is_exec(spec: &CommandSpec) -> bool {
    spec.program == "ssh" && spec.args.last().is_some_and(|a| a.contains(" && make"))
}

fn is_clean(spec: &CommandSpec) -> bool {
    spec.program == "ssh" && spec.args.last().is_some_and(|a| a.starts_with("rm -rf"))
}

/// Master down and refusing new connections
fn unreachable_runner() -> FakeRunner {
    let runner = FakeRunner::new();
    runner.on(is_check, Scripted::Exit(255));
    runner.on(
        is_open,
        Scripted::Output(ProcessOutput {
            status: 255,
            stdout: String::new(),
            stderr: "Connection refused".to_string(),
        }),
    );
    runner
}

/// Interrupt that never arrives
fn never() -> std::future::Pending<()> {
    std::future::pending()
}

#[tokio::test]
async fn test_run_exits_with_remote_code() {
    for code in [0, 2, 137] {
        let runner = FakeRunner::new();
        runner.on(is_exec, Scripted::Exit(code));
        let session = session(runner);

        assert_eq!(run(&session, &workspace(), "make", RunOptions::default(), never()).await, code);
    }
}

#[tokio::test]
async fn test_run_connection_failure_exits_one() {
    let session = session(unreachable_runner());

    assert_eq!(run(&session, &workspace(), "make", RunOptions::default(), never()).await, 1);
    assert_eq!(session.transport().runner().count(is_exec), 0);
}

#[tokio::test]
async fn test_run_sync_failure_exits_one() {
    let runner = FakeRunner::new();
    runner.on(|s| s.program == "rsync", Scripted::Exit(23));
    let session = session(runner);

    assert_eq!(run(&session, &workspace(), "make", RunOptions::default(), never()).await, 1);
    assert_eq!(session.transport().runner().count(is_exec), 0);
}

#[tokio::test]
async fn test_run_interrupted_exits_130() {
    let runner = FakeRunner::new();
    runner.on(is_exec, Scripted::Pending);
    let session = session(runner);

    let interrupt = tokio::time::sleep(Duration::from_millis(50));
    assert_eq!(
        run(&session, &workspace(), "make", RunOptions::default(), interrupt).await,
        INTERRUPTED
    );
}

#[tokio::test]
async fn test_interruptible_prefers_finished_task() {
    assert_eq!(interruptible(async { 4 }, never()).await, 4);
    assert_eq!(interruptible(std::future::pending::<i32>(), async {}).await, INTERRUPTED);
}

#[tokio::test]
async fn test_sync_exit_codes() {
    let session_ok = session(FakeRunner::new());
    assert_eq!(sync(&session_ok, &workspace(), never()).await, 0);

    let runner = FakeRunner::new();
    runner.on(|s| s.program == "rsync", Scripted::Timeout);
    let session_failed = session(runner);
    assert_eq!(sync(&session_failed, &workspace(), never()).await, 1);

    let session_down = session(unreachable_runner());
    assert_eq!(sync(&session_down, &workspace(), never()).await, 1);
    assert_eq!(session_down.transport().runner().count(|s| s.program == "rsync"), 0);
}

#[tokio::test]
async fn test_pull_exit_codes() {
    let dest = TempDir::new().unwrap();

    let session_ok = session(FakeRunner::new());
    assert_eq!(pull(&session_ok, &workspace(), dest.path(), never()).await, 0);

    let runner = FakeRunner::new();
    runner.on(|s| s.program == "rsync", Scripted::Exit(12));
    let session_failed = session(runner);
    assert_eq!(pull(&session_failed, &workspace(), dest.path(), never()).await, 1);
}

#[tokio::test]
async fn test_clean_exit_codes() {
    let session_ok = session(FakeRunner::new());
    assert_eq!(clean(&session_ok, never()).await, 0);

    let runner = FakeRunner::new();
    runner.on(is_clean, Scripted::Exit(1));
    let session_failed = session(runner);
    assert_eq!(clean(&session_failed, never()).await, 1);
}

#[tokio::test]
async fn test_shell_and_disconnect_exit_codes() {
    let session_down = session(unreachable_runner());
    assert_eq!(shell(&session_down, &workspace(), never()).await, 1);
    assert_eq!(disconnect(&session_down).await, 0);

    let session_up = session(FakeRunner::new());
    assert_eq!(shell(&session_up, &workspace(), never()).await, 0);
}

#[tokio::test]
async fn test_watch_exit_codes() {
    let session_down = session(unreachable_runner());
    assert_eq!(watch(&session_down, workspace(), "make", never()).await.unwrap(), 1);

    let dir = TempDir::new().unwrap();
    let session_up = session(FakeRunner::new());
    let ws = RemoteWorkspace::for_absolute(dir.path());
    let interrupt = tokio::time::sleep(Duration::from_millis(100));
    assert_eq!(watch(&session_up, ws, "make", interrupt).await.unwrap(), 0);
}
