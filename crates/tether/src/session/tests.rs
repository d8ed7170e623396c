//! Unit tests for session management

use super::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_ssh::askpass::{ASKPASS_REQUIRE_VAR, ASKPASS_VAR};
use tether_ssh::testing::{CallKind, FakeRunner, Scripted};
use tether_ssh::CommandSpec;

fn config() -> ConnectionConfig {
    ConnectionConfig::from_toml_str(
        r#"
        [server]
        host = "h"
        port = 22
        user = "z1111111"
        "#,
    )
    .unwrap()
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

fn is_rsync(spec: &CommandSpec) -> bool {
    spec.program == "rsync"
}

fn is_mkdir(spec: &CommandSpec) -> bool {
    spec.program == "ssh" && spec.args.last().is_some_and(|a| a.starts_with("mkdir -p"))
}

fn is_remote_command(spec: &CommandSpec) -> bool {
    spec.program == "ssh"
        && !is_mkdir(spec)
        && matches!(spec.args.first().map(String::as_str), Some("-tt") | Some("-T"))
}

/// Runner whose master is down until the first `ssh -fNM`
fn cold_runner() -> FakeRunner {
    let runner = FakeRunner::new();
    runner.once(is_check, Scripted::Exit(255));
    runner.on(is_check, Scripted::Exit(0));
    runner
}

fn counting_prompt(answer: &'static str) -> (Arc<AtomicUsize>, impl PasswordSource) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let source = move |prompt: &str| -> Result<String> {
        assert_eq!(prompt, "Password for z1111111@h");
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(answer.to_string())
    };
    (count, source)
}

#[tokio::test]
async fn test_connect_reuses_live_master() {
    let runner = FakeRunner::new();
    runner.on(is_check, Scripted::Exit(0));
    let (prompts, source) = counting_prompt("unused");
    let session = SessionManager::new(config(), runner).with_password_source(source);

    session.connect().await.unwrap();
    session.connect().await.unwrap();

    assert_eq!(session.transport().runner().count(is_open), 0);
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_prompts_once_and_overlays_askpass() {
    let (prompts, source) = counting_prompt("typed-secret");
    let session = SessionManager::new(config(), cold_runner()).with_password_source(source);

    session.connect().await.unwrap();

    assert_eq!(prompts.load(Ordering::SeqCst), 1);

    let opens = session.transport().runner().calls_matching(is_open);
    assert_eq!(opens.len(), 1);
    let open = &opens[0];
    assert_eq!(open.kind, CallKind::Output);
    assert_eq!(open.askpass_present, Some(true));
    assert_eq!(open.spec.env_var(ASKPASS_REQUIRE_VAR), Some("force"));
    assert!(!open.spec.args.iter().any(|a| a.contains("typed-secret")));

    let helper = PathBuf::from(open.spec.env_var(ASKPASS_VAR).unwrap());
    assert!(!helper.exists());
}

#[tokio::test]
async fn test_connect_uses_configured_password() {
    let mut config = config();
    config.password = Some("stored".to_string());
    let (prompts, source) = counting_prompt("unused");
    let session = SessionManager::new(config, cold_runner()).with_password_source(source);

    session.connect().await.unwrap();

    assert_eq!(prompts.load(Ordering::SeqCst), 0);
    assert_eq!(session.transport().runner().count(is_open), 1);
}

#[tokio::test]
async fn test_connect_without_prompt_fails_cleanly() {
    let session = SessionManager::new(config(), cold_runner());

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, TetherError::Prompt(_)));
    assert_eq!(session.transport().runner().count(is_open), 0);
}

#[tokio::test]
async fn test_connect_with_key_attaches_terminal() {
    let key = tempfile::NamedTempFile::new().unwrap();
    let mut config = config();
    config.auth_method = AuthMethod::Key;
    config.key_path = Some(key.path().to_string_lossy().to_string());
    let session = SessionManager::new(config, cold_runner());

    session.connect().await.unwrap();

    let open = &session.transport().runner().calls_matching(is_open)[0];
    assert_eq!(open.kind, CallKind::Status);
    assert_eq!(open.askpass_present, None);
    assert!(open.spec.args.contains(&key.path().to_string_lossy().to_string()));
}

#[tokio::test]
async fn test_connect_failure_is_transport_error() {
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
    let mut config = config();
    config.password = Some("pw".to_string());
    let session = SessionManager::new(config, runner);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(
        err,
        TetherError::Transport(tether_ssh::TransportError::Connect { .. })
    ));
}

#[tokio::test]
async fn test_run_first_invocation_sequence() {
    let mut config = config();
    config.password = Some("pw".to_string());
    let session = SessionManager::new(config, cold_runner()).with_terminal(true);
    let ws = workspace();
    let mut steps = Vec::new();

    let code = session
        .run(&ws, "echo hi", RunOptions::default(), |step| steps.push(step))
        .await
        .unwrap();
    assert_eq!(code, 0);

    let calls = session.transport().runner().calls();
    let order: Vec<&str> = calls
        .iter()
        .map(|call| {
            let spec = &call.spec;
            if is_check(spec) {
                "check"
            } else if is_open(spec) {
                "open"
            } else if is_mkdir(spec) {
                "mkdir"
            } else if is_rsync(spec) {
                "rsync"
            } else {
                "exec"
            }
        })
        .collect();
    assert_eq!(order, vec!["check", "open", "check", "mkdir", "rsync", "exec"]);

    let exec = &calls[5].spec;
    assert_eq!(exec.args[0], "-tt");
    assert_eq!(exec.args.last().unwrap(), &format!("cd {} && echo hi", ws.remote()));

    assert_eq!(steps.first(), Some(&RunStep::Connecting));
    assert_eq!(steps.last(), Some(&RunStep::Running("echo hi".to_string())));
    assert!(steps.contains(&RunStep::Syncing));
}

#[tokio::test]
async fn test_run_propagates_remote_exit_code() {
    for code in [1, 2, 137] {
        let runner = FakeRunner::new();
        runner.on(is_check, Scripted::Exit(0));
        runner.on(is_remote_command, Scripted::Exit(code));
        let session = SessionManager::new(config(), runner);

        let result = session
            .run(&workspace(), "make", RunOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(result, code);
    }
}

#[tokio::test]
async fn test_run_aborts_on_sync_failure() {
    let runner = FakeRunner::new();
    runner.on(is_check, Scripted::Exit(0));
    runner.on(is_rsync, Scripted::Exit(12));
    let session = SessionManager::new(config(), runner);

    let err = session
        .run(&workspace(), "make", RunOptions::default(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, TetherError::Sync(SyncError::Failed { code: 12, .. })));
    assert_eq!(session.transport().runner().count(is_remote_command), 0);
}

#[tokio::test]
async fn test_run_without_sync_creates_workspace() {
    let runner = FakeRunner::new();
    runner.on(is_check, Scripted::Exit(0));
    let session = SessionManager::new(config(), runner);
    let mut steps = Vec::new();

    session
        .run(&workspace(), "ls", RunOptions { sync: false }, |step| steps.push(step))
        .await
        .unwrap();

    let runner = session.transport().runner();
    assert_eq!(runner.count(is_rsync), 0);
    assert_eq!(runner.count(is_mkdir), 1);
    assert!(steps.contains(&RunStep::SyncSkipped));
}

#[tokio::test]
async fn test_run_without_sync_survives_mkdir_failure() {
    let runner = FakeRunner::new();
    runner.on(is_check, Scripted::Exit(0));
    runner.on(is_mkdir, Scripted::Timeout);
    runner.on(is_remote_command, Scripted::Exit(3));
    let session = SessionManager::new(config(), runner);

    let code = session
        .run(&workspace(), "make", RunOptions { sync: false }, |_| {})
        .await
        .unwrap();

    assert_eq!(code, 3);
    let runner = session.transport().runner();
    assert_eq!(runner.count(is_mkdir), 1);
    assert_eq!(runner.count(is_remote_command), 1);
}

#[tokio::test]
async fn test_cancelled_connect_removes_askpass() {
    let runner = cold_runner();
    runner.on(is_open, Scripted::Pending);
    let (_, source) = counting_prompt("typed-secret");
    let session = SessionManager::new(config(), runner).with_password_source(source);

    let attempt = tokio::time::timeout(Duration::from_millis(100), session.connect()).await;
    assert!(attempt.is_err(), "connect should still be waiting on ssh");

    let open = &session.transport().runner().calls_matching(is_open)[0];
    assert_eq!(open.askpass_present, Some(true));
    let helper = PathBuf::from(open.spec.env_var(ASKPASS_VAR).unwrap());
    assert!(!helper.exists());
}

#[tokio::test]
async fn test_connect_cancellable_while_prompting() {
    let source = |_: &str| -> Result<String> {
        std::thread::sleep(Duration::from_millis(300));
        Ok("late".to_string())
    };
    let session = SessionManager::new(config(), cold_runner()).with_password_source(source);

    let attempt = tokio::time::timeout(Duration::from_millis(50), session.connect()).await;
    assert!(attempt.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(session.transport().runner().count(is_open), 0);
}

#[tokio::test]
async fn test_pull_targets_destination() {
    let session = SessionManager::new(config(), FakeRunner::new());
    let ws = workspace();

    session.pull(&ws, Path::new("/tmp/out")).await.unwrap();

    let call = &session.transport().runner().calls_matching(is_rsync)[0];
    assert_eq!(call.spec.args.last().unwrap(), "/tmp/out/");
    assert_eq!(
        call.spec.args[call.spec.args.len() - 2],
        format!("z1111111@h:{}/", ws.remote())
    );
}

#[tokio::test]
async fn test_shell_and_clean_commands() {
    let session = SessionManager::new(config(), FakeRunner::new());
    let ws = workspace();

    session.shell(&ws).await.unwrap();
    session.clean().await.unwrap();

    let calls = session.transport().runner().calls();
    assert_eq!(
        calls[0].spec.args.last().unwrap(),
        &format!("cd {} 2>/dev/null; exec $SHELL -l", ws.remote())
    );
    assert_eq!(
        calls[1].spec.args.last().unwrap(),
        "rm -rf .tether/workspaces && echo Cleaned"
    );
}

#[tokio::test]
async fn test_disconnect_when_down_is_noop() {
    let runner = FakeRunner::new();
    runner.on(is_check, Scripted::Exit(255));
    let session = SessionManager::new(config(), runner);

    session.disconnect().await;
    assert!(!session.is_connected().await);
    assert_eq!(session.transport().runner().calls().len(), 2);
}
