//! Recording process runner for tests
//!
//! [`FakeRunner`] never spawns anything. It records each [`CommandSpec`] and
//! answers from scripted rules, first match wins.

use async_trait::async_trait;
use crate::askpass::ASKPASS_VAR;
use crate::process::{CommandSpec, ProcessOutput, ProcessRunner};
use crate::TransportError;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Scripted response to a matching command
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Exit with this status and no output
    Exit(i32),
    /// Exit with this output
    Output(ProcessOutput),
    /// Hit the caller's time bound
    Timeout,
    /// Program not found
    Missing,
    /// Never finish
    Pending,
}

/// How the command was run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Through [`ProcessRunner::output`]
    Output,
    /// Through [`ProcessRunner::status`]
    Status,
}

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// How it was run
    pub kind: CallKind,
    /// What was run
    pub spec: CommandSpec,
    /// Time bound the caller asked for
    pub limit: Option<Duration>,
    /// Whether the askpass helper named in the env existed at call time
    pub askpass_present: Option<bool>,
}

type Matcher = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

struct Rule {
    matcher: Matcher,
    response: Scripted,
    once: bool,
}

/// Process runner that records calls and replays scripted results
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    programs: Mutex<HashSet<String>>,
}

impl FakeRunner {
    /// Runner where every command exits 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every matching command with `response`
    pub fn on<F>(&self, matcher: F, response: Scripted)
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.push_rule(Box::new(matcher), response, false);
    }

    /// Answer the next matching command with `response`
    pub fn once<F>(&self, matcher: F, response: Scripted)
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.push_rule(Box::new(matcher), response, true);
    }

    /// Make `program` visible to [`ProcessRunner::which`]
    pub fn with_program(self, program: &str) -> Self {
        self.programs.lock().unwrap().insert(program.to_string());
        self
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose spec matches `matcher`
    pub fn calls_matching<F>(&self, matcher: F) -> Vec<RecordedCall>
    where
        F: Fn(&CommandSpec) -> bool,
    {
        self.calls()
            .into_iter()
            .filter(|call| matcher(&call.spec))
            .collect()
    }

    /// Number of calls whose spec matches `matcher`
    pub fn count<F>(&self, matcher: F) -> usize
    where
        F: Fn(&CommandSpec) -> bool,
    {
        self.calls_matching(matcher).len()
    }

    fn push_rule(&self, matcher: Matcher, response: Scripted, once: bool) {
        self.rules.lock().unwrap().push(Rule { matcher, response, once });
    }

    fn respond(&self, kind: CallKind, spec: &CommandSpec, limit: Option<Duration>) -> Scripted {
        let askpass_present = spec.env_var(ASKPASS_VAR).map(|path| Path::new(path).exists());
        self.calls.lock().unwrap().push(RecordedCall {
            kind,
            spec: spec.clone(),
            limit,
            askpass_present,
        });

        let mut rules = self.rules.lock().unwrap();
        match rules.iter().position(|rule| (rule.matcher)(spec)) {
            Some(index) if rules[index].once => rules.remove(index).response,
            Some(index) => rules[index].response.clone(),
            None => Scripted::Exit(0),
        }
    }

    fn fail(spec: &CommandSpec, limit: Option<Duration>, response: &Scripted) -> TransportError {
        match response {
            Scripted::Timeout => TransportError::Timeout {
                operation: spec.display(),
                after: limit.unwrap_or_default(),
            },
            _ => TransportError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            },
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn output(&self, spec: &CommandSpec, limit: Duration) -> Result<ProcessOutput, TransportError> {
        match self.respond(CallKind::Output, spec, Some(limit)) {
            Scripted::Exit(status) => Ok(ProcessOutput {
                status,
                ..Default::default()
            }),
            Scripted::Output(output) => Ok(output),
            Scripted::Pending => std::future::pending().await,
            other => Err(Self::fail(spec, Some(limit), &other)),
        }
    }

    async fn status(&self, spec: &CommandSpec, limit: Option<Duration>) -> Result<i32, TransportError> {
        match self.respond(CallKind::Status, spec, limit) {
            Scripted::Exit(status) => Ok(status),
            Scripted::Output(output) => Ok(output.status),
            Scripted::Pending => std::future::pending().await,
            other => Err(Self::fail(spec, limit, &other)),
        }
    }

    fn which(&self, program: &str) -> bool {
        self.programs.lock().unwrap().contains(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_runner_rules_and_recording() {
        let runner = FakeRunner::new().with_program("fswatch");
        runner.once(|s| s.program == "ssh", Scripted::Exit(255));
        runner.on(|s| s.program == "ssh", Scripted::Exit(0));

        let spec = CommandSpec::new("ssh").arg("-V");
        assert_eq!(runner.status(&spec, None).await.unwrap(), 255);
        assert_eq!(runner.status(&spec, None).await.unwrap(), 0);
        assert_eq!(runner.output(&CommandSpec::new("rsync"), Duration::from_secs(1)).await.unwrap().status, 0);

        assert_eq!(runner.count(|s| s.program == "ssh"), 2);
        assert_eq!(runner.calls()[2].kind, CallKind::Output);
        assert!(runner.which("fswatch"));
        assert!(!runner.which("inotifywait"));
    }
}
