//! Terminal progress and result lines

use colored::Colorize;
use std::io::Write;
use std::time::Duration;
use tether::{RunStep, WatchEvent};

const RULE_WIDTH: usize = 40;

fn rule() -> String {
    "=".repeat(RULE_WIDTH).magenta().to_string()
}

fn flush() {
    let _ = std::io::stdout().flush();
}

fn ok(elapsed: Duration) -> String {
    format!(" {} ({:.1}s)", "OK".green(), elapsed.as_secs_f64())
}

/// Exit line printed after a remote command
pub fn exit_line(code: i32) -> String {
    if code == 0 {
        format!("Exit: {}", "OK".green())
    } else {
        format!("Exit: {}", code.to_string().red())
    }
}

/// Renders the three-step progress of `tether run`.
///
/// Step headers are printed without a newline so the result lands on the
/// same line, as in `[1/3] Connecting to host... OK (0.4s)`.
pub struct RunProgress {
    host: String,
    line_open: bool,
}

impl RunProgress {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            line_open: false,
        }
    }

    /// Text for `step`, and whether it leaves the line open
    pub fn render(&self, step: &RunStep) -> (String, bool) {
        match step {
            RunStep::Connecting => (
                format!("[1/3] Connecting to {}...", self.host).bright_black().to_string(),
                true,
            ),
            RunStep::Connected(elapsed) | RunStep::Synced(elapsed) => (ok(*elapsed), false),
            RunStep::Syncing => ("[2/3] Syncing files...".bright_black().to_string(), true),
            RunStep::SyncSkipped => ("[2/3] Sync skipped".bright_black().to_string(), false),
            RunStep::Running(command) => (
                format!("{} {}\n{}", "[3/3] Running:".bright_black(), command.yellow(), rule()),
                false,
            ),
        }
    }

    pub fn step(&mut self, step: RunStep) {
        let (text, open) = self.render(&step);
        if open {
            print!("{}", text);
            flush();
        } else {
            println!("{}", text);
        }
        self.line_open = open;
    }

    /// Close a pending step line with FAILED
    pub fn fail(&mut self) {
        if self.line_open {
            println!(" {}", "FAILED".red());
            self.line_open = false;
        }
    }

    /// Closing rule and exit line
    pub fn finish(&self, code: i32) {
        println!("{}", rule());
        println!("{}", exit_line(code));
    }
}

/// Text for one watch loop event; `None` for events with nothing to show
pub fn watch_event(event: &WatchEvent) -> Option<String> {
    match event {
        WatchEvent::Changed => Some(format!("\n{}", "Change detected, running...".cyan())),
        WatchEvent::SyncFailed(reason) => Some(format!("{} {}", "Sync failed:".red(), reason)),
        WatchEvent::Running(command) => Some(format!("{}\n{}", format!("> {}", command).yellow(), rule())),
        WatchEvent::Finished(code) => Some(format!("{}\n{}\n", rule(), exit_line(*code))),
        WatchEvent::ExecFailed(reason) => Some(format!("{} {}\n", "Command failed to start:".red(), reason)),
        WatchEvent::DetectorFailed(reason) => {
            Some(format!("{} {}", "Change detection failed, retrying:".yellow(), reason))
        }
    }
}

pub fn print_watch_event(event: WatchEvent) {
    if let Some(text) = watch_event(&event) {
        println!("{}", text);
        flush();
    }
}

pub fn error(message: impl std::fmt::Display) {
    eprintln!("{} {}", "error:".red().bold(), message);
}
