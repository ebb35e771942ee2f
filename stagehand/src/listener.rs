//! Progress reporting seam between the core and any user interface.
//!
//! The core only talks to [`ProgressListener`]; every method has a no-op
//! default so [`NoopListener`] is a complete implementation.

use std::io::Write;
use std::sync::Mutex;

use crate::core::planner::Task;
use crate::core::types::{OutcomeStatus, RunOutcome, TaskResult, TaskStatus};

/// Receives task lifecycle events. Called from worker threads.
pub trait ProgressListener: Send + Sync {
    /// A pipeline step of the run (e.g. "hiding unstaged changes").
    fn on_step(&self, _message: &str) {}
    fn on_task_start(&self, _task: &Task) {}
    /// One line of output from a running task.
    fn on_task_output(&self, _task: &Task, _line: &str) {}
    fn on_task_end(&self, _task: &Task, _result: &TaskResult) {}
    fn on_run_end(&self, _outcome: &RunOutcome) {}
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ProgressListener for NoopListener {}

/// Line-oriented listener writing to stderr.
#[derive(Debug)]
pub struct ConsoleListener {
    /// Print task output even for passing tasks.
    verbose: bool,
    /// Only print failures and the final summary.
    quiet: bool,
    lock: Mutex<()>,
}

impl ConsoleListener {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            verbose,
            quiet,
            lock: Mutex::new(()),
        }
    }

    fn print(&self, text: &str) {
        let _guard = self.lock.lock();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{text}");
    }
}

impl ProgressListener for ConsoleListener {
    fn on_step(&self, message: &str) {
        if !self.quiet {
            self.print(&format!("→ {message}"));
        }
    }

    fn on_task_start(&self, task: &Task) {
        if !self.quiet {
            self.print(&format!("  ▸ {} ({} file(s))", task.title, task.files.len()));
        }
    }

    fn on_task_end(&self, task: &Task, result: &TaskResult) {
        let mark = match result.status {
            TaskStatus::Passed => "✔",
            TaskStatus::Cancelled => "◼",
            _ => "✖",
        };
        if result.status.is_success() && self.quiet {
            return;
        }
        let mut text = format!("  {mark} {} [{} ms]", task.title, result.duration_ms);
        let show_output = !result.status.is_success() || self.verbose;
        if show_output {
            if let Some(command) = &result.failed_command {
                text.push_str(&format!("\n    {command}"));
            }
            for stream in [&result.stdout, &result.stderr] {
                let trimmed = stream.trim_end();
                if !trimmed.is_empty() {
                    text.push('\n');
                    text.push_str(trimmed);
                }
            }
        }
        self.print(&text);
    }

    fn on_run_end(&self, outcome: &RunOutcome) {
        for conflict in &outcome.conflicts {
            let backup = conflict
                .backup_path
                .as_ref()
                .map(|p| format!(" (original saved to {})", p.display()))
                .unwrap_or_default();
            self.print(&format!(
                "⚠ unstaged changes in {} conflicted with task edits: {}{backup}",
                conflict.path, conflict.detail
            ));
        }
        let summary = match outcome.status {
            OutcomeStatus::Success => return,
            OutcomeStatus::PartialSuccess => "tasks passed, but some unstaged changes need attention",
            OutcomeStatus::Failed => "some tasks failed; files of failing patterns were not changed",
            OutcomeStatus::Aborted => "aborted; original state restored",
        };
        self.print(&format!("✖ {summary}"));
    }
}
