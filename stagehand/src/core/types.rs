//! Shared deterministic types for stagehand core logic.
//!
//! These types define stable contracts between components. They should not
//! depend on external state or I/O.

use std::path::PathBuf;

use serde::Serialize;

/// Kind of change recorded for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
    Unmerged,
    Untracked,
}

impl ChangeStatus {
    /// Parse a git status letter (`A`, `M`, `D`, `R`, `C`, `T`, `U`, `?`).
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'A' => Some(Self::Added),
            'M' => Some(Self::Modified),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            'C' => Some(Self::Copied),
            'T' => Some(Self::TypeChanged),
            'U' => Some(Self::Unmerged),
            '?' => Some(Self::Untracked),
            _ => None,
        }
    }

    /// The git `--diff-filter` letter for this status.
    pub fn letter(self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
            Self::Renamed => 'R',
            Self::Copied => 'C',
            Self::TypeChanged => 'T',
            Self::Unmerged => 'U',
            Self::Untracked => '?',
        }
    }
}

/// A path reported by the change set resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// Repo-root-relative, normalized path (destination for renames).
    pub path: String,
    /// Source path of a rename or copy.
    pub original_path: Option<String>,
    pub status: ChangeStatus,
    /// The index differs from `HEAD` for this path.
    pub staged: bool,
    /// The working tree differs from the index for this path.
    pub unstaged: bool,
}

impl ChangedFile {
    /// Staged and unstaged changes on the same file.
    pub fn is_partially_staged(&self) -> bool {
        self.staged && self.unstaged && self.status != ChangeStatus::Untracked
    }
}

/// Terminal state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Passed,
    Failed,
    TimedOut,
    /// The process could not be started.
    SpawnFailed,
    /// Never started or killed because the run was cancelled.
    Cancelled,
}

impl TaskStatus {
    pub fn is_success(self) -> bool {
        self == Self::Passed
    }
}

/// Result of a task (all chunks and pipeline steps of one pattern).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub task_id: usize,
    pub title: String,
    pub status: TaskStatus,
    /// Exit code of the last invocation that ran, if it exited normally.
    pub exit_code: Option<i32>,
    /// The invocation that failed, if any.
    pub failed_command: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
}

/// Unstaged changes that could not be cleanly re-applied on top of a task edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileConflict {
    /// Repo-relative path of the affected file.
    pub path: String,
    /// Full pre-run working copy saved for manual recovery.
    pub backup_path: Option<PathBuf>,
    pub detail: String,
}

/// Overall classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    /// Tasks passed but some unstaged changes conflicted with task edits.
    PartialSuccess,
    Failed,
    Aborted,
}

impl OutcomeStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => crate::exit_codes::OK,
            Self::PartialSuccess => crate::exit_codes::PARTIAL,
            Self::Failed => crate::exit_codes::FAILED,
            Self::Aborted => crate::exit_codes::ABORTED,
        }
    }
}

/// Why a run finished without executing any task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoChangedFiles,
    NoMatchingFiles,
}

/// Structured result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub status: OutcomeStatus,
    pub results: Vec<TaskResult>,
    /// Matched files whose content was changed by tasks.
    pub modified_files: Vec<String>,
    pub conflicts: Vec<ReconcileConflict>,
    pub skipped: Option<SkipReason>,
}

impl RunOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            status: OutcomeStatus::Success,
            results: Vec::new(),
            modified_files: Vec::new(),
            conflicts: Vec::new(),
            skipped: Some(reason),
        }
    }

    /// Outcome of a run that was interrupted and rolled back. Task edits were
    /// discarded, so the run is aborted whatever the tasks reported.
    pub fn aborted(results: Vec<TaskResult>) -> Self {
        Self {
            status: OutcomeStatus::Aborted,
            results,
            modified_files: Vec::new(),
            conflicts: Vec::new(),
            skipped: None,
        }
    }

    /// Classify task results and conflicts into an outcome.
    pub fn from_parts(
        results: Vec<TaskResult>,
        modified_files: Vec<String>,
        conflicts: Vec<ReconcileConflict>,
    ) -> Self {
        let status = if results.iter().any(|r| r.status == TaskStatus::Cancelled) {
            OutcomeStatus::Aborted
        } else if results.iter().any(|r| !r.status.is_success()) {
            OutcomeStatus::Failed
        } else if !conflicts.is_empty() {
            OutcomeStatus::PartialSuccess
        } else {
            OutcomeStatus::Success
        };
        Self {
            status,
            results,
            modified_files,
            conflicts,
            skipped: None,
        }
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| !r.status.is_success())
    }
}
