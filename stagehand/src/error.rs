//! Error taxonomy for a stagehand run.
//!
//! Fatal errors surface as [`StagehandError`]. Task failures and reconcile
//! conflicts are not errors: they are recorded in the
//! [`RunOutcome`](crate::core::types::RunOutcome) and never abort sibling work.

use thiserror::Error;

/// Result type for stagehand operations.
pub type Result<T> = std::result::Result<T, StagehandError>;

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum StagehandError {
    /// Missing or malformed task configuration. No tasks ran.
    #[error("configuration error: {0}")]
    Config(String),

    /// A version-control query failed. Isolation was not entered.
    #[error("failed to resolve changes: {0:#}")]
    Resolution(anyhow::Error),

    /// Snapshot or restore failed. The working tree was left untouched, or a
    /// backup was kept and the message says where.
    #[error("isolation failed: {0:#}")]
    Isolation(anyhow::Error),

    /// A reconciliation step failed after tasks ran. The session was rolled back.
    #[error("reconciliation failed: {0}")]
    Reconcile(ReconcileError),

    /// The run was cancelled by a signal and rolled back.
    #[error("interrupted; original state restored")]
    Interrupted,
}

/// Reasons reconciliation refuses to complete.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Tasks reverted every staged change.
    #[error("prevented an empty git commit (pass --allow-empty to allow it)")]
    EmptyCommit,

    /// A git step of reconciliation failed.
    #[error("{0:#}")]
    Git(anyhow::Error),
}

impl StagehandError {
    /// Stable process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => crate::exit_codes::ABORTED,
            _ => crate::exit_codes::FATAL,
        }
    }
}
