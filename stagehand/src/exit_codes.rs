//! Stable exit codes for the stagehand CLI.

/// Every task passed (or nothing needed to run).
pub const OK: i32 = 0;
/// At least one task failed. Passing patterns were still staged.
pub const FAILED: i32 = 1;
/// Tasks passed but some unstaged changes conflicted with task edits.
pub const PARTIAL: i32 = 2;
/// Configuration, resolution, or isolation error. No tasks ran, or the run was rolled back.
pub const FATAL: i32 = 3;
/// Interrupted by a signal; original state restored.
pub const ABORTED: i32 = 130;
