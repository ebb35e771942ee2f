//! Run tasks against staged git files without disturbing unstaged edits.
//!
//! A run resolves the staged change set, matches it against directory-local
//! task configs, hides unstaged deltas of partially staged files, runs the
//! matched commands in a bounded worker pool, and finally re-stages task
//! output (or rolls everything back). The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (path math, config scoping, glob
//!   matching, task planning). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (git, config files, subprocesses,
//!   the isolation session). Process spawning sits behind a trait so the
//!   runner can be tested without real children.
//!
//! [`pipeline`] wires the two together for the CLI.

pub mod cancel;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod listener;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
