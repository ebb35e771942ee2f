//! Side-effecting collaborators: git, config files, subprocesses, isolation.

pub mod changes;
pub mod config;
pub mod executor;
pub mod git;
pub mod isolation;
pub mod process;
pub mod repo;
pub mod task_runner;
