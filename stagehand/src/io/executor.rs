//! Process-spawn abstraction for task invocations.
//!
//! The [`Spawner`] trait decouples the task runner from real subprocesses.
//! Tests use scripted spawners that return predetermined outputs without
//! spawning anything.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::core::planner::Invocation;
use crate::io::process::{CommandOutput, run_command_cancellable};

/// Parameters for one invocation.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub invocation: &'a Invocation,
    pub cwd: &'a Path,
    /// Per-invocation limit; exceeding it fails the task.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

/// Abstraction over process execution.
pub trait Spawner: Sync {
    /// Run one invocation to completion, forwarding output lines to `on_line`.
    fn spawn(
        &self,
        request: &SpawnRequest<'_>,
        cancel: &CancelToken,
        on_line: &(dyn Fn(&str) + Sync),
    ) -> Result<CommandOutput>;
}

/// Spawner that runs real subprocesses, directly or through the platform shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    #[instrument(skip_all, fields(line = %request.invocation.line, cwd = %request.cwd.display()))]
    fn spawn(
        &self,
        request: &SpawnRequest<'_>,
        cancel: &CancelToken,
        on_line: &(dyn Fn(&str) + Sync),
    ) -> Result<CommandOutput> {
        let mut cmd = build_command(request.invocation)?;
        cmd.current_dir(request.cwd);
        debug!("running task command");
        run_command_cancellable(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
            cancel,
            on_line,
        )
    }
}

fn build_command(invocation: &Invocation) -> Result<Command> {
    if invocation.shell {
        return Ok(shell_command(&invocation.line));
    }
    let (program, args) = invocation
        .argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}
