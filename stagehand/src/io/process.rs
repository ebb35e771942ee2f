//! Helpers for running child processes with timeouts, cancellation, and bounded output.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// How often a running child is checked for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured child process output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            text.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        text
    }

    pub fn stderr_lossy(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.stderr_truncated > 0 {
            text.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        text
    }
}

/// Run a command, capturing stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs and every complete line is
/// passed to `on_line`. `output_limit_bytes` bounds the stored output per
/// stream (bytes beyond it are discarded while the pipe is still drained).
/// On unix the child leads its own process group, so a terminal interrupt
/// reaches it only through `cancel`. When `timeout` elapses or `cancel` is
/// raised the whole group is killed and the child reaped.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs()), output_limit_bytes))]
pub fn run_command_cancellable(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
    cancel: &CancelToken,
    on_line: &(dyn Fn(&str) + Sync),
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    if cancel.is_cancelled() {
        return Ok(CommandOutput {
            cancelled: true,
            ..CommandOutput::default()
        });
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let child_stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    thread::scope(|scope| {
        if let (Some(input), Some(mut pipe)) = (stdin, child_stdin) {
            scope.spawn(move || {
                // The child may exit without reading everything.
                if let Err(e) = pipe.write_all(input) {
                    debug!(err = %e, "stdin closed early");
                }
            });
        }
        let stdout_handle =
            scope.spawn(move || read_lines_limited(stdout, output_limit_bytes, on_line));
        let stderr_handle =
            scope.spawn(move || read_lines_limited(stderr, output_limit_bytes, on_line));

        let (exit_code, success, timed_out, cancelled) = wait_for_child(&mut child, timeout, cancel)?;

        let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
        let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        debug!(exit_code = ?exit_code, timed_out, cancelled, "command finished");
        Ok(CommandOutput {
            exit_code,
            success,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            timed_out,
            cancelled,
        })
    })
}

fn wait_for_child(
    child: &mut Child,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<(Option<i32>, bool, bool, bool)> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if let Some(status) = child.wait_timeout(POLL_INTERVAL).context("wait for command")? {
            return Ok((status.code(), status.success(), false, false));
        }
        let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
        let cancelled = cancel.is_cancelled();
        if timed_out || cancelled {
            if timed_out {
                warn!("command timed out, killing");
            } else {
                debug!("cancellation requested, killing command");
            }
            kill_process_tree(child)?;
            let status = child.wait().context("wait command after kill")?;
            return Ok((status.code(), false, timed_out, cancelled && !timed_out));
        }
    }
}

/// Kill the child and everything it spawned into its process group.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(errno) => {
            debug!(err = %errno, "killpg failed, killing child only");
            child.kill().context("kill command")
        }
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

fn join_output(
    handle: thread::ScopedJoinHandle<'_, Result<(Vec<u8>, usize)>>,
) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, forwarding each line.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    on_line: &(dyn Fn(&str) + Sync),
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        on_line(String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']));

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}
