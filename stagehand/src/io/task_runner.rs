//! Bounded worker pool executing planned tasks.
//!
//! Tasks are independent and run in parallel up to `concurrency`. The
//! invocations inside one task form a pipeline: they run in order and the
//! first failure stops the task without touching any other task.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::core::planner::Task;
use crate::core::types::{TaskResult, TaskStatus};
use crate::io::executor::{SpawnRequest, Spawner};
use crate::listener::ProgressListener;

/// Execution limits for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Maximum tasks running at once (at least 1).
    pub concurrency: usize,
    /// Per-invocation timeout.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

/// Default pool size: the available parallelism of the machine.
pub fn default_concurrency() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// Run every task and return one result per task, in task order.
///
/// Returns once all tasks are terminal. After `cancel` is raised no new task
/// starts and running children are killed; unstarted tasks report `Cancelled`.
pub fn run_tasks<S: Spawner + ?Sized>(
    tasks: &[Task],
    spawner: &S,
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
    options: &RunnerOptions,
) -> Vec<TaskResult> {
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<TaskResult>>> = Mutex::new(vec![None; tasks.len()]);
    let workers = options.concurrency.clamp(1, tasks.len().max(1));
    info!(tasks = tasks.len(), workers, "running tasks");

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(task) = tasks.get(index) else {
                        break;
                    };
                    let result = if cancel.is_cancelled() {
                        cancelled_result(task)
                    } else {
                        run_task(task, spawner, listener, cancel, options)
                    };
                    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
                    slots[index] = Some(result);
                }
            });
        }
    });

    slots
        .into_inner()
        .unwrap_or_else(|e| e.into_inner())
        .into_iter()
        .flatten()
        .collect()
}

fn run_task<S: Spawner + ?Sized>(
    task: &Task,
    spawner: &S,
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
    options: &RunnerOptions,
) -> TaskResult {
    listener.on_task_start(task);
    let started = Instant::now();
    let mut status = TaskStatus::Passed;
    let mut exit_code = None;
    let mut failed_command = None;
    let mut stdout = String::new();
    let mut stderr = String::new();

    let on_line = |line: &str| listener.on_task_output(task, line);
    for invocation in &task.invocations {
        if cancel.is_cancelled() {
            status = TaskStatus::Cancelled;
            break;
        }
        let request = SpawnRequest {
            invocation,
            cwd: &task.cwd,
            timeout: options.timeout,
            output_limit_bytes: options.output_limit_bytes,
        };
        debug!(task = %task.title, line = %invocation.line, "invoking");
        match spawner.spawn(&request, cancel, &on_line) {
            Ok(output) => {
                exit_code = output.exit_code;
                stdout.push_str(&output.stdout_lossy());
                stderr.push_str(&output.stderr_lossy());
                let failure = if output.cancelled {
                    Some(TaskStatus::Cancelled)
                } else if output.timed_out {
                    Some(TaskStatus::TimedOut)
                } else if !output.success {
                    Some(TaskStatus::Failed)
                } else {
                    None
                };
                if let Some(failure) = failure {
                    warn!(task = %task.title, line = %invocation.line, ?failure, "task command failed");
                    status = failure;
                    failed_command = Some(invocation.line.clone());
                    break;
                }
            }
            Err(err) => {
                warn!(task = %task.title, line = %invocation.line, err = %format!("{err:#}"), "failed to spawn");
                stderr.push_str(&format!("{err:#}\n"));
                status = TaskStatus::SpawnFailed;
                failed_command = Some(invocation.line.clone());
                break;
            }
        }
    }

    let result = TaskResult {
        task_id: task.id,
        title: task.title.clone(),
        status,
        exit_code,
        failed_command,
        stdout,
        stderr,
        duration_ms: started.elapsed().as_millis(),
    };
    listener.on_task_end(task, &result);
    result
}

fn cancelled_result(task: &Task) -> TaskResult {
    TaskResult {
        task_id: task.id,
        title: task.title.clone(),
        status: TaskStatus::Cancelled,
        exit_code: None,
        failed_command: None,
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::planner::Invocation;
    use crate::io::process::CommandOutput;
    use anyhow::{Result, anyhow};
    use std::path::PathBuf;

    /// Fails any invocation whose line contains `fail`; `spawn-error` errors;
    /// `cancel` raises the token.
    #[derive(Default)]
    struct ScriptedSpawner {
        calls: Mutex<Vec<String>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        delay: Duration,
    }

    impl Spawner for ScriptedSpawner {
        fn spawn(
            &self,
            request: &SpawnRequest<'_>,
            cancel: &CancelToken,
            on_line: &(dyn Fn(&str) + Sync),
        ) -> Result<CommandOutput> {
            let line = request.invocation.line.clone();
            self.calls.lock().expect("calls").push(line.clone());
            if line.contains("spawn-error") {
                return Err(anyhow!("no such program"));
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            if line.contains("cancel") {
                cancel.cancel();
            }
            on_line(&format!("ran {line}"));
            let success = !line.contains("fail");
            Ok(CommandOutput {
                exit_code: Some(if success { 0 } else { 1 }),
                success,
                stdout: format!("ran {line}\n").into_bytes(),
                ..CommandOutput::default()
            })
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl ProgressListener for RecordingListener {
        fn on_task_start(&self, task: &Task) {
            self.events.lock().expect("events").push(format!("start {}", task.title));
        }

        fn on_task_end(&self, task: &Task, result: &TaskResult) {
            self.events
                .lock()
                .expect("events")
                .push(format!("end {} {:?}", task.title, result.status));
        }
    }

    fn task(id: usize, lines: &[&str]) -> Task {
        Task {
            id,
            title: format!("task{id}"),
            cwd: PathBuf::from("/repo"),
            files: vec![format!("file{id}.js")],
            invocations: lines
                .iter()
                .map(|line| Invocation {
                    line: line.to_string(),
                    argv: vec![line.to_string()],
                    shell: false,
                })
                .collect(),
            chunks: 1,
        }
    }

    fn options(concurrency: usize) -> RunnerOptions {
        RunnerOptions {
            concurrency,
            timeout: None,
            output_limit_bytes: 1000,
        }
    }

    #[test]
    fn pipeline_short_circuits_without_affecting_siblings() {
        let spawner = ScriptedSpawner::default();
        let tasks = vec![task(0, &["lint", "fail-format", "never"]), task(1, &["ok"])];
        let results = run_tasks(&tasks, &spawner, &crate::listener::NoopListener, &CancelToken::new(), &options(2));

        assert_eq!(results[0].status, TaskStatus::Failed);
        assert_eq!(results[0].failed_command.as_deref(), Some("fail-format"));
        assert_eq!(results[0].exit_code, Some(1));
        assert_eq!(results[1].status, TaskStatus::Passed);
        let calls = spawner.calls.lock().expect("calls");
        assert!(!calls.contains(&"never".to_string()));
        assert!(calls.contains(&"ok".to_string()));
    }

    #[test]
    fn spawn_errors_fail_only_their_task() {
        let spawner = ScriptedSpawner::default();
        let tasks = vec![task(0, &["spawn-error"]), task(1, &["ok"])];
        let results = run_tasks(&tasks, &spawner, &crate::listener::NoopListener, &CancelToken::new(), &options(1));
        assert_eq!(results[0].status, TaskStatus::SpawnFailed);
        assert!(results[0].stderr.contains("no such program"));
        assert_eq!(results[1].status, TaskStatus::Passed);
    }

    #[test]
    fn concurrency_is_bounded() {
        let spawner = ScriptedSpawner {
            delay: Duration::from_millis(50),
            ..ScriptedSpawner::default()
        };
        let tasks: Vec<Task> = (0..4).map(|i| task(i, &["ok"])).collect();
        run_tasks(&tasks, &spawner, &crate::listener::NoopListener, &CancelToken::new(), &options(1));
        assert_eq!(spawner.max_running.load(Ordering::SeqCst), 1);

        let spawner = ScriptedSpawner {
            delay: Duration::from_millis(100),
            ..ScriptedSpawner::default()
        };
        run_tasks(&tasks, &spawner, &crate::listener::NoopListener, &CancelToken::new(), &options(4));
        assert!(spawner.max_running.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn cancellation_stops_remaining_work() {
        let spawner = ScriptedSpawner::default();
        let tasks = vec![task(0, &["cancel", "after"]), task(1, &["ok"]), task(2, &["ok"])];
        let cancel = CancelToken::new();
        let results = run_tasks(&tasks, &spawner, &crate::listener::NoopListener, &cancel, &options(1));

        assert!(cancel.is_cancelled());
        assert!(results.iter().all(|r| r.status == TaskStatus::Cancelled));
        assert_eq!(*spawner.calls.lock().expect("calls"), vec!["cancel".to_string()]);
    }

    #[test]
    fn listener_sees_start_and_end_for_every_task() {
        let spawner = ScriptedSpawner::default();
        let listener = RecordingListener::default();
        let tasks = vec![task(0, &["ok"]), task(1, &["fail"])];
        run_tasks(&tasks, &spawner, &listener, &CancelToken::new(), &options(1));
        let events = listener.events.lock().expect("events");
        assert_eq!(
            *events,
            vec![
                "start task0".to_string(),
                "end task0 Passed".to_string(),
                "start task1".to_string(),
                "end task1 Failed".to_string(),
            ]
        );
    }
}
