//! End-to-end orchestration of one run.
//!
//! Locate → resolve changes → match → isolate → plan → run → reconcile.
//! Once the isolation session is entered every exit path goes through either
//! reconciliation or rollback.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::matcher::match_files;
use crate::core::path::{normalize_path, relative_to_root};
use crate::core::planner::{PlanOptions, Task, plan_tasks};
use crate::core::template::TaskConfig;
use crate::core::types::{RunOutcome, SkipReason, TaskResult};
use crate::error::{Result, StagehandError};
use crate::io::changes::resolve_changes;
use crate::io::config::{RunOptions, discover_task_configs, find_local_config, load_task_config};
use crate::io::executor::ProcessSpawner;
use crate::io::git::Git;
use crate::io::isolation::{IsolationOptions, IsolationSession};
use crate::io::repo::{RepoLocation, locate};
use crate::io::task_runner::{RunnerOptions, run_tasks};
use crate::listener::ProgressListener;

/// Run tasks against the changes `options` selects.
#[instrument(skip_all)]
pub fn run(
    options: &RunOptions,
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    options.validate()?;
    let cwd = std::path::absolute(&options.cwd)
        .map_err(|err| StagehandError::Config(format!("resolve working directory: {err}")))?;
    let location = locate(&cwd).map_err(StagehandError::Resolution)?;

    let outcome = match (&location, options.files.is_empty()) {
        (Some(location), true) => run_in_repo(options, location, &cwd, listener, cancel)?,
        (location, false) => run_on_files(options, location.as_ref(), &cwd, listener, cancel)?,
        (None, true) => {
            return Err(StagehandError::Resolution(anyhow::anyhow!(
                "{} is not inside a git repository; pass files explicitly to run without one",
                cwd.display()
            )));
        }
    };
    listener.on_run_end(&outcome);
    Ok(outcome)
}

fn run_in_repo(
    options: &RunOptions,
    location: &RepoLocation,
    cwd: &Path,
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    let root = location.work_tree_path();
    let git = Git::new(root);
    let configs = load_configs(options, cwd, Some((&git, root)))?;

    listener.on_step("resolving changes");
    let changes = resolve_changes(&git, &options.mode).map_err(StagehandError::Resolution)?;
    let candidates = changes.candidates(&options.diff_filter);
    if candidates.is_empty() {
        info!("no changed files");
        return Ok(RunOutcome::skipped(SkipReason::NoChangedFiles));
    }

    let tasks = plan(options, &configs, root, &candidates)?;
    if tasks.is_empty() {
        info!(candidates = candidates.len(), "no changed file matches any task");
        return Ok(RunOutcome::skipped(SkipReason::NoMatchingFiles));
    }

    if !options.mode.isolates() {
        let results = execute(options, &tasks, listener, cancel);
        return Ok(RunOutcome::from_parts(results, Vec::new(), Vec::new()));
    }

    listener.on_step("hiding unstaged changes");
    let mut session = IsolationSession::enter(
        location,
        &changes,
        IsolationOptions {
            backup: options.backup,
            hide_partially_staged: options.hide_partially_staged,
            allow_empty: options.allow_empty,
        },
    )?;
    if cancel.is_cancelled() {
        session.rollback().map_err(StagehandError::Isolation)?;
        return Err(StagehandError::Interrupted);
    }

    session.mark_tasks_run(&tasks);
    let results = execute(options, &tasks, listener, cancel);

    if cancel.is_cancelled() {
        listener.on_step("restoring original state");
        session.rollback().map_err(StagehandError::Isolation)?;
        return Ok(RunOutcome::aborted(results));
    }

    listener.on_step("applying task modifications");
    let reconciled = session.reconcile(&tasks, &results)?;
    Ok(RunOutcome::from_parts(
        results,
        reconciled.modified_files,
        reconciled.conflicts,
    ))
}

/// Match and run against an explicit file list. Never isolates or stages.
fn run_on_files(
    options: &RunOptions,
    location: Option<&RepoLocation>,
    cwd: &Path,
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    let root = location.map_or(cwd, RepoLocation::work_tree_path);
    let git = location.map(|l| Git::new(l.work_tree_path()));
    let configs = load_configs(options, cwd, git.as_ref().map(|g| (g, root)))?;

    let files = explicit_files(cwd, root, &options.files);
    if files.is_empty() {
        return Ok(RunOutcome::skipped(SkipReason::NoChangedFiles));
    }
    let tasks = plan(options, &configs, root, &files)?;
    if tasks.is_empty() {
        return Ok(RunOutcome::skipped(SkipReason::NoMatchingFiles));
    }
    let results = execute(options, &tasks, listener, cancel);
    Ok(RunOutcome::from_parts(results, Vec::new(), Vec::new()))
}

fn load_configs(
    options: &RunOptions,
    cwd: &Path,
    repo: Option<(&Git, &Path)>,
) -> Result<Vec<TaskConfig>> {
    let configs = match (&options.config, repo) {
        (Some(path), _) => vec![load_task_config(&cwd.join(path), cwd)?],
        (None, Some((git, root))) => discover_task_configs(git, root)?,
        (None, None) => match find_local_config(cwd) {
            Some(path) => vec![load_task_config(&path, cwd)?],
            None => Vec::new(),
        },
    };
    if configs.is_empty() {
        return Err(StagehandError::Config(
            "no .stagehand.toml or .stagehand.json found".to_string(),
        ));
    }
    Ok(configs)
}

fn plan(options: &RunOptions, configs: &[TaskConfig], root: &Path, files: &[String]) -> Result<Vec<Task>> {
    let groups = match_files(configs, root, files)?;
    let tasks = plan_tasks(
        &groups,
        root,
        &PlanOptions {
            max_arg_length: options.max_arg_length,
            relative: options.relative,
            shell: options.shell,
        },
    )?;
    debug!(groups = groups.len(), tasks = tasks.len(), "planned tasks");
    Ok(tasks)
}

fn execute(
    options: &RunOptions,
    tasks: &[Task],
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
) -> Vec<TaskResult> {
    listener.on_step("running tasks");
    run_tasks(
        tasks,
        &ProcessSpawner,
        listener,
        cancel,
        &RunnerOptions {
            concurrency: options.concurrency,
            timeout: options.timeout,
            output_limit_bytes: options.output_limit_bytes,
        },
    )
}

/// Express user-supplied files relative to `root`, dropping ones outside it
/// or missing from disk.
fn explicit_files(cwd: &Path, root: &Path, files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter_map(|file| {
            let absolute = PathBuf::from(normalize_path(&cwd.join(file)));
            if !absolute.exists() {
                warn!(file = %file, "file does not exist, skipping");
                return None;
            }
            let relative = relative_to_root(root, &absolute);
            if relative.is_none() {
                warn!(file = %file, root = %root.display(), "file is outside the project, skipping");
            }
            relative.filter(|rel| !rel.is_empty())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_files_are_made_root_relative() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        std::fs::create_dir_all(root.join("sub")).expect("mkdir");
        std::fs::write(root.join("sub/a.js"), "a").expect("write");
        std::fs::write(root.join("b.js"), "b").expect("write");

        let files = explicit_files(
            &root.join("sub"),
            root,
            &["a.js".to_string(), "../b.js".to_string(), "missing.js".to_string()],
        );
        assert_eq!(files, vec!["sub/a.js", "b.js"]);
    }

    #[test]
    fn files_outside_the_root_are_skipped() {
        let outer = tempfile::tempdir().expect("tempdir");
        let root = outer.path().join("project");
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::write(outer.path().join("outside.js"), "x").expect("write");
        let files = explicit_files(&root, &root, &["../outside.js".to_string()]);
        assert!(files.is_empty());
    }
}
