//! Partial-stash isolation of staged content.
//!
//! An [`IsolationSession`] hides unstaged edits of partially staged files so
//! tasks only see what is staged, then either reconciles task output back into
//! the index or rolls everything back to the exact pre-run state.
//!
//! Persisted artifacts (all under the git dir, all detected by the next run):
//! - backup stash with message [`STASH_MESSAGE`]
//! - `stagehand_unstaged.patch` holding the hidden unstaged deltas
//! - `stagehand.lock` marking an active session

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::planner::Task;
use crate::core::types::{ReconcileConflict, TaskResult};
use crate::error::{ReconcileError, Result, StagehandError};
use crate::io::changes::ChangeSet;
use crate::io::git::Git;
use crate::io::repo::RepoLocation;

/// Message of the backup stash entry.
pub const STASH_MESSAGE: &str = "stagehand automatic backup";
pub const PATCH_FILE: &str = "stagehand_unstaged.patch";
pub const LOCK_FILE: &str = "stagehand.lock";
/// Directory (under the git dir) receiving pre-run copies of conflicted files.
pub const CONFLICT_DIR: &str = "stagehand/conflicts";

const MERGE_FILES: [&str; 3] = ["MERGE_HEAD", "MERGE_MODE", "MERGE_MSG"];

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Entered,
    TasksRun,
    Reconciling,
    Restored,
    RolledBack,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Restored | Self::RolledBack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolationOptions {
    /// Keep a backup stash of the working tree when anything is unstaged.
    pub backup: bool,
    pub hide_partially_staged: bool,
    pub allow_empty: bool,
}

/// What reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Staged files rewritten by passing tasks (now re-staged).
    pub modified_files: Vec<String>,
    pub conflicts: Vec<ReconcileConflict>,
}

/// One isolation session. Dropping it before a terminal phase rolls back.
#[derive(Debug)]
pub struct IsolationSession {
    git: Git,
    git_dir: PathBuf,
    options: IsolationOptions,
    phase: Phase,
    index_tree: Option<String>,
    stash: Option<String>,
    merged_paths: Vec<String>,
    deleted_files: Vec<String>,
    merge_state: Vec<(&'static str, Vec<u8>)>,
    touched: BTreeSet<String>,
    /// Per-file hidden deltas, in `merged_paths` order.
    hidden: Vec<PatchSection>,
    patch_written: bool,
    lock_held: bool,
}

impl IsolationSession {
    /// Snapshot the repository and hide unstaged deltas of partially staged files.
    ///
    /// Nothing is left behind on failure.
    #[instrument(skip_all, fields(git_dir = %location.git_dir))]
    pub fn enter(
        location: &RepoLocation,
        changes: &ChangeSet,
        options: IsolationOptions,
    ) -> Result<Self> {
        let git = Git::new(location.work_tree_path());
        let git_dir = location.git_dir_path().to_path_buf();

        let leftovers = find_leftovers(&git, &git_dir).map_err(StagehandError::Isolation)?;
        if !leftovers.is_empty() {
            return Err(StagehandError::Isolation(anyhow!(
                "found state from an interrupted run:\n  - {}",
                leftovers.join("\n  - ")
            )));
        }
        if changes.has_unmerged() {
            return Err(StagehandError::Isolation(anyhow!(
                "the index has unresolved merge conflicts; resolve them before running"
            )));
        }
        acquire_lock(&git_dir.join(LOCK_FILE)).map_err(StagehandError::Isolation)?;

        let mut session = Self {
            git,
            git_dir,
            options,
            phase: Phase::NotStarted,
            index_tree: None,
            stash: None,
            merged_paths: Vec::new(),
            deleted_files: Vec::new(),
            merge_state: Vec::new(),
            touched: BTreeSet::new(),
            hidden: Vec::new(),
            patch_written: false,
            lock_held: true,
        };
        if let Err(err) = session.snapshot(changes) {
            error!(err = %format!("{err:#}"), "snapshot failed, undoing");
            if let Err(undo) = session.rollback() {
                return Err(StagehandError::Isolation(err.context(format!("{undo:#}"))));
            }
            return Err(StagehandError::Isolation(err));
        }
        session.phase = Phase::Entered;
        info!(
            stash = ?session.stash,
            hidden = session.merged_paths.len(),
            "entered isolation"
        );
        Ok(session)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stash(&self) -> Option<&str> {
        self.stash.as_deref()
    }

    /// Files whose unstaged deltas were hidden.
    pub fn merged_paths(&self) -> &[String] {
        &self.merged_paths
    }

    /// Record the files tasks are about to run against.
    pub fn mark_tasks_run(&mut self, tasks: &[Task]) {
        self.touched
            .extend(tasks.iter().flat_map(|task| task.files.iter().cloned()));
        self.phase = Phase::TasksRun;
    }

    fn snapshot(&mut self, changes: &ChangeSet) -> anyhow::Result<()> {
        for name in MERGE_FILES {
            match fs::read(self.git_dir.join(name)) {
                Ok(contents) => self.merge_state.push((name, contents)),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err).with_context(|| format!("back up {name}")),
            }
        }

        self.index_tree = Some(self.git.write_tree().context("record index tree")?);

        if self.options.backup && changes.has_unstaged_tracked() {
            if self.git.has_head()? {
                self.deleted_files = self.git.deleted_files().context("list unstaged deletions")?;
                if let Some(hash) = self.git.stash_create().context("create backup stash")? {
                    self.git
                        .stash_store(&hash, STASH_MESSAGE)
                        .context("store backup stash")?;
                    debug!(stash = %hash, "stored backup stash");
                    self.stash = Some(hash);
                }
            } else {
                warn!("no commits yet, skipping backup stash");
            }
        }

        let partial = if self.options.hide_partially_staged {
            changes.partially_staged()
        } else {
            Vec::new()
        };
        if partial.is_empty() {
            return Ok(());
        }
        for path in &partial {
            let bytes = self
                .git
                .diff_patch(std::slice::from_ref(path))
                .with_context(|| format!("diff unstaged changes of {path}"))?;
            if !bytes.is_empty() {
                self.hidden.push(PatchSection {
                    path: path.clone(),
                    bytes,
                });
            }
        }
        if self.hidden.is_empty() {
            return Ok(());
        }
        let patch: Vec<u8> = self.hidden.iter().flat_map(|s| s.bytes.iter().copied()).collect();
        fs::write(self.patch_path(), &patch)
            .with_context(|| format!("write {}", self.patch_path().display()))?;
        self.patch_written = true;
        self.git
            .checkout_force(&partial)
            .context("hide unstaged changes")?;
        self.merged_paths = partial;
        Ok(())
    }

    /// Merge task output back into the index and restore hidden deltas.
    ///
    /// `results` must be indexed like `tasks`. Git failures roll the session
    /// back before returning.
    #[instrument(skip_all)]
    pub fn reconcile(&mut self, tasks: &[Task], results: &[TaskResult]) -> Result<Reconciled> {
        self.phase = Phase::Reconciling;
        let (failed, passed) = partition_files(tasks, results);

        let modified_files = match self.restage(&failed, &passed) {
            Ok(modified) => modified,
            Err(err) => return Err(self.rollback_with(ReconcileError::Git(err))),
        };

        if !self.options.allow_empty {
            match self.git.has_staged_changes() {
                Ok(true) => {}
                Ok(false) => {
                    warn!("tasks reverted every staged change");
                    return Err(self.rollback_with(ReconcileError::EmptyCommit));
                }
                Err(err) => return Err(self.rollback_with(ReconcileError::Git(err))),
            }
        }

        let conflicts = match self.restore_hidden() {
            Ok(conflicts) => conflicts,
            Err(err) => return Err(self.rollback_with(ReconcileError::Git(err))),
        };

        // Task output is staged at this point; a cleanup failure keeps it and
        // leaves the stash for the next run to report.
        let cleanup = self.finish();
        self.phase = Phase::Restored;
        cleanup.map_err(|err| StagehandError::Reconcile(ReconcileError::Git(err)))?;
        info!(
            modified = modified_files.len(),
            conflicts = conflicts.len(),
            "reconciled"
        );
        Ok(Reconciled {
            modified_files,
            conflicts,
        })
    }

    fn restage(&self, failed: &[String], passed: &[String]) -> anyhow::Result<Vec<String>> {
        let reverted = self.git.unstaged_among(failed).context("diff failed task files")?;
        if !reverted.is_empty() {
            debug!(files = reverted.len(), "reverting files of failed tasks");
            self.git
                .checkout_index(&reverted)
                .context("revert failed task files")?;
        }

        let modified = self.git.unstaged_among(passed).context("diff passing task files")?;
        if !modified.is_empty() {
            debug!(files = modified.len(), "re-staging task modifications");
            self.git.add(&modified).context("stage task modifications")?;
        }
        Ok(modified)
    }

    fn restore_hidden(&self) -> anyhow::Result<Vec<ReconcileConflict>> {
        if !self.patch_written {
            return Ok(Vec::new());
        }
        let patch_path = self.patch_path();
        match self.git.apply_file(&patch_path, &[]) {
            Ok(()) => {
                debug!("re-applied hidden changes");
                return Ok(Vec::new());
            }
            Err(err) => warn!(err = %format!("{err:#}"), "patch does not apply cleanly, retrying per file"),
        }

        let mut conflicts = Vec::new();
        for section in &self.hidden {
            if self.git.apply_bytes(&section.bytes, &[]).is_ok() {
                continue;
            }
            let mut detail = match self.git.apply_bytes(&section.bytes, &["--reject"]) {
                Ok(()) => "applied with rejected hunks".to_string(),
                Err(err) => format!("{err:#}"),
            };
            let backup_path = match self.save_conflict_copy(section) {
                Ok(path) => Some(path),
                Err(err) => {
                    error!(path = %section.path, err = %format!("{err:#}"), "failed to save pre-run copy");
                    detail.push_str(&format!("; pre-run copy not saved: {err:#}"));
                    None
                }
            };
            warn!(path = %section.path, backup = ?backup_path, "unstaged changes conflict with task edits");
            conflicts.push(ReconcileConflict {
                path: section.path.clone(),
                backup_path,
                detail,
            });
        }
        Ok(conflicts)
    }

    /// Save the full pre-run working copy (or the section itself without a stash).
    fn save_conflict_copy(&self, section: &PatchSection) -> anyhow::Result<PathBuf> {
        let (target, contents) = match &self.stash {
            Some(stash) => (
                self.git_dir.join(CONFLICT_DIR).join(&section.path),
                self.git
                    .show_blob(stash, &section.path)
                    .with_context(|| format!("read pre-run copy of {}", section.path))?,
            ),
            None => (
                self.git_dir
                    .join(CONFLICT_DIR)
                    .join(format!("{}.patch", section.path)),
                section.bytes.clone(),
            ),
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, contents).with_context(|| format!("write {}", target.display()))?;
        Ok(target)
    }

    /// Restore the exact pre-run index and working tree.
    ///
    /// Idempotent. When a restore step fails the stash and patch are kept and
    /// the error names them.
    #[instrument(skip_all, fields(phase = ?self.phase))]
    pub fn rollback(&mut self) -> anyhow::Result<()> {
        if self.phase.is_terminal() {
            return Ok(());
        }
        warn!("rolling back to the pre-run state");
        if let Err(err) = self.restore_original() {
            self.phase = Phase::RolledBack;
            self.release_lock();
            let mut recovery = Vec::new();
            if let Some(stash) = &self.stash {
                recovery.push(format!(
                    "backup stash {stash} (`git stash apply --index {stash}`)"
                ));
            }
            if self.patch_written {
                recovery.push(format!("patch {}", self.patch_path().display()));
            }
            let err = if recovery.is_empty() {
                err
            } else {
                err.context(format!("rollback incomplete; recover from {}", recovery.join(" and ")))
            };
            return Err(err);
        }
        let cleanup = self.finish();
        self.phase = Phase::RolledBack;
        cleanup
    }

    fn rollback_with(&mut self, reason: ReconcileError) -> StagehandError {
        match self.rollback() {
            Ok(()) => StagehandError::Reconcile(reason),
            Err(err) => StagehandError::Reconcile(ReconcileError::Git(
                err.context(format!("rolling back after: {reason}")),
            )),
        }
    }

    fn restore_original(&self) -> anyhow::Result<()> {
        if let Some(tree) = &self.index_tree {
            self.git.read_tree(tree).context("restore index")?;
        }

        let touched: Vec<String> = self
            .touched
            .iter()
            .chain(&self.merged_paths)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let differing = self.git.unstaged_among(&touched).context("diff touched files")?;
        self.git
            .checkout_index(&differing)
            .context("discard task edits")?;

        if let Some(stash) = &self.stash {
            self.git
                .restore_worktree(stash)
                .context("restore working tree from backup stash")?;
            for path in &self.deleted_files {
                let full = self.git.workdir().join(path);
                if full.exists() {
                    fs::remove_file(&full)
                        .with_context(|| format!("remove resurrected {}", full.display()))?;
                }
            }
        } else if self.patch_written {
            self.git
                .apply_file(&self.patch_path(), &[])
                .context("re-apply hidden changes")?;
        }

        for (name, contents) in &self.merge_state {
            let path = self.git_dir.join(name);
            fs::write(&path, contents).with_context(|| format!("restore {}", path.display()))?;
        }
        Ok(())
    }

    /// Remove the patch and stash, then release the lock.
    fn finish(&mut self) -> anyhow::Result<()> {
        for (name, contents) in &self.merge_state {
            let path = self.git_dir.join(name);
            if !path.exists() {
                fs::write(&path, contents).with_context(|| format!("restore {}", path.display()))?;
            }
        }
        if self.patch_written {
            remove_if_exists(&self.patch_path())?;
            self.patch_written = false;
        }
        if let Some(stash) = self.stash.take() {
            if let Err(err) = self.git.stash_drop_hash(&stash) {
                self.stash = Some(stash);
                return Err(err.context("drop backup stash"));
            }
        }
        self.release_lock();
        Ok(())
    }

    fn release_lock(&mut self) {
        if !self.lock_held {
            return;
        }
        if let Err(err) = remove_if_exists(&self.git_dir.join(LOCK_FILE)) {
            warn!(err = %format!("{err:#}"), "failed to release session lock");
        }
        self.lock_held = false;
    }

    fn patch_path(&self) -> PathBuf {
        self.git_dir.join(PATCH_FILE)
    }
}

impl Drop for IsolationSession {
    fn drop(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        warn!(phase = ?self.phase, "session dropped before finishing");
        if let Err(err) = self.rollback() {
            error!(err = %format!("{err:#}"), "rollback failed");
        }
    }
}

/// Describe state left by an interrupted run, one entry per artifact.
pub fn find_leftovers(git: &Git, git_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut found = Vec::new();
    for entry in git.stash_list().context("list stashes")? {
        if entry.message == STASH_MESSAGE {
            found.push(format!(
                "backup stash {} ({}): restore with `git stash apply --index {}`, then `git stash drop {}`",
                entry.selector, entry.hash, entry.selector, entry.selector
            ));
        }
    }
    let patch = git_dir.join(PATCH_FILE);
    if patch.exists() {
        found.push(format!(
            "hidden unstaged changes in {}: re-apply with `git apply {}`, then delete the file",
            patch.display(),
            patch.display()
        ));
    }
    let lock = git_dir.join(LOCK_FILE);
    if lock.exists() {
        found.push(format!(
            "session lock {}: another run is active, or remove it once nothing is running",
            lock.display()
        ));
    }
    Ok(found)
}

fn acquire_lock(path: &Path) -> anyhow::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create lock {}", path.display()))?;
    writeln!(file, "{}", std::process::id()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

/// Split task files into (failed, passed). A file any failing task covered
/// counts as failed.
fn partition_files(tasks: &[Task], results: &[TaskResult]) -> (Vec<String>, Vec<String>) {
    let mut failed = BTreeSet::new();
    let mut passed = BTreeSet::new();
    for (task, result) in tasks.iter().zip(results) {
        let target = if result.status.is_success() {
            &mut passed
        } else {
            &mut failed
        };
        target.extend(task.files.iter().cloned());
    }
    let passed = passed.difference(&failed).cloned().collect();
    (failed.into_iter().collect(), passed)
}

/// One file's section of a multi-file patch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PatchSection {
    path: String,
    bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::planner::Invocation;
    use crate::core::types::TaskStatus;

    fn task(id: usize, files: &[&str]) -> Task {
        Task {
            id,
            title: format!("task{id}"),
            cwd: PathBuf::from("/repo"),
            files: files.iter().map(|f| f.to_string()).collect(),
            invocations: vec![Invocation {
                line: "true".to_string(),
                argv: vec!["true".to_string()],
                shell: false,
            }],
            chunks: 1,
        }
    }

    fn result(id: usize, status: TaskStatus) -> TaskResult {
        TaskResult {
            task_id: id,
            title: format!("task{id}"),
            status,
            exit_code: Some(i32::from(!status.is_success())),
            failed_command: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        }
    }

    #[test]
    fn files_shared_with_a_failed_task_count_as_failed() {
        let tasks = vec![task(0, &["a.js", "shared.js"]), task(1, &["shared.js", "b.md"])];
        let results = vec![result(0, TaskStatus::Passed), result(1, TaskStatus::Failed)];
        let (failed, passed) = partition_files(&tasks, &results);
        assert_eq!(failed, vec!["b.md", "shared.js"]);
        assert_eq!(passed, vec!["a.js"]);
    }

    #[test]
    fn lock_is_exclusive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(LOCK_FILE);
        acquire_lock(&path).expect("first lock");
        assert!(acquire_lock(&path).is_err());
        remove_if_exists(&path).expect("remove");
        remove_if_exists(&path).expect("remove twice");
        acquire_lock(&path).expect("relock");
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Restored.is_terminal());
        assert!(Phase::RolledBack.is_terminal());
        assert!(!Phase::TasksRun.is_terminal());
        assert!(!Phase::NotStarted.is_terminal());
    }
}
