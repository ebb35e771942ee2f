//! Repository discovery.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::path::{determine_git_dir, normalize_str};
use crate::io::git::Git;

/// Location of the repository containing a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    /// Absolute metadata directory (`.git`, or `.git/worktrees/<name>` in a
    /// linked worktree).
    pub git_dir: String,
    /// Absolute top-level of the working tree.
    pub work_tree: String,
}

/// Find the repository containing `cwd`.
///
/// `GIT_DIR` and `GIT_WORK_TREE` are ignored. Returns `Ok(None)` when `cwd` is
/// not inside a work tree.
#[instrument(skip_all, fields(cwd = %cwd.display()))]
pub fn locate(cwd: &Path) -> Result<Option<RepoLocation>> {
    let git = Git::new(cwd);
    let Some(prefix) = git.try_capture(&["rev-parse", "--show-prefix"])? else {
        debug!("not inside a git work tree");
        return Ok(None);
    };
    let git_dir = git
        .try_capture(&["rev-parse", "--absolute-git-dir"])?
        .context("git rev-parse --absolute-git-dir failed inside a work tree")?;

    let cwd = std::path::absolute(cwd).context("resolve working directory")?;
    let prefix = (!prefix.is_empty()).then_some(prefix.as_str());
    let location = RepoLocation {
        git_dir: normalize_str(&git_dir),
        work_tree: determine_git_dir(&cwd, prefix),
    };
    debug!(git_dir = %location.git_dir, work_tree = %location.work_tree, "located repository");
    Ok(Some(location))
}

impl RepoLocation {
    pub fn git_dir_path(&self) -> &Path {
        Path::new(&self.git_dir)
    }

    pub fn work_tree_path(&self) -> &Path {
        Path::new(&self.work_tree)
    }
}

