//! Test-only helpers: throwaway git repositories and run options.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::config::RunOptions;

/// A git repository in a temporary directory, removed on drop.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Initialize an empty repository with a deterministic identity.
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.email", "stagehand@example.com"])?;
        repo.git(&["config", "user.name", "stagehand tests"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.git(&["config", "core.autocrlf", "false"])?;
        Ok(repo)
    }

    /// Repository with `files` committed as the initial commit.
    pub fn with_commit(files: &[(&str, &str)]) -> Result<Self> {
        let repo = Self::new()?;
        for (path, contents) in files {
            repo.write(path, contents)?;
        }
        repo.git(&["add", "-A"])?;
        repo.commit("initial")?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    /// Write a working-tree file, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.path(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Write a `.stagehand.toml` in `dir` (`""` for the root).
    pub fn write_config(&self, dir: &str, contents: &str) -> Result<()> {
        let rel = if dir.is_empty() {
            ".stagehand.toml".to_string()
        } else {
            format!("{dir}/.stagehand.toml")
        };
        self.write(&rel, contents)
    }

    /// Run git in the repository and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn stage(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.git(&args).map(|_| ())
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        self.git(&["commit", "-q", "--allow-empty", "-m", message])
            .map(|_| ())
    }

    /// Content of `rel` in the index.
    pub fn staged(&self, rel: &str) -> Result<String> {
        self.git(&["show", &format!(":{rel}")])
    }

    /// `git status --porcelain` output, for before/after comparisons.
    pub fn status(&self) -> Result<String> {
        self.git(&["status", "--porcelain=v1", "--untracked-files=all"])
    }

    /// Sequential run options rooted at this repository.
    pub fn options(&self) -> RunOptions {
        RunOptions {
            cwd: self.root().to_path_buf(),
            concurrency: 1,
            ..RunOptions::default()
        }
    }
}
