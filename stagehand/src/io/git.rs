//! Git adapter for stagehand.
//!
//! Every git operation goes through this small, explicit wrapper around `git`
//! subprocess calls. `GIT_DIR` and `GIT_WORK_TREE` are stripped from the child
//! environment so the located repository always wins over stray overrides.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::path::file_name;
use crate::io::process::{CommandOutput, run_command_cancellable};

/// Pathspecs handed to a single git invocation on the command line.
const PATHSPEC_CHUNK: usize = 256;

/// Flags producing a patch that `git apply --recount --unidiff-zero` accepts.
const PATCH_ARGS: &[&str] = &[
    "diff",
    "--binary",
    "--unified=0",
    "--no-color",
    "--no-ext-diff",
    "--src-prefix=a/",
    "--dst-prefix=b/",
    "--patch",
    "--submodule=short",
];

const APPLY_ARGS: &[&str] = &[
    "apply",
    "-v",
    "--whitespace=nowarn",
    "--recount",
    "--unidiff-zero",
];

/// Parsed `git status --porcelain=v1 -z` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Index column of the XY code.
    pub index: char,
    /// Working-tree column of the XY code.
    pub worktree: char,
    pub path: String,
    /// Source path for renames and copies.
    pub original_path: Option<String>,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.index == '?' && self.worktree == '?'
    }

    pub fn is_unmerged(&self) -> bool {
        matches!(
            (self.index, self.worktree),
            ('U', _) | (_, 'U') | ('A', 'A') | ('D', 'D')
        )
    }
}

/// Parsed `git diff --name-status -z` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    /// Status letter (`R100` is reported as `R`).
    pub status: char,
    pub path: String,
    pub original_path: Option<String>,
}

/// One entry of `git stash list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    /// Reflog selector, e.g. `stash@{0}`.
    pub selector: String,
    pub hash: String,
    pub message: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Trimmed stdout of a query, or `None` when git exits non-zero.
    pub fn try_capture(&self, args: &[&str]) -> Result<Option<String>> {
        let output = self.run(args)?;
        if !output.status.success() {
            debug!(
                args = %args.join(" "),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git query failed"
            );
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// True once the repository has a first commit.
    pub fn has_head(&self) -> Result<bool> {
        Ok(self
            .try_capture(&["rev-parse", "--verify", "--quiet", "HEAD"])?
            .is_some())
    }

    /// Status of tracked and untracked files, renames resolved.
    #[instrument(skip_all)]
    pub fn status(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_checked(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])?;
        parse_status_z(&out.stdout)
    }

    /// `git diff --name-status` with extra arguments (e.g. a range).
    #[instrument(skip_all)]
    pub fn diff_name_status(&self, extra: &[&str]) -> Result<Vec<DiffEntry>> {
        let mut args = vec!["diff", "--name-status", "-z", "--no-ext-diff"];
        args.extend_from_slice(extra);
        let out = self.run_checked(&args)?;
        parse_name_status_z(&out.stdout)
    }

    /// Paths from `git diff --name-only` with extra arguments.
    pub fn diff_name_only(&self, extra: &[&str]) -> Result<Vec<String>> {
        let mut args = vec!["diff", "--name-only", "-z", "--no-ext-diff"];
        args.extend_from_slice(extra);
        let out = self.run_checked(&args)?;
        Ok(split_nul(&out.stdout))
    }

    /// Working-tree files among `paths` that differ from the index.
    pub fn unstaged_among(&self, paths: &[String]) -> Result<Vec<String>> {
        let mut changed = Vec::new();
        for chunk in paths.chunks(PATHSPEC_CHUNK) {
            let mut args = vec!["--"];
            args.extend(chunk.iter().map(String::as_str));
            changed.extend(self.diff_name_only(&args)?);
        }
        Ok(changed)
    }

    /// True if the index differs from HEAD (or from the empty tree when unborn).
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_checked(&["diff", "--cached", "--name-only", "--no-ext-diff"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Tracked files deleted from the working tree.
    pub fn deleted_files(&self) -> Result<Vec<String>> {
        let out = self.run_checked(&["ls-files", "-z", "--deleted"])?;
        Ok(split_nul(&out.stdout))
    }

    /// Tracked and untracked (non-ignored) files whose name is one of `names`.
    pub fn find_files_named(&self, names: &[&str]) -> Result<Vec<String>> {
        let mut args = vec!["ls-files", "-z", "--cached", "--others", "--exclude-standard", "--"];
        let specs: Vec<String> = names.iter().map(|name| format!("*{name}")).collect();
        args.extend(specs.iter().map(String::as_str));
        let out = self.run_checked(&args)?;
        let mut found: Vec<String> = split_nul(&out.stdout)
            .into_iter()
            .filter(|path| names.contains(&file_name(path)))
            .collect();
        found.sort();
        found.dedup();
        Ok(found)
    }

    /// Record the index as a tree object.
    #[instrument(skip_all)]
    pub fn write_tree(&self) -> Result<String> {
        Ok(self.run_capture(&["write-tree"])?.trim().to_string())
    }

    /// Replace the index with `tree`.
    #[instrument(skip_all, fields(tree))]
    pub fn read_tree(&self, tree: &str) -> Result<()> {
        self.run_checked(&["read-tree", tree])?;
        Ok(())
    }

    /// Create a stash commit without touching the working tree.
    ///
    /// Returns `None` when there is nothing to stash.
    #[instrument(skip_all)]
    pub fn stash_create(&self) -> Result<Option<String>> {
        let hash = self.run_capture(&["stash", "create"])?.trim().to_string();
        Ok((!hash.is_empty()).then_some(hash))
    }

    #[instrument(skip_all, fields(hash))]
    pub fn stash_store(&self, hash: &str, message: &str) -> Result<()> {
        self.run_checked(&["stash", "store", "--quiet", "--message", message, hash])?;
        Ok(())
    }

    pub fn stash_list(&self) -> Result<Vec<StashEntry>> {
        let out = self.run_capture(&["stash", "list", "--format=%gd%x00%H%x00%gs"])?;
        Ok(parse_stash_list(&out))
    }

    /// Drop the stash entry pointing at `hash`, if still present.
    #[instrument(skip_all, fields(hash))]
    pub fn stash_drop_hash(&self, hash: &str) -> Result<bool> {
        let Some(entry) = self.stash_list()?.into_iter().find(|e| e.hash == hash) else {
            warn!(hash, "stash entry already gone");
            return Ok(false);
        };
        self.run_checked(&["stash", "drop", "--quiet", &entry.selector])?;
        Ok(true)
    }

    /// Binary-safe zero-context patch of working-tree changes to `paths`.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn diff_patch(&self, paths: &[String]) -> Result<Vec<u8>> {
        let mut patch = Vec::new();
        for chunk in paths.chunks(PATHSPEC_CHUNK) {
            let mut args = PATCH_ARGS.to_vec();
            args.push("--");
            args.extend(chunk.iter().map(String::as_str));
            patch.extend(self.run_checked(&args)?.stdout);
        }
        Ok(patch)
    }

    /// Apply a patch file to the working tree.
    #[instrument(skip_all, fields(patch = %patch.display()))]
    pub fn apply_file(&self, patch: &Path, extra: &[&str]) -> Result<()> {
        let patch = patch.to_string_lossy();
        let mut args = APPLY_ARGS.to_vec();
        args.extend_from_slice(extra);
        args.push(&patch);
        self.run_checked(&args)?;
        Ok(())
    }

    /// Apply patch bytes read from stdin.
    pub fn apply_bytes(&self, patch: &[u8], extra: &[&str]) -> Result<()> {
        let mut args = APPLY_ARGS.to_vec();
        args.extend_from_slice(extra);
        args.push("-");
        self.run_checked_with_input(&args, patch)?;
        Ok(())
    }

    /// Overwrite working-tree files with their index content.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn checkout_force(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.run_checked_with_input(
            &["checkout", "--force", "--pathspec-from-file=-", "--pathspec-file-nul"],
            &join_nul(paths),
        )?;
        Ok(())
    }

    /// Stage `paths` (deletions included).
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn add(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.run_checked_with_input(
            &["add", "--pathspec-from-file=-", "--pathspec-file-nul"],
            &join_nul(paths),
        )?;
        Ok(())
    }

    /// Write index content for `paths` to the working tree, overwriting.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn checkout_index(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.run_checked_with_input(&["checkout-index", "-f", "-z", "--stdin"], &join_nul(paths))?;
        Ok(())
    }

    /// Restore every tracked working-tree file from `source`.
    #[instrument(skip_all, fields(source))]
    pub fn restore_worktree(&self, source: &str) -> Result<()> {
        let source = format!("--source={source}");
        self.run_checked(&["restore", &source, "--worktree", "--", "."])?;
        Ok(())
    }

    /// Contents of `path` in `rev`.
    pub fn show_blob(&self, rev: &str, path: &str) -> Result<Vec<u8>> {
        let spec = format!("{rev}:{path}");
        Ok(self.run_checked(&["show", &spec])?.stdout)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run_checked_with_input(&self, args: &[&str], input: &[u8]) -> Result<CommandOutput> {
        let output = run_command_cancellable(
            self.command(args),
            Some(input),
            None,
            usize::MAX,
            &CancelToken::new(),
            &|_: &str| {},
        )
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.success {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        self.command(args)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }
}

fn split_nul(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == 0)
        .filter(|field| !field.is_empty())
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

fn join_nul(paths: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for path in paths {
        out.extend_from_slice(path.as_bytes());
        out.push(0);
    }
    out
}

fn parse_status_z(bytes: &[u8]) -> Result<Vec<StatusEntry>> {
    let mut fields = bytes.split(|b| *b == 0).filter(|f| !f.is_empty());
    let mut entries = Vec::new();
    while let Some(field) = fields.next() {
        let line = String::from_utf8_lossy(field);
        let mut chars = line.chars();
        let (Some(index), Some(worktree), Some(' ')) = (chars.next(), chars.next(), chars.next())
        else {
            return Err(anyhow!("unexpected porcelain entry: '{line}'"));
        };
        let path = chars.as_str().to_string();
        // Renames and copies carry the source path as the next field.
        let original_path = if matches!(index, 'R' | 'C') || matches!(worktree, 'R' | 'C') {
            let source = fields
                .next()
                .ok_or_else(|| anyhow!("rename entry without source: '{line}'"))?;
            Some(String::from_utf8_lossy(source).into_owned())
        } else {
            None
        };
        entries.push(StatusEntry {
            index,
            worktree,
            path,
            original_path,
        });
    }
    Ok(entries)
}

fn parse_name_status_z(bytes: &[u8]) -> Result<Vec<DiffEntry>> {
    let mut fields = bytes.split(|b| *b == 0).filter(|f| !f.is_empty());
    let mut entries = Vec::new();
    while let Some(code) = fields.next() {
        let code = String::from_utf8_lossy(code);
        let status = code
            .chars()
            .next()
            .ok_or_else(|| anyhow!("empty name-status code"))?;
        let mut next_path = || {
            fields
                .next()
                .map(|f| String::from_utf8_lossy(f).into_owned())
                .ok_or_else(|| anyhow!("name-status entry '{code}' without path"))
        };
        let (path, original_path) = if matches!(status, 'R' | 'C') {
            let source = next_path()?;
            (next_path()?, Some(source))
        } else {
            (next_path()?, None)
        };
        entries.push(DiffEntry {
            status,
            path,
            original_path,
        });
    }
    Ok(entries)
}

fn parse_stash_list(out: &str) -> Vec<StashEntry> {
    out.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\0');
            Some(StashEntry {
                selector: parts.next()?.to_string(),
                hash: parts.next()?.to_string(),
                message: parts.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_entries() {
        let raw = b"MM src/main.rs\0?? notes.txt\0A  new.rs\0";
        let entries = parse_status_z(raw).expect("parse");
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            StatusEntry {
                index: 'M',
                worktree: 'M',
                path: "src/main.rs".to_string(),
                original_path: None,
            }
        );
        assert!(entries[1].is_untracked());
        assert_eq!(entries[2].index, 'A');
    }

    #[test]
    fn parses_status_rename_with_source_field() {
        let raw = b"R  new name.txt\0old name.txt\0 M other.txt\0";
        let entries = parse_status_z(raw).expect("parse");
        assert_eq!(entries[0].path, "new name.txt");
        assert_eq!(entries[0].original_path.as_deref(), Some("old name.txt"));
        assert_eq!(entries[1].path, "other.txt");
    }

    #[test]
    fn rejects_malformed_status() {
        assert!(parse_status_z(b"X\0").is_err());
        assert!(parse_status_z(b"R  only-new.txt\0").is_err());
    }

    #[test]
    fn detects_unmerged_codes() {
        let entries = parse_status_z(b"UU conflict.txt\0AA both.txt\0M  fine.txt\0").expect("parse");
        assert!(entries[0].is_unmerged());
        assert!(entries[1].is_unmerged());
        assert!(!entries[2].is_unmerged());
    }

    #[test]
    fn parses_name_status_with_renames() {
        let raw = b"M\0a.js\0R100\0old.js\0new.js\0D\0gone.js\0";
        let entries = parse_name_status_z(raw).expect("parse");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].status, 'R');
        assert_eq!(entries[1].path, "new.js");
        assert_eq!(entries[1].original_path.as_deref(), Some("old.js"));
        assert_eq!(entries[2].status, 'D');
    }

    #[test]
    fn parses_stash_list_lines() {
        let out = "stash@{0}\0abc123\0stagehand automatic backup\nstash@{1}\0def456\0WIP on main\n";
        let entries = parse_stash_list(out);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].selector, "stash@{0}");
        assert_eq!(entries[0].message, "stagehand automatic backup");
        assert_eq!(entries[1].hash, "def456");
    }

    #[test]
    fn nul_helpers_round_trip_paths_with_spaces() {
        let paths = vec!["a b.txt".to_string(), "c.txt".to_string()];
        assert_eq!(split_nul(&join_nul(&paths)), paths);
    }
}
