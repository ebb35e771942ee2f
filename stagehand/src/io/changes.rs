//! Change set resolution.
//!
//! Lists every changed path with its kind and staged/unstaged flags, then
//! narrows it to the candidates tasks should see for the chosen mode.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::path::normalize_str;
use crate::core::types::{ChangeStatus, ChangedFile};
use crate::io::git::{DiffEntry, Git, StatusEntry};

/// Which changes tasks run against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChangeMode {
    /// Files with staged changes (the default pre-commit flow).
    #[default]
    Staged,
    /// Every tracked or untracked file changed in the working tree.
    WorkingTree,
    /// Files changed in a revision range (`main...HEAD`, `HEAD~1 HEAD`).
    Diff(String),
}

impl ChangeMode {
    /// Only the staged mode isolates and re-stages.
    pub fn isolates(&self) -> bool {
        matches!(self, Self::Staged)
    }
}

/// Everything git reported, plus the mode used to pick candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub mode: ChangeMode,
    pub files: Vec<ChangedFile>,
}

impl ChangeSet {
    /// Paths tasks may run against, in git's order.
    pub fn candidates(&self, diff_filter: &str) -> Vec<String> {
        self.files
            .iter()
            .filter(|file| match self.mode {
                ChangeMode::Staged => file.staged,
                ChangeMode::WorkingTree => file.staged || file.unstaged,
                ChangeMode::Diff(_) => true,
            })
            .filter(|file| diff_filter.contains(filter_letter(file.status)))
            .map(|file| file.path.clone())
            .collect()
    }

    /// Files with both staged and unstaged changes.
    pub fn partially_staged(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|file| file.is_partially_staged())
            .map(|file| file.path.clone())
            .collect()
    }

    /// True if any tracked file differs between index and working tree.
    pub fn has_unstaged_tracked(&self) -> bool {
        self.files
            .iter()
            .any(|file| file.unstaged && file.status != ChangeStatus::Untracked)
    }

    /// True if the index holds unresolved merge conflicts.
    pub fn has_unmerged(&self) -> bool {
        self.files
            .iter()
            .any(|file| file.status == ChangeStatus::Unmerged)
    }
}

/// Untracked files filter as additions.
fn filter_letter(status: ChangeStatus) -> char {
    match status {
        ChangeStatus::Untracked => 'A',
        other => other.letter(),
    }
}

/// Query git for the change set of `mode`.
#[instrument(skip_all, fields(mode = ?mode))]
pub fn resolve_changes(git: &Git, mode: &ChangeMode) -> Result<ChangeSet> {
    let files = match mode {
        ChangeMode::Staged | ChangeMode::WorkingTree => from_status(git.status()?),
        ChangeMode::Diff(range) => {
            let args: Vec<&str> = range.split_whitespace().collect();
            from_diff(git.diff_name_status(&args)?)
        }
    };
    debug!(files = files.len(), "resolved change set");
    Ok(ChangeSet {
        mode: mode.clone(),
        files,
    })
}

fn from_status(entries: Vec<StatusEntry>) -> Vec<ChangedFile> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let (status, staged, unstaged) = if entry.is_untracked() {
                (ChangeStatus::Untracked, false, true)
            } else if entry.is_unmerged() {
                (ChangeStatus::Unmerged, true, true)
            } else {
                let staged = entry.index != ' ';
                let unstaged = entry.worktree != ' ';
                let code = if staged { entry.index } else { entry.worktree };
                (ChangeStatus::from_code(code)?, staged, unstaged)
            };
            Some(ChangedFile {
                path: normalize_str(&entry.path),
                original_path: entry.original_path.as_deref().map(normalize_str),
                status,
                staged,
                unstaged,
            })
        })
        .collect()
}

fn from_diff(entries: Vec<DiffEntry>) -> Vec<ChangedFile> {
    entries
        .into_iter()
        .filter_map(|entry| {
            Some(ChangedFile {
                path: normalize_str(&entry.path),
                original_path: entry.original_path.as_deref().map(normalize_str),
                status: ChangeStatus::from_code(entry.status)?,
                staged: false,
                unstaged: false,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(index: char, worktree: char, path: &str) -> StatusEntry {
        StatusEntry {
            index,
            worktree,
            path: path.to_string(),
            original_path: None,
        }
    }

    fn staged_set() -> ChangeSet {
        ChangeSet {
            mode: ChangeMode::Staged,
            files: from_status(vec![
                status('M', ' ', "staged.js"),
                status('M', 'M', "partial.js"),
                status(' ', 'M', "unstaged.js"),
                status('?', '?', "untracked.js"),
                status('D', ' ', "removed.js"),
                status('A', 'D', "added-then-deleted.js"),
            ]),
        }
    }

    #[test]
    fn staged_mode_picks_staged_files_through_the_filter() {
        let set = staged_set();
        assert_eq!(
            set.candidates("ACMR"),
            vec!["staged.js", "partial.js", "added-then-deleted.js"]
        );
        assert_eq!(
            set.candidates("D"),
            vec!["removed.js"]
        );
    }

    #[test]
    fn partial_and_unstaged_detection() {
        let set = staged_set();
        assert_eq!(set.partially_staged(), vec!["partial.js", "added-then-deleted.js"]);
        assert!(set.has_unstaged_tracked());
        assert!(!set.has_unmerged());

        let clean = ChangeSet {
            mode: ChangeMode::Staged,
            files: from_status(vec![status('A', ' ', "a.js"), status('?', '?', "b.js")]),
        };
        assert!(clean.partially_staged().is_empty());
        assert!(!clean.has_unstaged_tracked());
    }

    #[test]
    fn working_tree_mode_includes_untracked_as_additions() {
        let mut set = staged_set();
        set.mode = ChangeMode::WorkingTree;
        let candidates = set.candidates("ACMR");
        assert!(candidates.contains(&"unstaged.js".to_string()));
        assert!(candidates.contains(&"untracked.js".to_string()));
        assert!(!candidates.contains(&"removed.js".to_string()));
    }

    #[test]
    fn renames_keep_their_source_path() {
        let mut entry = status('R', ' ', "new.js");
        entry.original_path = Some("old.js".to_string());
        let files = from_status(vec![entry]);
        assert_eq!(files[0].status, ChangeStatus::Renamed);
        assert_eq!(files[0].original_path.as_deref(), Some("old.js"));
    }

    #[test]
    fn unmerged_entries_are_flagged() {
        let set = ChangeSet {
            mode: ChangeMode::Staged,
            files: from_status(vec![status('U', 'U', "conflict.js")]),
        };
        assert!(set.has_unmerged());
        assert!(set.candidates("ACMR").is_empty());
    }

    #[test]
    fn diff_mode_takes_every_entry() {
        let set = ChangeSet {
            mode: ChangeMode::Diff("main...HEAD".to_string()),
            files: from_diff(vec![
                DiffEntry {
                    status: 'M',
                    path: "a.js".to_string(),
                    original_path: None,
                },
                DiffEntry {
                    status: 'D',
                    path: "b.js".to_string(),
                    original_path: None,
                },
            ]),
        };
        assert_eq!(set.candidates("ACMR"), vec!["a.js"]);
        assert!(!set.mode.isolates());
    }
}
