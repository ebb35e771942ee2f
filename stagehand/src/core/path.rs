//! Platform-independent path helpers.
//!
//! Every path stagehand compares is first normalized to forward slashes with
//! `.`/`..` resolved lexically, so prefix and equality checks behave the same
//! on every platform. Repo-relative paths use `""` for the repository root.

use std::path::Path;

/// Normalize a path string: forward slashes, no empty or `.` segments, `..`
/// resolved lexically, no trailing separator (except a bare root).
pub fn normalize_str(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Normalize a filesystem path (see [`normalize_str`]).
pub fn normalize_path(path: &Path) -> String {
    normalize_str(&path.to_string_lossy())
}

/// Resolve the repository root from `cwd` and git's `--show-prefix` output.
///
/// `relative_dir` is the path of `cwd` below the root (`"bar"` or `"bar/"`).
/// Without a hint, the normalized `cwd` is the root.
pub fn determine_git_dir(cwd: &Path, relative_dir: Option<&str>) -> String {
    let cwd = normalize_path(cwd);
    let hint = relative_dir
        .map(normalize_str)
        .filter(|hint| !hint.is_empty());
    let Some(hint) = hint else {
        return cwd;
    };
    if cwd == hint {
        return String::new();
    }
    if let Some(stripped) = cwd.strip_suffix(hint.as_str())
        && stripped.ends_with('/')
    {
        return normalize_str(stripped);
    }
    match cwd.rfind(hint.as_str()) {
        Some(idx) => normalize_str(&cwd[..idx]),
        None => cwd,
    }
}

/// Directory part of a repo-relative path (`""` for root-level files).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Final segment of a path.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Path of `path` relative to directory `dir`, if `path` lies below it.
pub fn strip_dir<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    if dir.is_empty() {
        return Some(path);
    }
    path.strip_prefix(dir)?.strip_prefix('/')
}

/// True if `path` lies anywhere below `dir`.
pub fn is_within(dir: &str, path: &str) -> bool {
    strip_dir(dir, path).is_some()
}

/// The `levels`-th ancestor of a repo-relative directory, or `None` if it
/// would leave the repository.
pub fn ancestor(dir: &str, levels: usize) -> Option<String> {
    let mut current = dir.to_string();
    for _ in 0..levels {
        if current.is_empty() {
            return None;
        }
        current = parent_dir(&current).to_string();
    }
    Some(current)
}

/// Join a repo-relative directory and a relative path.
pub fn join_rel(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        rel.to_string()
    } else {
        format!("{dir}/{rel}")
    }
}

/// Express an absolute directory relative to the repository root.
pub fn relative_to_root(root: &Path, dir: &Path) -> Option<String> {
    let root = normalize_path(root);
    let dir = normalize_path(dir);
    if dir == root {
        return Some(String::new());
    }
    let base = if root.ends_with('/') {
        root
    } else {
        format!("{root}/")
    };
    dir.strip_prefix(base.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn normalize_unifies_separators_and_dots() {
        assert_eq!(normalize_str("a\\b\\c"), "a/b/c");
        assert_eq!(normalize_str("/repo/./x//y/"), "/repo/x/y");
        assert_eq!(normalize_str("a/b/../c"), "a/c");
        assert_eq!(normalize_str("../x"), "../x");
        assert_eq!(normalize_str("/"), "/");
    }

    #[test]
    fn determine_git_dir_without_hint_is_cwd() {
        let cwd = PathBuf::from("/work/repo");
        assert_eq!(determine_git_dir(&cwd, None), "/work/repo");
        assert_eq!(determine_git_dir(&cwd, Some("")), "/work/repo");
    }

    #[test]
    fn determine_git_dir_strips_child_hint() {
        let cwd = PathBuf::from("/work/repo/bar");
        assert_eq!(determine_git_dir(&cwd, Some("bar")), "/work/repo");
    }

    #[test]
    fn determine_git_dir_strips_hint_with_trailing_separator() {
        let cwd = PathBuf::from("/work/repo/bar");
        assert_eq!(determine_git_dir(&cwd, Some("bar/")), "/work/repo");
        assert_eq!(
            determine_git_dir(&PathBuf::from("/work/repo/a/b"), Some("a/b/")),
            "/work/repo"
        );
    }

    #[test]
    fn ancestor_stops_at_root() {
        assert_eq!(ancestor("deeper/even", 1).as_deref(), Some("deeper"));
        assert_eq!(ancestor("deeper/even", 2).as_deref(), Some(""));
        assert_eq!(ancestor("deeper/even", 3), None);
    }

    #[test]
    fn strip_dir_requires_segment_boundary() {
        assert_eq!(strip_dir("deeper", "deeper/file.js"), Some("file.js"));
        assert_eq!(strip_dir("deeper", "deeperx/file.js"), None);
        assert_eq!(strip_dir("", "file.js"), Some("file.js"));
    }

    #[test]
    fn relative_to_root_handles_root_and_children() {
        let root = PathBuf::from("/repo");
        assert_eq!(relative_to_root(&root, &root).as_deref(), Some(""));
        assert_eq!(
            relative_to_root(&root, &root.join("deeper/even")).as_deref(),
            Some("deeper/even")
        );
        assert_eq!(relative_to_root(&root, &PathBuf::from("/other")), None);
    }
}
