//! Glob matching of changed files against config patterns.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};

use crate::core::path::{file_name, strip_dir};
use crate::core::scope::{owning_config, pattern_base, scoped_configs};
use crate::core::template::{CommandTemplate, TaskConfig};
use crate::error::{Result, StagehandError};

/// Files matched by one pattern of one config.
#[derive(Debug, Clone)]
pub struct MatchGroup {
    /// Index of the originating config.
    pub config: usize,
    pub pattern: String,
    pub templates: Vec<CommandTemplate>,
    /// Repo-relative directory the pattern was evaluated from. Tasks run here.
    pub base_dir: String,
    pub parent_glob: bool,
    /// Repo-relative matched paths, in change-set order.
    pub files: Vec<String>,
}

/// A pattern compiled for matching. `*` stops at `/`, `**` crosses it, and
/// `{a,b}` selects alternatives.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    matcher: GlobMatcher,
    /// Patterns without a `/` match a file's basename at any depth.
    basename_only: bool,
}

impl CompiledPattern {
    pub fn new(pattern: &str, allow_basename: bool) -> Result<Self> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|err| StagehandError::Config(format!("invalid pattern `{pattern}`: {err}")))?
            .compile_matcher();
        Ok(Self {
            matcher,
            basename_only: allow_basename && !pattern.contains('/'),
        })
    }

    /// Match a path relative to the pattern's base directory.
    pub fn matches(&self, relative: &str) -> bool {
        let subject = if self.basename_only {
            file_name(relative)
        } else {
            relative
        };
        self.matcher.is_match(subject)
    }
}

/// Group `files` (repo-relative) by the config patterns that match them.
///
/// Own-level patterns only see files owned by their config; parent globs see
/// every file below their ancestor directory. Empty groups are dropped.
pub fn match_files(configs: &[TaskConfig], root: &Path, files: &[String]) -> Result<Vec<MatchGroup>> {
    let scoped = scoped_configs(configs, root);
    let owners: Vec<Option<usize>> = files
        .iter()
        .map(|file| owning_config(&scoped, file))
        .collect();

    let mut groups = Vec::new();
    for config in &scoped {
        let task_config = &configs[config.index];
        for entry in &task_config.patterns {
            let Some(base) = pattern_base(&config.dir, &entry.pattern) else {
                tracing::warn!(
                    pattern = %entry.pattern,
                    config = %task_config.source.display(),
                    "pattern reaches above the repository root, skipping"
                );
                continue;
            };
            let compiled = CompiledPattern::new(base.remainder, !base.parent_glob)?;

            let matched: Vec<String> = files
                .iter()
                .zip(&owners)
                .filter(|(_, owner)| base.parent_glob || **owner == Some(config.index))
                .filter_map(|(file, _)| {
                    let relative = strip_dir(&base.dir, file)?;
                    compiled.matches(relative).then(|| file.clone())
                })
                .collect();

            tracing::debug!(
                pattern = %entry.pattern,
                base = %base.dir,
                matched = matched.len(),
                "pattern evaluated"
            );
            if matched.is_empty() {
                continue;
            }
            groups.push(MatchGroup {
                config: config.index,
                pattern: entry.pattern.clone(),
                templates: entry.templates.clone(),
                base_dir: base.dir,
                parent_glob: base.parent_glob,
                files: matched,
            });
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::PatternEntry;
    use std::path::PathBuf;

    fn config(root: &Path, dir: &str, patterns: &[&str]) -> TaskConfig {
        TaskConfig {
            directory: root.join(dir),
            source: root.join(dir).join(".stagehand.toml"),
            patterns: patterns
                .iter()
                .map(|pattern| PatternEntry {
                    pattern: pattern.to_string(),
                    templates: vec![CommandTemplate::literal("true")],
                })
                .collect(),
        }
    }

    fn fixture_files() -> Vec<String> {
        [
            "file.js",
            "deeper/file.js",
            "deeper/even/file.js",
            "deeper/even/deeper/file.js",
            "a/very/deep/file/path/file.js",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn parent_glob_matches_only_the_exact_ancestor_level() {
        let root = PathBuf::from("/repo");
        let configs = vec![config(&root, "deeper/even", &["../*.js"])];
        let groups = match_files(&configs, &root, &fixture_files()).expect("match");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].files, vec!["deeper/file.js"]);
        assert_eq!(groups[0].base_dir, "deeper");
        assert!(groups[0].parent_glob);
    }

    #[test]
    fn parent_glob_with_globstar_re_descends() {
        let root = PathBuf::from("/repo");
        let configs = vec![config(&root, "deeper/even", &["../**/*.js"])];
        let groups = match_files(&configs, &root, &fixture_files()).expect("match");
        assert_eq!(
            groups[0].files,
            vec![
                "deeper/file.js",
                "deeper/even/file.js",
                "deeper/even/deeper/file.js"
            ]
        );
    }

    #[test]
    fn basename_patterns_match_at_any_depth_within_the_config() {
        let root = PathBuf::from("/repo");
        let configs = vec![config(&root, "", &["*.js"]), config(&root, "deeper", &["*.js"])];
        let groups = match_files(&configs, &root, &fixture_files()).expect("match");
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[0].files,
            vec!["file.js", "a/very/deep/file/path/file.js"]
        );
        assert_eq!(
            groups[1].files,
            vec![
                "deeper/file.js",
                "deeper/even/file.js",
                "deeper/even/deeper/file.js"
            ]
        );
    }

    #[test]
    fn parent_glob_is_additive_to_the_ancestor_config() {
        let root = PathBuf::from("/repo");
        let configs = vec![
            config(&root, "deeper", &["*.js"]),
            config(&root, "deeper/even", &["../*.js"]),
        ];
        let groups = match_files(&configs, &root, &fixture_files()).expect("match");
        assert_eq!(groups.len(), 2);
        assert!(groups[0].files.contains(&"deeper/file.js".to_string()));
        assert_eq!(groups[1].files, vec!["deeper/file.js"]);
    }

    #[test]
    fn path_patterns_and_case_sensitivity() {
        let root = PathBuf::from("/repo");
        let files = vec![
            "src/App.tsx".to_string(),
            "src/app.ts".to_string(),
            "test/app.ts".to_string(),
            ".eslintrc.js".to_string(),
        ];
        let configs = vec![config(&root, "", &["src/*.{ts,tsx}", "*.TS", ".*.js"])];
        let groups = match_files(&configs, &root, &files).expect("match");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].files, vec!["src/App.tsx", "src/app.ts"]);
        assert_eq!(groups[1].pattern, ".*.js");
    }

    #[test]
    fn brace_alternatives_may_span_directories() {
        let pattern = CompiledPattern::new("{docs/*.md,src/**/*.rs}", true).expect("compile");
        assert!(pattern.matches("docs/readme.md"));
        assert!(pattern.matches("src/core/lib.rs"));
        assert!(!pattern.matches("docs/nested/readme.md"));
        assert!(!pattern.matches("src/lib.md"));
    }

    #[test]
    fn invalid_patterns_are_config_errors() {
        let root = PathBuf::from("/repo");
        let configs = vec![config(&root, "", &["[*.js"])];
        let err = match_files(&configs, &root, &fixture_files()).unwrap_err();
        assert!(matches!(err, StagehandError::Config(_)));
    }
}
