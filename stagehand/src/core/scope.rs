//! Config scoping for nested configurations.
//!
//! A config owns the files below its directory that no deeper config owns.
//! Patterns prefixed with `../` reach into an ancestor directory instead and
//! are evaluated there in addition to whatever config owns those files.

use std::path::Path;

use tracing::warn;

use crate::core::path::{ancestor, is_within, parent_dir, relative_to_root};
use crate::core::template::TaskConfig;

/// A config with its directory expressed relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedConfig {
    /// Index into the caller's config list.
    pub index: usize,
    /// Repo-relative directory (`""` for the root).
    pub dir: String,
}

impl ScopedConfig {
    fn depth(&self) -> usize {
        if self.dir.is_empty() {
            0
        } else {
            self.dir.split('/').count()
        }
    }
}

/// Where a single pattern is evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternBase<'a> {
    /// Repo-relative directory the remainder is matched from.
    pub dir: String,
    /// Pattern with its leading `../` segments removed.
    pub remainder: &'a str,
    /// True when the pattern reaches into an ancestor directory.
    pub parent_glob: bool,
}

/// Count and strip leading `../` segments.
pub fn split_parent_glob(pattern: &str) -> (usize, &str) {
    let mut levels = 0;
    let mut rest = pattern;
    while let Some(stripped) = rest.strip_prefix("../") {
        levels += 1;
        rest = stripped;
    }
    (levels, rest)
}

/// Resolve the evaluation directory of `pattern` declared in a config at `dir`.
///
/// Returns `None` when the pattern reaches above the repository root.
pub fn pattern_base<'a>(dir: &str, pattern: &'a str) -> Option<PatternBase<'a>> {
    let (levels, remainder) = split_parent_glob(pattern);
    let base = ancestor(dir, levels)?;
    Some(PatternBase {
        dir: base,
        remainder,
        parent_glob: levels > 0,
    })
}

/// Express config directories relative to `root`, dropping configs outside it.
pub fn scoped_configs(configs: &[TaskConfig], root: &Path) -> Vec<ScopedConfig> {
    configs
        .iter()
        .enumerate()
        .filter_map(|(index, config)| match relative_to_root(root, &config.directory) {
            Some(dir) => Some(ScopedConfig { index, dir }),
            None => {
                warn!(
                    config = %config.source.display(),
                    root = %root.display(),
                    "config directory is outside the repository, ignoring"
                );
                None
            }
        })
        .collect()
}

/// Every config whose directory is an ancestor of (or equal to) the file's
/// directory, deepest first.
pub fn config_scope<'a>(scoped: &'a [ScopedConfig], file: &str) -> Vec<&'a ScopedConfig> {
    let file_dir = parent_dir(file);
    let mut applicable: Vec<&ScopedConfig> = scoped
        .iter()
        .filter(|config| config.dir == file_dir || is_within(&config.dir, file_dir))
        .collect();
    // Stable sort keeps declaration order among configs in the same directory.
    applicable.sort_by_key(|config| std::cmp::Reverse(config.depth()));
    applicable
}

/// The closest enclosing config, which owns the file's own-level patterns.
pub fn owning_config(scoped: &[ScopedConfig], file: &str) -> Option<usize> {
    config_scope(scoped, file).first().map(|config| config.index)
}
