//! Run options and task configuration files.
//!
//! Task configs live in `.stagehand.toml` or `.stagehand.json` files anywhere
//! in the repository. Each holds a `[tasks]` table mapping glob patterns to
//! commands:
//!
//! ```toml
//! [tasks]
//! "*.rs" = "rustfmt --edition 2024"
//! "*.md" = ["markdownlint", "prettier --write"]
//! "../*.js" = { each = "echo level-2 > {file}" }
//! "*.sql" = { batch = "sqlfluff fix {files}" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::core::planner::default_max_arg_length;
use crate::core::template::{CommandTemplate, PatternEntry, TaskConfig};
use crate::error::{Result, StagehandError};
use crate::io::changes::ChangeMode;
use crate::io::git::Git;
use crate::io::task_runner::default_concurrency;

/// Config file names, in lookup order.
pub const CONFIG_FILE_NAMES: [&str; 2] = [".stagehand.toml", ".stagehand.json"];

/// Options for one run.
///
/// Built from CLI flags; defaults match a plain `stagehand` invocation in a
/// pre-commit hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub cwd: PathBuf,
    /// Explicit config file instead of discovery.
    pub config: Option<PathBuf>,
    /// Explicit files: match and run without git isolation.
    pub files: Vec<String>,
    pub mode: ChangeMode,
    /// `git --diff-filter` letters candidates must match.
    pub diff_filter: String,
    pub concurrency: usize,
    pub max_arg_length: usize,
    pub shell: bool,
    pub relative: bool,
    pub timeout: Option<Duration>,
    /// Truncate captured task stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Keep a backup stash of unstaged changes during the run.
    pub backup: bool,
    pub hide_partially_staged: bool,
    pub allow_empty: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            config: None,
            files: Vec::new(),
            mode: ChangeMode::Staged,
            diff_filter: "ACMR".to_string(),
            concurrency: default_concurrency(),
            max_arg_length: default_max_arg_length(),
            shell: false,
            relative: false,
            timeout: None,
            output_limit_bytes: 100_000,
            backup: true,
            hide_partially_staged: true,
            allow_empty: false,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        use std::sync::LazyLock;
        static DIFF_FILTER: LazyLock<regex::Regex> =
            LazyLock::new(|| regex::Regex::new(r"^[ACDMRTUXB]+$").unwrap());

        if self.concurrency == 0 {
            return Err(StagehandError::Config("concurrency must be > 0".to_string()));
        }
        if self.max_arg_length == 0 {
            return Err(StagehandError::Config("max_arg_length must be > 0".to_string()));
        }
        if self.output_limit_bytes == 0 {
            return Err(StagehandError::Config(
                "output_limit_bytes must be > 0".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(StagehandError::Config("timeout must be > 0".to_string()));
        }
        if !DIFF_FILTER.is_match(&self.diff_filter) {
            return Err(StagehandError::Config(format!(
                "invalid diff filter `{}` (expected letters from ACDMRTUXB)",
                self.diff_filter
            )));
        }
        if !self.files.is_empty() && self.mode != ChangeMode::Staged {
            return Err(StagehandError::Config(
                "explicit files cannot be combined with --diff or --working-tree".to_string(),
            ));
        }
        if let ChangeMode::Diff(range) = &self.mode
            && range.trim().is_empty()
        {
            return Err(StagehandError::Config("diff range must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    tasks: Map<String, Value>,
}

/// Load one config file; its patterns are anchored at `directory`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_task_config(path: &Path, directory: &Path) -> Result<TaskConfig> {
    let patterns = read_patterns(path).map_err(|err| StagehandError::Config(format!("{err:#}")))?;
    debug!(patterns = patterns.len(), "loaded task config");
    Ok(TaskConfig {
        directory: directory.to_path_buf(),
        source: path.to_path_buf(),
        patterns,
    })
}

/// Find and load every config file in the repository at `root`.
#[instrument(skip_all)]
pub fn discover_task_configs(git: &Git, root: &Path) -> Result<Vec<TaskConfig>> {
    let found = git
        .find_files_named(&CONFIG_FILE_NAMES)
        .map_err(|err| StagehandError::Config(format!("list config files: {err:#}")))?;
    let mut configs: Vec<TaskConfig> = Vec::new();
    for relative in found {
        let path = root.join(&relative);
        if !path.is_file() {
            debug!(path = %relative, "config listed but missing from disk, skipping");
            continue;
        }
        let directory = path.parent().unwrap_or(root).to_path_buf();
        if let Some(existing) = configs.iter().find(|c| c.directory == directory) {
            return Err(StagehandError::Config(format!(
                "both {} and {} configure {}",
                existing.source.display(),
                path.display(),
                directory.display()
            )));
        }
        configs.push(load_task_config(&path, &directory)?);
    }
    debug!(configs = configs.len(), "discovered task configs");
    Ok(configs)
}

/// The config file directly inside `dir`, if any.
pub fn find_local_config(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn read_patterns(path: &Path) -> anyhow::Result<Vec<PatternEntry>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: ConfigFile = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        }
        _ => toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?,
    };
    if file.tasks.is_empty() {
        bail!("{}: `tasks` must not be empty", path.display());
    }
    file.tasks
        .into_iter()
        .map(|(pattern, value)| {
            if pattern.trim().is_empty() {
                bail!("{}: empty pattern", path.display());
            }
            let templates = parse_templates(&value)
                .with_context(|| format!("{}: pattern `{pattern}`", path.display()))?;
            Ok(PatternEntry { pattern, templates })
        })
        .collect()
}

fn parse_templates(value: &Value) -> anyhow::Result<Vec<CommandTemplate>> {
    match value {
        Value::Array(items) if items.is_empty() => bail!("command list must not be empty"),
        Value::Array(items) => items.iter().map(parse_template).collect(),
        single => Ok(vec![parse_template(single)?]),
    }
}

fn parse_template(value: &Value) -> anyhow::Result<CommandTemplate> {
    match value {
        Value::String(command) if command.trim().is_empty() => bail!("command must not be empty"),
        Value::String(command) => Ok(CommandTemplate::literal(command.trim())),
        Value::Object(table) => parse_computed(table),
        other => Err(anyhow!("unsupported command value: {other}")),
    }
}

fn parse_computed(table: &Map<String, Value>) -> anyhow::Result<CommandTemplate> {
    let mut entries = table.iter();
    let (Some((kind, Value::String(template))), None) = (entries.next(), entries.next()) else {
        bail!("command table must have exactly one `each` or `batch` string");
    };
    if template.trim().is_empty() {
        bail!("`{kind}` command must not be empty");
    }
    match kind.as_str() {
        "each" => Ok(CommandTemplate::each(template.trim())),
        "batch" => Ok(CommandTemplate::batch(template.trim())),
        other => Err(anyhow!("unknown command kind `{other}` (expected `each` or `batch`)")),
    }
}
