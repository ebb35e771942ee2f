//! Resolved task configuration: directories, patterns, and command templates.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Function turning a file list into one or more command strings.
pub type ComputeFn = dyn Fn(&[String]) -> Vec<String> + Send + Sync;

/// How a pattern's command is built from its matched files.
#[derive(Clone)]
pub enum CommandTemplate {
    /// Fixed command; files are appended as arguments.
    Literal(String),
    /// Commands produced from the file list.
    Computed { label: String, compute: Arc<ComputeFn> },
}

impl CommandTemplate {
    pub fn literal(command: impl Into<String>) -> Self {
        Self::Literal(command.into())
    }

    pub fn computed<F>(label: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&[String]) -> Vec<String> + Send + Sync + 'static,
    {
        Self::Computed {
            label: label.into(),
            compute: Arc::new(compute),
        }
    }

    /// One command per file, substituting `{file}` with the quoted path.
    pub fn each(template: impl Into<String>) -> Self {
        let template = template.into();
        let label = template.clone();
        Self::computed(label, move |files| {
            files
                .iter()
                .map(|file| template.replace("{file}", &shell_words::quote(file)))
                .collect()
        })
    }

    /// One command for all files, substituting `{files}` (or appending them).
    pub fn batch(template: impl Into<String>) -> Self {
        let template = template.into();
        let label = template.clone();
        Self::computed(label, move |files| {
            let joined = shell_words::join(files);
            if template.contains("{files}") {
                vec![template.replace("{files}", &joined)]
            } else {
                vec![format!("{template} {joined}")]
            }
        })
    }

    /// Human-readable form used in titles and logs.
    pub fn label(&self) -> &str {
        match self {
            Self::Literal(command) => command,
            Self::Computed { label, .. } => label,
        }
    }
}

impl fmt::Debug for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(command) => f.debug_tuple("Literal").field(command).finish(),
            Self::Computed { label, .. } => f.debug_struct("Computed").field("label", label).finish(),
        }
    }
}

/// One glob pattern and its command pipeline.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub pattern: String,
    /// Run in order; the first failure stops the pipeline.
    pub templates: Vec<CommandTemplate>,
}

/// Task configuration anchored at a directory.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Absolute directory the patterns are relative to.
    pub directory: PathBuf,
    /// File the config was loaded from (for messages).
    pub source: PathBuf,
    /// Patterns in declaration order.
    pub patterns: Vec<PatternEntry>,
}
