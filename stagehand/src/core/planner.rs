//! Turns match groups into executable tasks.
//!
//! Each group becomes one [`Task`]: its file list is split into argument
//! chunks and every chunk runs the group's command pipeline in order.

use std::path::{Path, PathBuf};

use crate::core::argv::split_command;
use crate::core::matcher::MatchGroup;
use crate::core::path::{normalize_path, strip_dir};
use crate::core::template::CommandTemplate;
use crate::error::Result;

/// Conservative per-invocation argument budget: half the platform limit.
pub fn default_max_arg_length() -> usize {
    let platform_limit = if cfg!(target_os = "macos") {
        262_144
    } else if cfg!(windows) {
        8_191
    } else {
        131_072
    };
    platform_limit / 2
}

/// Planner inputs that do not come from the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub max_arg_length: usize,
    /// Pass paths relative to the task cwd instead of absolute paths.
    pub relative: bool,
    /// Run commands through the platform shell.
    pub shell: bool,
}

/// A single process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Display form; also the script passed to the shell in shell mode.
    pub line: String,
    /// Program and arguments (empty in shell mode).
    pub argv: Vec<String>,
    pub shell: bool,
}

/// One pattern's pipeline over all of its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: usize,
    /// Pattern plus the config directory it came from.
    pub title: String,
    pub cwd: PathBuf,
    /// Repo-relative files this task covers (for reconciliation).
    pub files: Vec<String>,
    /// Chunk-major: all pipeline steps for chunk 0, then chunk 1, ...
    pub invocations: Vec<Invocation>,
    /// Number of argument chunks.
    pub chunks: usize,
}

/// Split `files` into `min(ceil(len / max_arg_length), n)` balanced chunks,
/// where `len` is the space-joined length. Order is preserved.
pub fn chunk_files(files: &[String], max_arg_length: usize) -> Vec<Vec<String>> {
    if files.is_empty() {
        return Vec::new();
    }
    let serialized = files.iter().map(String::len).sum::<usize>() + files.len() - 1;
    let wanted = serialized.div_ceil(max_arg_length.max(1));
    let count = wanted.clamp(1, files.len());

    let base = files.len() / count;
    let extra = files.len() % count;
    let mut chunks = Vec::with_capacity(count);
    let mut start = 0;
    for i in 0..count {
        let size = base + usize::from(i < extra);
        chunks.push(files[start..start + size].to_vec());
        start += size;
    }
    chunks
}

/// Build one task per match group.
pub fn plan_tasks(groups: &[MatchGroup], root: &Path, options: &PlanOptions) -> Result<Vec<Task>> {
    groups
        .iter()
        .enumerate()
        .map(|(id, group)| plan_task(id, group, root, options))
        .collect()
}

fn plan_task(id: usize, group: &MatchGroup, root: &Path, options: &PlanOptions) -> Result<Task> {
    let cwd = if group.base_dir.is_empty() {
        root.to_path_buf()
    } else {
        root.join(&group.base_dir)
    };
    let args: Vec<String> = group
        .files
        .iter()
        .map(|file| file_argument(root, &group.base_dir, file, options.relative))
        .collect();
    let chunks = chunk_files(&args, options.max_arg_length);

    let mut invocations = Vec::new();
    for chunk in &chunks {
        for template in &group.templates {
            invocations.extend(resolve_template(template, chunk, options.shell)?);
        }
    }

    let title = if group.base_dir.is_empty() {
        group.pattern.clone()
    } else {
        format!("{} ({})", group.pattern, group.base_dir)
    };
    Ok(Task {
        id,
        title,
        cwd,
        files: group.files.clone(),
        invocations,
        chunks: chunks.len(),
    })
}

fn file_argument(root: &Path, base_dir: &str, file: &str, relative: bool) -> String {
    if relative && let Some(rel) = strip_dir(base_dir, file) {
        return rel.to_string();
    }
    normalize_path(&root.join(file))
}

/// Resolve one template against one chunk of file arguments.
pub fn resolve_template(
    template: &CommandTemplate,
    files: &[String],
    shell: bool,
) -> Result<Vec<Invocation>> {
    match template {
        CommandTemplate::Literal(command) => {
            let line = if files.is_empty() {
                command.clone()
            } else {
                format!("{command} {}", shell_words::join(files))
            };
            if shell {
                return Ok(vec![Invocation {
                    line,
                    argv: Vec::new(),
                    shell: true,
                }]);
            }
            let mut argv = split_command(command)?;
            argv.extend(files.iter().cloned());
            Ok(vec![Invocation {
                line,
                argv,
                shell: false,
            }])
        }
        CommandTemplate::Computed { compute, label } => {
            let commands = compute(files);
            if commands.is_empty() {
                tracing::debug!(template = %label, "computed template produced no commands");
            }
            commands
                .into_iter()
                .map(|line| {
                    let argv = if shell {
                        Vec::new()
                    } else {
                        split_command(&line)?
                    };
                    Ok(Invocation { line, argv, shell })
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagehandError;

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("file{i}.js")).collect()
    }

    fn group(pattern: &str, base_dir: &str, files: Vec<String>, templates: Vec<CommandTemplate>) -> MatchGroup {
        MatchGroup {
            config: 0,
            pattern: pattern.to_string(),
            templates,
            base_dir: base_dir.to_string(),
            parent_glob: false,
            files,
        }
    }

    #[test]
    fn chunk_count_is_ceiling_of_serialized_length() {
        // Nine 8-byte names joined by spaces: 80 bytes.
        let list = files(9);
        assert_eq!(chunk_files(&list, 1000).len(), 1);
        assert_eq!(chunk_files(&list, 27).len(), 3);
        assert_eq!(chunk_files(&list, 40).len(), 2);
        let chunks = chunk_files(&list, 27);
        assert!(chunks.iter().all(|chunk| chunk.len() == 3));
        assert_eq!(chunks.concat(), list);
    }

    #[test]
    fn chunk_count_never_exceeds_file_count() {
        let list = files(3);
        let chunks = chunk_files(&list, 1);
        assert_eq!(chunks.len(), 3);
        assert!(chunk_files(&[], 10).is_empty());
    }

    #[test]
    fn literal_templates_append_files_per_chunk() {
        let root = PathBuf::from("/repo");
        let g = group(
            "*.js",
            "",
            files(4),
            vec![CommandTemplate::literal("eslint --fix"), CommandTemplate::literal("prettier --write")],
        );
        let options = PlanOptions {
            max_arg_length: 20,
            relative: true,
            shell: false,
        };
        let tasks = plan_tasks(&[g], &root, &options).expect("plan");
        let task = &tasks[0];
        assert_eq!(task.chunks, 2);
        assert_eq!(task.cwd, root);
        let lines: Vec<&str> = task.invocations.iter().map(|i| i.line.as_str()).collect();
        assert_eq!(
            lines,
            vec![
                "eslint --fix file0.js file1.js",
                "prettier --write file0.js file1.js",
                "eslint --fix file2.js file3.js",
                "prettier --write file2.js file3.js",
            ]
        );
        assert_eq!(task.invocations[0].argv, vec!["eslint", "--fix", "file0.js", "file1.js"]);
    }

    #[test]
    fn absolute_paths_and_parent_glob_cwd() {
        let root = PathBuf::from("/repo");
        let mut g = group(
            "../*.js",
            "deeper",
            vec!["deeper/file.js".to_string()],
            vec![CommandTemplate::each("echo level-2 > {file}")],
        );
        g.parent_glob = true;
        let options = PlanOptions {
            max_arg_length: default_max_arg_length(),
            relative: false,
            shell: true,
        };
        let tasks = plan_tasks(&[g], &root, &options).expect("plan");
        assert_eq!(tasks[0].cwd, PathBuf::from("/repo/deeper"));
        assert_eq!(tasks[0].title, "../*.js (deeper)");
        assert_eq!(
            tasks[0].invocations,
            vec![Invocation {
                line: "echo level-2 > /repo/deeper/file.js".to_string(),
                argv: Vec::new(),
                shell: true,
            }]
        );
    }

    #[test]
    fn malformed_literal_is_a_config_error() {
        let root = PathBuf::from("/repo");
        let g = group("*.js", "", files(1), vec![CommandTemplate::literal("eslint 'oops")]);
        let options = PlanOptions {
            max_arg_length: 100,
            relative: false,
            shell: false,
        };
        assert!(matches!(
            plan_tasks(&[g], &root, &options),
            Err(StagehandError::Config(_))
        ));
    }
}
