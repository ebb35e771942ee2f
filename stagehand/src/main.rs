//! Run formatters and linters against staged git files.
//!
//! Unstaged edits of partially staged files are hidden while tasks run and
//! restored afterwards; task edits to passing files are re-staged.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use stagehand::cancel::{CancelToken, install_signal_handler};
use stagehand::core::planner::default_max_arg_length;
use stagehand::error::StagehandError;
use stagehand::io::changes::ChangeMode;
use stagehand::io::config::RunOptions;
use stagehand::io::task_runner::default_concurrency;
use stagehand::listener::ConsoleListener;
use stagehand::{logging, pipeline};

#[derive(Parser)]
#[command(
    name = "stagehand",
    version,
    about = "Run tasks against staged git files without touching unstaged changes"
)]
struct Cli {
    /// Run against these files instead of the staged ones (no git isolation).
    #[arg(long, num_args = 1.., value_name = "FILE")]
    files: Vec<String>,

    /// Use this config file instead of discovering `.stagehand.toml`/`.stagehand.json`.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Working directory to run from.
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Run against files changed in a revision range (e.g. `main...HEAD`).
    #[arg(long, value_name = "RANGE", conflicts_with_all = ["working_tree", "files"])]
    diff: Option<String>,

    /// Run against every changed file in the working tree.
    #[arg(long, conflicts_with = "files")]
    working_tree: bool,

    /// Change kinds to include, as `git --diff-filter` letters.
    #[arg(long, default_value = "ACMR")]
    diff_filter: String,

    /// Maximum number of tasks running at once.
    #[arg(short = 'p', long, value_name = "N")]
    concurrency: Option<usize>,

    /// Split file arguments into chunks below this many bytes.
    #[arg(long, value_name = "BYTES")]
    max_arg_length: Option<usize>,

    /// Run commands through the system shell.
    #[arg(long)]
    shell: bool,

    /// Pass file paths relative to the task directory.
    #[arg(long)]
    relative: bool,

    /// Kill and fail any command running longer than this.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Skip the backup stash of unstaged changes.
    #[arg(long)]
    no_stash: bool,

    /// Let tasks see unstaged changes of partially staged files.
    #[arg(long)]
    no_hide_partially_staged: bool,

    /// Allow tasks to revert every staged change.
    #[arg(long)]
    allow_empty: bool,

    /// Show output of passing tasks.
    #[arg(short, long)]
    verbose: bool,

    /// Only report failures.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Print the run outcome as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Enable debug logging on stderr.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        let mode = match (&self.diff, self.working_tree) {
            (Some(range), _) => ChangeMode::Diff(range.clone()),
            (None, true) => ChangeMode::WorkingTree,
            (None, false) => ChangeMode::Staged,
        };
        RunOptions {
            cwd: self.cwd.clone().unwrap_or_else(|| PathBuf::from(".")),
            config: self.config.clone(),
            files: self.files.clone(),
            mode,
            diff_filter: self.diff_filter.clone(),
            concurrency: self.concurrency.unwrap_or_else(default_concurrency),
            max_arg_length: self.max_arg_length.unwrap_or_else(default_max_arg_length),
            shell: self.shell,
            relative: self.relative,
            timeout: self.timeout.map(Duration::from_secs),
            output_limit_bytes: RunOptions::default().output_limit_bytes,
            backup: !self.no_stash,
            hide_partially_staged: !self.no_hide_partially_staged,
            allow_empty: self.allow_empty,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("stagehand: {err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32, StagehandError> {
    let cancel = CancelToken::new();
    if let Err(err) = install_signal_handler(&cancel) {
        warn!(err = %format!("{err:#}"), "running without signal handling");
    }
    let listener = ConsoleListener::new(cli.verbose, cli.quiet);
    let outcome = pipeline::run(&cli.run_options(), &listener, &cancel)?;
    if cli.json {
        match serde_json::to_string_pretty(&outcome) {
            Ok(json) => println!("{json}"),
            Err(err) => warn!(err = %err, "failed to serialize outcome"),
        }
    }
    Ok(outcome.status.exit_code())
}
