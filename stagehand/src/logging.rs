//! Diagnostic tracing for debugging stagehand itself.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the user-facing report.
//!
//! - **Progress (`listener`)**: Task lifecycle lines and the final summary.
//!   Always rendered, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset; `debug = true`
/// forces `stagehand=debug` regardless of the environment.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=stagehand=trace stagehand --shell
/// ```
pub fn init(debug: bool) {
    let filter = if debug {
        EnvFilter::new("stagehand=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // Already initialized when embedded or under tests.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
