//! Cancellation shared by the task pool, child processes, and the isolator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::warn;

/// One-way cancellation flag. Once raised it stays raised for the session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    raised: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Raise `token` on SIGINT/SIGTERM (Ctrl-C on Windows).
///
/// The process keeps running so the isolation session can roll back.
pub fn install_signal_handler(token: &CancelToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            warn!("interrupt received, stopping tasks and restoring original state");
        }
        token.cancel();
    })
    .context("install signal handler")
}
