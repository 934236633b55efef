//! Cooperative cancellation: SIGINT/SIGTERM or a stop file.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::warn;

/// Shared cancellation flag, checked at iteration boundaries and while
/// the supervisor waits for output.
#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    stop_file: PathBuf,
}

impl Shutdown {
    /// A flag with no signal handler attached.
    pub fn new(stop_file: impl Into<PathBuf>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            stop_file: stop_file.into(),
        }
    }

    /// Install the process-wide SIGINT/SIGTERM handler. Call at most once.
    pub fn install(stop_file: impl Into<PathBuf>) -> Result<Self> {
        let shutdown = Self::new(stop_file);
        let flag = shutdown.flag.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received; stopping after cleanup");
            flag.store(true, Ordering::SeqCst);
        })
        .context("install signal handler")?;
        Ok(shutdown)
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.stop_file.exists()
    }
}
