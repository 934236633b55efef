//! Presence-only flag files under the metadata directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

pub const PENDING_MARKER: &str = ".completion_pending";
pub const STOP_FILE: &str = "STOP";

#[derive(Debug, Clone)]
pub struct MarkerStore {
    metadata_dir: PathBuf,
}

impl MarkerStore {
    pub fn new(metadata_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
        }
    }

    pub fn pending_path(&self) -> PathBuf {
        self.metadata_dir.join(PENDING_MARKER)
    }

    pub fn stop_path(&self) -> PathBuf {
        self.metadata_dir.join(STOP_FILE)
    }

    pub fn is_pending(&self) -> bool {
        self.pending_path().exists()
    }

    pub fn set_pending(&self) -> Result<()> {
        let path = self.pending_path();
        fs::create_dir_all(&self.metadata_dir)
            .with_context(|| format!("create directory {}", self.metadata_dir.display()))?;
        fs::write(&path, b"").with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "completion marker set");
        Ok(())
    }

    /// Remove the marker. Returns whether it existed.
    pub fn clear_pending(&self) -> Result<bool> {
        remove_if_present(&self.pending_path())
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_path().exists()
    }

    /// Consume the stop file so the next run starts normally.
    pub fn clear_stop(&self) -> Result<bool> {
        remove_if_present(&self.stop_path())
    }
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}
