//! Filesystem probe feeding the mode selector.

use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::mode::ProjectSnapshot;
use crate::io::feature_store::FeatureStore;
use crate::io::git::canonical;
use crate::io::markers::MarkerStore;

pub const SPEC_FILE: &str = "spec.md";
pub const CHANGELOG_FILE: &str = "CHANGELOG.md";

/// Observe the project and metadata directories.
pub fn snapshot(project_dir: &Path, metadata_dir: &Path) -> Result<ProjectSnapshot> {
    Ok(ProjectSnapshot {
        completion_pending: MarkerStore::new(metadata_dir).is_pending(),
        has_spec: metadata_dir.join(SPEC_FILE).is_file(),
        feature_count: FeatureStore::new(metadata_dir).count()?,
        has_changelog: metadata_dir.join(CHANGELOG_FILE).is_file(),
        project_has_content: has_content(project_dir, metadata_dir)?,
    })
}

/// True if `project_dir` holds anything besides `.git` and the metadata dir.
fn has_content(project_dir: &Path, metadata_dir: &Path) -> Result<bool> {
    let entries = match fs::read_dir(project_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err).with_context(|| format!("read {}", project_dir.display())),
    };
    let metadata_dir = canonical(metadata_dir);
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", project_dir.display()))?;
        let path = entry.path();
        if entry.file_name() == OsStr::new(".git") || canonical(&path) == metadata_dir {
            continue;
        }
        return Ok(true);
    }
    Ok(false)
}
