//! Per-iteration artifacts under `<metadata>/iterations/`.
//!
//! `<NNN>.log` holds every agent output line plus loop annotations;
//! `<NNN>.json` is the machine-readable [`IterationRecord`].

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::types::{IterationStatus, Phase};

pub const ITERATIONS_DIR: &str = "iterations";

/// Sidecar summary of one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub phase: Phase,
    pub prompt_path: String,
    pub status: IterationStatus,
    pub exit_code: i32,
    pub consecutive_failures: u32,
    pub nudges: u32,
    pub lines: usize,
    pub rate_limit_message: Option<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub log_path: PathBuf,
    pub record_path: PathBuf,
}

impl IterationPaths {
    pub fn new(metadata_dir: &Path, iteration: u32) -> Self {
        let dir = metadata_dir.join(ITERATIONS_DIR);
        Self {
            log_path: dir.join(format!("{iteration:03}.log")),
            record_path: dir.join(format!("{iteration:03}.json")),
        }
    }
}

/// Line sink for one iteration's transcript.
///
/// Write failures are logged and swallowed so they never abort supervision.
pub struct Transcript {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl Transcript {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    /// A transcript that drops everything.
    pub fn sink() -> Self {
        Self {
            path: PathBuf::new(),
            writer: None,
        }
    }

    pub fn write_line(&mut self, line: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = writer
            .write_all(line.trim_end_matches(['\r', '\n']).as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        if let Err(err) = result {
            warn!(path = %self.path.display(), err = %err, "transcript write failed");
        }
    }

    /// Loop-side annotation, prefixed so it stands apart from agent output.
    pub fn note(&mut self, message: &str) {
        self.write_line(&format!("[looprunner] {message}"));
    }
}

/// Next free iteration index (1-based), continuing after existing logs.
pub fn next_index(metadata_dir: &Path) -> Result<u32> {
    let dir = metadata_dir.join(ITERATIONS_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(1),
        Err(err) => return Err(err).with_context(|| format!("read {}", dir.display())),
    };
    let mut max = 0;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(n) = name
            .strip_suffix(".log")
            .and_then(|stem| stem.parse::<u32>().ok())
        {
            max = max.max(n);
        }
    }
    Ok(max + 1)
}

pub fn write_record(paths: &IterationPaths, record: &IterationRecord) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize iteration record")?;
    buf.push('\n');
    let tmp = paths.record_path.with_extension("json.tmp");
    fs::write(&tmp, buf).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, &paths.record_path)
        .with_context(|| format!("replace {}", paths.record_path.display()))?;
    Ok(())
}

/// Remove both artifacts of an iteration (used for rate-limited attempts).
pub fn discard(paths: &IterationPaths) -> Result<()> {
    for path in [&paths.log_path, &paths.record_path] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }
    Ok(())
}
