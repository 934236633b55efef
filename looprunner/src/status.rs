//! Completion status for `looprunner check`.

use std::path::Path;

use anyhow::Result;

use crate::exit_codes;
use crate::io::completion::{CompletionDetector, CompletionReport, CompletionState, Evaluation};
use crate::io::markers::MarkerStore;

/// What `check` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Read-only view; the pending marker was not touched.
    Observed { evaluation: Evaluation, pending: bool },
    /// One detector pass; the pending marker advanced.
    Advanced(CompletionReport),
}

impl StatusOutcome {
    /// 73 once confirmed, 0 when all clear, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            StatusOutcome::Observed { evaluation, .. } if evaluation.all_clear() => exit_codes::OK,
            StatusOutcome::Advanced(report) => match report.state {
                CompletionState::Confirmed => exit_codes::PROJECT_COMPLETE,
                CompletionState::Pending => exit_codes::OK,
                CompletionState::NotComplete => exit_codes::GENERAL_ERROR,
            },
            StatusOutcome::Observed { .. } => exit_codes::GENERAL_ERROR,
        }
    }
}

/// Evaluate completion. With `advance`, run a real detector pass.
pub fn completion_status(project_dir: &Path, metadata_dir: &Path, advance: bool) -> Result<StatusOutcome> {
    let mut detector = CompletionDetector::new(metadata_dir, project_dir);
    if advance {
        return Ok(StatusOutcome::Advanced(detector.check()?));
    }
    let evaluation = detector.evaluate()?;
    let pending = MarkerStore::new(metadata_dir).is_pending();
    Ok(StatusOutcome::Observed { evaluation, pending })
}
