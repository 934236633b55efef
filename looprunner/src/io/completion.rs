//! Two-phase completion detection.
//!
//! The first all-clear evaluation only sets the pending marker; the project
//! is confirmed complete when the next evaluation is still all-clear. Any
//! failure in between clears the marker.
//!
//! Under git, records whose files are unchanged since they were last checked
//! in this process reuse the cached result. The cache lives only as long as
//! the detector.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::feature::RecordCheck;
use crate::io::feature_store::FeatureStore;
use crate::io::git::{Git, canonical};
use crate::io::markers::MarkerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    NotComplete,
    /// First all-clear seen; confirmation pass pending.
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub state: CompletionState,
    /// Ids (or directory names when unreadable) of failing coding records.
    pub failing: Vec<String>,
    pub has_blocking_todos: bool,
    /// Audit findings not yet passing. Never blocks the coding gate.
    pub unfixed_audit_findings: usize,
    /// Records read from disk during this check.
    pub revalidated: usize,
}

/// Marker-independent view of the feature store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub failing: Vec<String>,
    pub has_blocking_todos: bool,
    pub unfixed_audit_findings: usize,
    /// Records held for approval.
    pub held: usize,
    pub revalidated: usize,
}

impl Evaluation {
    pub fn all_clear(&self) -> bool {
        self.failing.is_empty() && !self.has_blocking_todos
    }
}

pub struct CompletionDetector {
    store: FeatureStore,
    markers: MarkerStore,
    git: Git,
    cache: HashMap<PathBuf, RecordCheck>,
    last_head: Option<String>,
}

impl CompletionDetector {
    pub fn new(metadata_dir: impl Into<PathBuf>, project_dir: impl Into<PathBuf>) -> Self {
        let metadata_dir = metadata_dir.into();
        Self {
            store: FeatureStore::new(&metadata_dir),
            markers: MarkerStore::new(&metadata_dir),
            git: Git::new(project_dir),
            cache: HashMap::new(),
            last_head: None,
        }
    }

    /// Evaluate records and TODOs without touching the pending marker.
    #[instrument(skip_all)]
    pub fn evaluate(&mut self) -> Result<Evaluation> {
        let paths = self.store.record_paths()?;
        let changed = self.changed_records();

        let mut eval = Evaluation::default();
        let mut seen = HashSet::new();

        for path in paths {
            let key = canonical(&path);
            let fresh = match &changed {
                Some(changed) => changed.contains(&key) || !self.cache.contains_key(&key),
                None => true,
            };
            if fresh {
                let entry = self.store.read_entry(&path)?;
                if !entry.check.errors.is_empty() && !entry.check.held {
                    debug!(path = %path.display(), errors = ?entry.check.errors, "invalid record");
                }
                self.cache.insert(key.clone(), entry.check);
                eval.revalidated += 1;
            }
            let Some(check) = self.cache.get(&key) else {
                continue;
            };
            seen.insert(key);

            if check.held {
                eval.held += 1;
            }
            if !check.is_failing() {
                continue;
            }
            if check.is_audit_finding() {
                eval.unfixed_audit_findings += 1;
            } else {
                eval.failing.push(record_label(check, &path));
            }
        }
        self.cache.retain(|key, _| seen.contains(key));

        eval.has_blocking_todos = self.store.todo_summary()?.has_blocking();
        Ok(eval)
    }

    /// Evaluate and advance the two-phase marker.
    pub fn check(&mut self) -> Result<CompletionReport> {
        let eval = self.evaluate()?;
        let state = if eval.all_clear() {
            if self.markers.clear_pending()? {
                info!("completion confirmed");
                CompletionState::Confirmed
            } else {
                self.markers.set_pending()?;
                info!("all clear; confirmation pending");
                CompletionState::Pending
            }
        } else {
            if self.markers.clear_pending()? {
                info!(
                    failing = eval.failing.len(),
                    has_blocking_todos = eval.has_blocking_todos,
                    "completion marker withdrawn"
                );
            }
            CompletionState::NotComplete
        };

        Ok(CompletionReport {
            state,
            failing: eval.failing,
            has_blocking_todos: eval.has_blocking_todos,
            unfixed_audit_findings: eval.unfixed_audit_findings,
            revalidated: eval.revalidated,
        })
    }

    /// Changed record paths under git; `None` means revalidate everything.
    fn changed_records(&mut self) -> Option<HashSet<PathBuf>> {
        if !self.git.is_repo() {
            return None;
        }
        let features_dir = self.store.features_dir();
        if self.git.is_ignored(&features_dir) {
            debug!("records are gitignored; revalidating every record");
            return None;
        }
        let head = self.git.head_sha();
        let last_head = std::mem::replace(&mut self.last_head, head.clone());
        if last_head.is_none() && head.is_some() && !self.cache.is_empty() {
            // First commit appeared since the cache was filled.
            return None;
        }
        match self
            .git
            .changed_paths_under(&features_dir, last_head.as_deref())
        {
            Ok(paths) => Some(paths.into_iter().map(|path| canonical(&path)).collect()),
            Err(err) => {
                warn!(error = %err, "git query failed; revalidating every record");
                None
            }
        }
    }
}

fn record_label(check: &RecordCheck, path: &std::path::Path) -> String {
    if let Some(id) = &check.id {
        return id.clone();
    }
    path.parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, write_feature, write_raw_feature};
    use std::fs;

    fn detector(dir: &std::path::Path) -> CompletionDetector {
        CompletionDetector::new(dir, dir)
    }

    #[test]
    fn all_clear_goes_pending_then_confirmed() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_feature(temp.path(), &feature("feature-a", true));
        let mut detector = detector(temp.path());

        assert_eq!(detector.check().expect("check").state, CompletionState::Pending);
        assert!(MarkerStore::new(temp.path()).is_pending());
        assert_eq!(detector.check().expect("check").state, CompletionState::Confirmed);
        assert!(!MarkerStore::new(temp.path()).is_pending());
    }

    #[test]
    fn failure_between_passes_withdraws_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_feature(temp.path(), &feature("feature-a", true));
        let mut detector = detector(temp.path());
        assert_eq!(detector.check().expect("check").state, CompletionState::Pending);

        write_feature(temp.path(), &feature("feature-b", false));
        let report = detector.check().expect("check");
        assert_eq!(report.state, CompletionState::NotComplete);
        assert_eq!(report.failing, vec!["feature-b"]);
        assert!(!MarkerStore::new(temp.path()).is_pending());
    }

    #[test]
    fn blocking_todo_prevents_completion() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_feature(temp.path(), &feature("feature-a", true));
        fs::write(temp.path().join("todo.md"), "- [x] a\n- [~] b\n").expect("write");
        let mut detector = detector(temp.path());
        assert_eq!(detector.check().expect("check").state, CompletionState::Pending);

        fs::write(temp.path().join("todo.md"), "- [x] a\n- [ ] c\n").expect("write");
        let report = detector.check().expect("check");
        assert!(report.has_blocking_todos);
        assert_eq!(report.state, CompletionState::NotComplete);
    }

    #[test]
    fn held_record_does_not_block() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_feature(temp.path(), &feature("feature-a", true));
        write_raw_feature(
            temp.path(),
            "feature-held",
            r#"{"status":"waiting_approval","passes":false}"#,
        );
        let report = detector(temp.path()).check().expect("check");
        assert_eq!(report.state, CompletionState::Pending);
    }

    #[test]
    fn audit_findings_are_counted_not_blocking() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_feature(temp.path(), &feature("feature-a", true));
        write_feature(temp.path(), &feature("audit-security-1", false));
        let report = detector(temp.path()).check().expect("check");
        assert_eq!(report.state, CompletionState::Pending);
        assert_eq!(report.unfixed_audit_findings, 1);
    }

    #[test]
    fn backlog_with_passes_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut record = feature("feature-a", true);
        record.status = crate::core::types::FeatureStatus::Backlog;
        write_feature(temp.path(), &record);
        let report = detector(temp.path()).check().expect("check");
        assert_eq!(report.failing, vec!["feature-a"]);
    }

    #[test]
    fn outside_git_every_record_is_reread() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_feature(temp.path(), &feature("feature-a", true));
        write_feature(temp.path(), &feature("feature-b", true));
        let mut detector = detector(temp.path());
        assert_eq!(detector.check().expect("check").revalidated, 2);
        assert_eq!(detector.check().expect("check").revalidated, 2);
    }
}
