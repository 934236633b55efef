//! Reader for `<metadata>/features/<id>/feature.json` and `<metadata>/todo.md`.
//!
//! Read-only: the agent owns these files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::feature::{self, RecordCheck};
use crate::core::filter::FeatureFilter;
use crate::core::todo::{self, TodoSummary};
use crate::core::types::FeatureRecord;

pub const FEATURES_DIR: &str = "features";
pub const FEATURE_FILE: &str = "feature.json";
pub const TODO_FILE: &str = "todo.md";

/// One record file and its check result.
#[derive(Debug, Clone)]
pub struct FeatureEntry {
    /// Name of the record directory (expected to equal the record id).
    pub dir_name: String,
    pub path: PathBuf,
    pub check: RecordCheck,
}

/// A structural problem tied to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub checked: usize,
    pub problems: Vec<Problem>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureStore {
    metadata_dir: PathBuf,
}

impl FeatureStore {
    pub fn new(metadata_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
        }
    }

    pub fn features_dir(&self) -> PathBuf {
        self.metadata_dir.join(FEATURES_DIR)
    }

    pub fn todo_path(&self) -> PathBuf {
        self.metadata_dir.join(TODO_FILE)
    }

    /// Record file paths, sorted. Directories without a record file are skipped.
    pub fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let dir = self.features_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            let path = entry.path().join(FEATURE_FILE);
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Read and check a single record file.
    pub fn read_entry(&self, path: &Path) -> Result<FeatureEntry> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let dir_name = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(FeatureEntry {
            dir_name,
            path: path.to_path_buf(),
            check: feature::check_record(&raw),
        })
    }

    #[instrument(skip_all)]
    pub fn load_all(&self) -> Result<Vec<FeatureEntry>> {
        let entries = self
            .record_paths()?
            .iter()
            .map(|path| self.read_entry(path))
            .collect::<Result<Vec<_>>>()?;
        debug!(count = entries.len(), "loaded feature records");
        Ok(entries)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.record_paths()?.len())
    }

    /// Parsed records that count toward the coding completion gate.
    pub fn coding_records(&self) -> Result<Vec<FeatureRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter_map(|entry| entry.check.record)
            .filter(|record| !record.is_audit_finding())
            .collect())
    }

    pub fn audit_records(&self) -> Result<Vec<FeatureRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter_map(|entry| entry.check.record)
            .filter(FeatureRecord::is_audit_finding)
            .collect())
    }

    pub fn matching(&self, filter: &FeatureFilter) -> Result<Vec<FeatureRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter_map(|entry| entry.check.record)
            .filter(|record| filter.matches(record))
            .collect())
    }

    /// TODO file contents, `None` when absent.
    pub fn read_todo(&self) -> Result<Option<String>> {
        let path = self.todo_path();
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("read {}", path.display()))
    }

    pub fn todo_summary(&self) -> Result<TodoSummary> {
        Ok(self
            .read_todo()?
            .map(|text| todo::summarize(&text))
            .unwrap_or_default())
    }

    /// Structural report over every record file.
    ///
    /// Held (`waiting_approval`) records are exempt from field checks.
    #[instrument(skip_all)]
    pub fn validate_store(&self) -> Result<ValidationReport> {
        let entries = self.load_all()?;
        let mut report = ValidationReport {
            checked: entries.len(),
            problems: Vec::new(),
        };

        for entry in &entries {
            if !entry.check.held {
                for message in &entry.check.errors {
                    report.problems.push(Problem {
                        path: entry.path.clone(),
                        message: message.clone(),
                    });
                }
            }
            if let Some(id) = &entry.check.id
                && id != &entry.dir_name
            {
                report.problems.push(Problem {
                    path: entry.path.clone(),
                    message: format!("id '{id}' does not match directory '{}'", entry.dir_name),
                });
            }
        }

        let records: Vec<FeatureRecord> = entries
            .iter()
            .filter_map(|entry| entry.check.record.clone())
            .collect();
        for message in feature::validate_invariants(&records) {
            report.problems.push(Problem {
                path: self.features_dir(),
                message,
            });
        }
        debug!(
            checked = report.checked,
            problems = report.problems.len(),
            "validated feature store"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, write_feature, write_raw_feature};

    #[test]
    fn missing_features_dir_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FeatureStore::new(temp.path());
        assert!(store.load_all().expect("load").is_empty());
        assert_eq!(store.todo_summary().expect("todo"), TodoSummary::default());
    }

    #[test]
    fn splits_coding_and_audit_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_feature(temp.path(), &feature("feature-a", true));
        let mut audit = feature("audit-security-1", false);
        audit.category = "security".to_string();
        write_feature(temp.path(), &audit);

        let store = FeatureStore::new(temp.path());
        let coding = store.coding_records().expect("coding");
        let audits = store.audit_records().expect("audit");
        assert_eq!(coding.len(), 1);
        assert_eq!(coding[0].id, "feature-a");
        assert_eq!(audits.len(), 1);

        let filter = FeatureFilter::parse("category=security").expect("filter");
        assert_eq!(store.matching(&filter).expect("match").len(), 1);
    }

    #[test]
    fn validate_reports_dangling_dependency_and_dir_mismatch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut a = feature("feature-a", true);
        a.dependencies = vec!["feature-zzz".to_string()];
        write_feature(temp.path(), &a);
        write_raw_feature(
            temp.path(),
            "feature-b",
            r#"{"id":"feature-c","category":"core","description":"d","status":"pending","priority":2,"passes":false}"#,
        );

        let report = FeatureStore::new(temp.path())
            .validate_store()
            .expect("validate");
        assert_eq!(report.checked, 2);
        let messages: Vec<&str> = report.problems.iter().map(|p| p.message.as_str()).collect();
        assert!(messages.contains(&"feature-a: unknown dependency 'feature-zzz'"));
        assert!(messages.contains(&"id 'feature-c' does not match directory 'feature-b'"));
    }

    #[test]
    fn validate_reports_duplicates_and_schema_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_feature(temp.path(), &feature("feature-a", true));
        write_raw_feature(
            temp.path(),
            "feature-a-copy",
            r#"{"id":"feature-a","category":"core","description":"d","status":"pending","priority":2,"passes":false}"#,
        );
        write_raw_feature(temp.path(), "feature-bad", r#"{"id":"feature-bad"}"#);

        let report = FeatureStore::new(temp.path())
            .validate_store()
            .expect("validate");
        assert!(!report.is_ok());
        assert!(
            report
                .problems
                .iter()
                .any(|p| p.message == "duplicate id 'feature-a'")
        );
        assert!(
            report
                .problems
                .iter()
                .any(|p| p.path.ends_with("feature-bad/feature.json"))
        );
    }

    #[test]
    fn held_record_is_not_a_problem() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_raw_feature(
            temp.path(),
            "feature-held",
            r#"{"status":"waiting_approval","passes":false}"#,
        );
        let report = FeatureStore::new(temp.path())
            .validate_store()
            .expect("validate");
        assert!(report.is_ok(), "{:?}", report.problems);
    }
}
