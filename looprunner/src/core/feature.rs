//! Feature record validation: schema conformance plus semantic invariants.
//!
//! Operates on raw file contents so callers can report parse failures with
//! the same shape as schema violations.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use jsonschema::Validator;
use serde_json::Value;

use crate::core::types::{FeatureRecord, FeatureStatus};

const FEATURE_SCHEMA: &str = include_str!("../../schemas/feature.schema.json");

static FEATURE_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(FEATURE_SCHEMA).expect("embedded feature schema should be json");
    jsonschema::validator_for(&schema).expect("embedded feature schema should compile")
});

/// Result of checking one feature record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCheck {
    /// `id` as written in the file, if readable.
    pub id: Option<String>,
    /// Parsed record, present when the file deserializes.
    pub record: Option<FeatureRecord>,
    /// `status=waiting_approval`: held for human review, never failing.
    pub held: bool,
    /// Structural problems (parse, schema, inconsistent state).
    pub errors: Vec<String>,
}

impl RecordCheck {
    /// True if this record blocks the completion gate.
    pub fn is_failing(&self) -> bool {
        if self.held {
            return false;
        }
        !self.errors.is_empty() || self.record.as_ref().is_none_or(|r| !r.passes)
    }

    pub fn is_audit_finding(&self) -> bool {
        match &self.record {
            Some(record) => record.is_audit_finding(),
            None => self.id.as_deref().is_some_and(|id| id.starts_with("audit-")),
        }
    }
}

/// Parse and validate one record file body.
pub fn check_record(raw: &str) -> RecordCheck {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            return RecordCheck {
                id: None,
                record: None,
                held: false,
                errors: vec![format!("parse json: {err}")],
            };
        }
    };

    let id = value
        .get("id")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let held = value.get("status").and_then(Value::as_str)
        == Some(FeatureStatus::WaitingApproval.as_str());

    let mut errors = schema_errors(&value);
    let record = if errors.is_empty() {
        match serde_json::from_value::<FeatureRecord>(value) {
            Ok(record) => Some(record),
            Err(err) => {
                errors.push(format!("deserialize record: {err}"));
                None
            }
        }
    } else {
        // Held records are read best-effort so audit bookkeeping still sees them.
        serde_json::from_value::<FeatureRecord>(value).ok()
    };

    if let Some(record) = &record
        && record.is_inconsistent()
    {
        errors.push("passes=true but status=backlog".to_string());
    }

    RecordCheck {
        id,
        record,
        held,
        errors,
    }
}

/// Validate a JSON value against the embedded feature schema.
pub fn schema_errors(value: &Value) -> Vec<String> {
    FEATURE_VALIDATOR
        .iter_errors(value)
        .map(|err| {
            let path = err.instance_path().to_string();
            if path.is_empty() {
                err.to_string()
            } else {
                format!("{path}: {err}")
            }
        })
        .collect()
}

/// Check invariants across the whole record set:
/// - No duplicate ids
/// - Every dependency references an existing id
/// - No record depends on itself
pub fn validate_invariants(records: &[FeatureRecord]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.id.as_str()).or_default() += 1;
    }
    let mut duplicates: Vec<&str> = counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(id, _)| *id)
        .collect();
    duplicates.sort_unstable();
    for id in duplicates {
        errors.push(format!("duplicate id '{id}'"));
    }

    let known: HashSet<&str> = counts.keys().copied().collect();
    for record in records {
        for dep in &record.dependencies {
            if dep == &record.id {
                errors.push(format!("{}: depends on itself", record.id));
            } else if !known.contains(dep.as_str()) {
                errors.push(format!("{}: unknown dependency '{dep}'", record.id));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::feature;

    #[test]
    fn passing_record_is_not_failing() {
        let check = check_record(
            r#"{"id":"feature-1","category":"core","description":"d","status":"completed","priority":2,"passes":true}"#,
        );
        assert!(check.errors.is_empty(), "{:?}", check.errors);
        assert!(!check.is_failing());
    }

    #[test]
    fn passes_false_is_failing_without_errors() {
        let check = check_record(
            r#"{"id":"feature-1","category":"core","description":"d","status":"pending","priority":2,"passes":false}"#,
        );
        assert!(check.errors.is_empty());
        assert!(check.is_failing());
    }

    #[test]
    fn backlog_with_passes_is_inconsistent() {
        let check = check_record(
            r#"{"id":"feature-1","category":"core","description":"d","status":"backlog","priority":2,"passes":true}"#,
        );
        assert_eq!(check.errors, vec!["passes=true but status=backlog"]);
        assert!(check.is_failing());
    }

    #[test]
    fn waiting_approval_with_missing_fields_is_held() {
        let check = check_record(r#"{"status":"waiting_approval","passes":false}"#);
        assert!(check.held);
        assert!(!check.errors.is_empty());
        assert!(!check.is_failing());
    }

    #[test]
    fn invalid_enum_and_priority_are_reported() {
        let check = check_record(
            r#"{"id":"feature-1","category":"core","description":"d","status":"done","priority":9,"passes":true}"#,
        );
        assert!(check.is_failing());
        assert_eq!(check.errors.len(), 2, "{:?}", check.errors);
    }

    #[test]
    fn bad_id_pattern_is_reported() {
        let check = check_record(
            r#"{"id":"task-1","category":"core","description":"d","status":"completed","priority":1,"passes":true}"#,
        );
        assert!(check.errors.iter().any(|e| e.contains("/id")), "{:?}", check.errors);
    }

    #[test]
    fn unparseable_record_is_failing() {
        let check = check_record("{not json");
        assert!(check.is_failing());
        assert!(check.errors[0].starts_with("parse json"));
    }

    #[test]
    fn invariants_report_duplicates_and_dangling_dependencies() {
        let mut a = feature("feature-a", true);
        a.dependencies = vec!["feature-missing".to_string()];
        let b = feature("feature-b", true);
        let b2 = feature("feature-b", false);

        let errors = validate_invariants(&[a, b, b2]);
        assert!(errors.contains(&"duplicate id 'feature-b'".to_string()));
        assert!(errors.contains(&"feature-a: unknown dependency 'feature-missing'".to_string()));
    }

    #[test]
    fn invariants_accept_known_dependencies() {
        let mut a = feature("feature-a", true);
        a.dependencies = vec!["feature-b".to_string()];
        let b = feature("feature-b", true);
        assert!(validate_invariants(&[a, b]).is_empty());
    }
}
