//! `field=value` filter over feature records.
//!
//! The filter narrows what the agent is told to work on; it never changes
//! which phase is selected.

use anyhow::{Result, anyhow};

use crate::core::types::FeatureRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Id,
    Category,
    Status,
    Priority,
    Title,
    AuditSource,
}

impl FilterField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "id" => Some(FilterField::Id),
            "category" => Some(FilterField::Category),
            "status" => Some(FilterField::Status),
            "priority" => Some(FilterField::Priority),
            "title" => Some(FilterField::Title),
            "auditSource" | "audit_source" => Some(FilterField::AuditSource),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FilterField::Id => "id",
            FilterField::Category => "category",
            FilterField::Status => "status",
            FilterField::Priority => "priority",
            FilterField::Title => "title",
            FilterField::AuditSource => "auditSource",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFilter {
    pub field: FilterField,
    pub value: String,
}

impl FeatureFilter {
    /// Parse `field=value` (whitespace around either side is ignored).
    pub fn parse(raw: &str) -> Result<Self> {
        let (field, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("filter must be field=value (got '{raw}')"))?;
        let field = field.trim();
        let value = value.trim();
        let field = FilterField::parse(field).ok_or_else(|| {
            anyhow!("unknown filter field '{field}' (id, category, status, priority, title, auditSource)")
        })?;
        if value.is_empty() {
            return Err(anyhow!("filter value must not be empty"));
        }
        Ok(Self {
            field,
            value: value.to_string(),
        })
    }

    pub fn matches(&self, record: &FeatureRecord) -> bool {
        match self.field {
            FilterField::Id => record.id == self.value,
            FilterField::Category => record.category == self.value,
            FilterField::Status => record.status.as_str() == self.value,
            FilterField::Priority => record.priority.to_string() == self.value,
            FilterField::Title => record.title == self.value,
            FilterField::AuditSource => record.audit_source.as_deref() == Some(self.value.as_str()),
        }
    }

    /// Instruction block prepended to the prompt text.
    pub fn instructions(&self, matched: &[&FeatureRecord]) -> String {
        let mut out = format!(
            "## Feature filter\n\nOnly work on feature records where `{} = {}`.\n",
            self.field.name(),
            self.value
        );
        if matched.is_empty() {
            out.push_str("\nNo feature records currently match this filter.\n");
        } else {
            out.push_str("\nMatching records:\n");
            for record in matched {
                out.push_str(&format!("- {}: {}\n", record.id, record.description));
            }
        }
        out.push_str("\nLeave all other records untouched.\n\n---\n\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::feature;

    #[test]
    fn parse_accepts_known_fields() {
        let filter = FeatureFilter::parse(" category = security ").expect("parse");
        assert_eq!(filter.field, FilterField::Category);
        assert_eq!(filter.value, "security");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(FeatureFilter::parse("category").is_err());
        assert!(FeatureFilter::parse("owner=me").is_err());
        assert!(FeatureFilter::parse("status=").is_err());
    }

    #[test]
    fn matches_priority_and_status() {
        let record = feature("feature-a", false);
        let by_priority = FeatureFilter::parse("priority=2").expect("parse");
        let by_status = FeatureFilter::parse("status=pending").expect("parse");
        assert!(by_priority.matches(&record));
        assert!(by_status.matches(&record));
        assert!(!FeatureFilter::parse("status=completed")
            .expect("parse")
            .matches(&record));
    }

    #[test]
    fn instructions_list_matches() {
        let record = feature("feature-a", false);
        let filter = FeatureFilter::parse("id=feature-a").expect("parse");
        let text = filter.instructions(&[&record]);
        assert!(text.contains("`id = feature-a`"));
        assert!(text.contains("- feature-a: "));
    }
}
