//! Mode selection for `looprunner select` and each loop iteration.

use std::path::Path;

use anyhow::Result;

use crate::core::filter::FeatureFilter;
use crate::core::mode::{ModeDecision, ModeFlags, select_mode};
use crate::core::types::FeatureRecord;
use crate::io::feature_store::FeatureStore;
use crate::io::project;
use crate::io::prompt::{PreparedPrompt, PromptBuilder};

/// Decision plus the prompt file rendered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub decision: ModeDecision,
    pub prompt: PreparedPrompt,
}

/// Observe the project and pick the next phase. Writes nothing.
pub fn decide(project_dir: &Path, metadata_dir: &Path, flags: &ModeFlags) -> Result<ModeDecision> {
    let snapshot = project::snapshot(project_dir, metadata_dir)?;
    Ok(select_mode(flags, &snapshot))
}

/// Filter instructions for the records currently matching `filter`.
pub fn filter_preamble(metadata_dir: &Path, filter: Option<&FeatureFilter>) -> Result<Option<String>> {
    let Some(filter) = filter else {
        return Ok(None);
    };
    let matched = FeatureStore::new(metadata_dir).matching(filter)?;
    let refs: Vec<&FeatureRecord> = matched.iter().collect();
    Ok(Some(filter.instructions(&refs)))
}

/// Decide the phase and render its prompt file.
pub fn select_next(
    prompts: &PromptBuilder,
    project_dir: &Path,
    metadata_dir: &Path,
    flags: &ModeFlags,
    filter: Option<&FeatureFilter>,
) -> Result<Selection> {
    let decision = decide(project_dir, metadata_dir, flags)?;
    let preamble = filter_preamble(metadata_dir, filter)?;
    let prompt = prompts.prepare(&decision, preamble.as_deref())?;
    Ok(Selection { decision, prompt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Phase;
    use crate::io::markers::MarkerStore;
    use crate::test_support::{feature, write_feature};
    use std::fs;

    #[test]
    fn pending_marker_forces_todo_review() {
        let temp = tempfile::tempdir().expect("tempdir");
        let metadata = temp.path().join(".looprunner");
        write_feature(&metadata, &feature("feature-a", true));
        MarkerStore::new(&metadata).set_pending().expect("mark");

        let decision = decide(temp.path(), &metadata, &ModeFlags::default()).expect("decide");
        assert_eq!(decision, ModeDecision::Standard(Phase::Todo));
    }

    #[test]
    fn filter_prepends_matching_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let metadata = temp.path().join(".looprunner");
        let mut security = feature("feature-login", false);
        security.category = "security".to_string();
        write_feature(&metadata, &security);
        write_feature(&metadata, &feature("feature-other", false));
        let prompts = PromptBuilder::new(&metadata, metadata.join("prompts"));
        let filter = FeatureFilter::parse("category=security").expect("filter");

        let selection = select_next(
            &prompts,
            temp.path(),
            &metadata,
            &ModeFlags::default(),
            Some(&filter),
        )
        .expect("select");
        let text = fs::read_to_string(&selection.prompt.path).expect("read");
        assert!(text.starts_with("## Feature filter"));
        assert!(text.contains("- feature-login: feature-login description"));
        assert!(!text.contains("feature-other"));
    }

    #[test]
    fn no_filter_means_no_preamble() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(filter_preamble(temp.path(), None).expect("preamble"), None);
    }
}
