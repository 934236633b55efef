//! Completion detector caching inside a real git repository.
//!
//! Unchanged records reuse the per-detector cache; uncommitted edits and
//! commits made between checks are revalidated.

use std::fs;

use looprunner::io::completion::{CompletionDetector, CompletionState};
use looprunner::test_support::{TestRepo, feature, write_feature};

#[test]
fn unchanged_records_are_served_from_cache() {
    let repo = TestRepo::new().expect("repo");
    let metadata = repo.metadata_dir();
    write_feature(&metadata, &feature("feature-a", true));
    write_feature(&metadata, &feature("feature-b", true));
    repo.commit_all("chore: add features").expect("commit");

    let mut detector = CompletionDetector::new(&metadata, repo.path());
    let first = detector.check().expect("check");
    assert_eq!(first.revalidated, 2);
    assert_eq!(first.state, CompletionState::Pending);

    let second = detector.check().expect("check");
    assert_eq!(second.revalidated, 0);
    assert_eq!(second.state, CompletionState::Confirmed);
}

#[test]
fn uncommitted_edit_is_revalidated() {
    let repo = TestRepo::new().expect("repo");
    let metadata = repo.metadata_dir();
    write_feature(&metadata, &feature("feature-a", true));
    write_feature(&metadata, &feature("feature-b", true));
    repo.commit_all("chore: add features").expect("commit");

    let mut detector = CompletionDetector::new(&metadata, repo.path());
    detector.check().expect("check");

    write_feature(&metadata, &feature("feature-b", false));
    let report = detector.check().expect("check");
    assert_eq!(report.revalidated, 1);
    assert_eq!(report.failing, vec!["feature-b"]);
    assert_eq!(report.state, CompletionState::NotComplete);
}

#[test]
fn committed_edit_between_checks_is_revalidated() {
    let repo = TestRepo::new().expect("repo");
    let metadata = repo.metadata_dir();
    write_feature(&metadata, &feature("feature-a", true));
    write_feature(&metadata, &feature("feature-b", false));
    repo.commit_all("chore: add features").expect("commit");

    let mut detector = CompletionDetector::new(&metadata, repo.path());
    assert_eq!(detector.check().expect("check").failing, vec!["feature-b"]);

    write_feature(&metadata, &feature("feature-b", true));
    repo.commit_all("feat: finish b").expect("commit");

    let report = detector.check().expect("check");
    assert_eq!(report.revalidated, 1);
    assert!(report.failing.is_empty());
    assert_eq!(report.state, CompletionState::Pending);

    assert_eq!(detector.check().expect("check").revalidated, 0);
}

#[test]
fn deleted_record_leaves_the_report() {
    let repo = TestRepo::new().expect("repo");
    let metadata = repo.metadata_dir();
    write_feature(&metadata, &feature("feature-a", true));
    write_feature(&metadata, &feature("feature-b", false));
    repo.commit_all("chore: add features").expect("commit");

    let mut detector = CompletionDetector::new(&metadata, repo.path());
    assert_eq!(detector.check().expect("check").failing, vec!["feature-b"]);

    fs::remove_dir_all(metadata.join("features/feature-b")).expect("remove");
    let report = detector.check().expect("check");
    assert!(report.failing.is_empty());
    assert_eq!(report.state, CompletionState::Pending);
}

#[test]
fn ignored_metadata_dir_revalidates_every_check() {
    let repo = TestRepo::new().expect("repo");
    fs::write(repo.path().join(".gitignore"), ".looprunner/\n").expect("gitignore");
    repo.commit_all("chore: ignore metadata").expect("commit");
    let metadata = repo.metadata_dir();
    write_feature(&metadata, &feature("feature-a", true));

    let mut detector = CompletionDetector::new(&metadata, repo.path());
    assert_eq!(detector.check().expect("check").state, CompletionState::Pending);

    write_feature(&metadata, &feature("feature-a", false));
    let report = detector.check().expect("check");
    assert_eq!(report.revalidated, 1);
    assert_eq!(report.failing, vec!["feature-a"]);
    assert_eq!(report.state, CompletionState::NotComplete);
}
