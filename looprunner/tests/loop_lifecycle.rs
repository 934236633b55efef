//! Loop-level tests for full project lifecycles.
//!
//! Scripted agents mutate the metadata directory the way a real agent
//! would, driving the loop from an empty project to confirmed completion.

use std::fs;
use std::path::PathBuf;

use looprunner::DEFAULT_METADATA_DIR;
use looprunner::core::mode::ModeFlags;
use looprunner::core::types::{IterationStatus, Phase};
use looprunner::exit_codes;
use looprunner::io::agent::AgentRequest;
use looprunner::io::config::LoopConfig;
use looprunner::io::shutdown::Shutdown;
use looprunner::io::transcript::IterationRecord;
use looprunner::looping::{LoopOptions, LoopStop, run_loop};
use looprunner::test_support::{ScriptedAdapter, ScriptedRun, feature, write_feature};

fn metadata_of(request: &AgentRequest) -> PathBuf {
    request.workdir.join(DEFAULT_METADATA_DIR)
}

fn quick_config() -> LoopConfig {
    LoopConfig {
        rate_limit_buffer_secs: 0,
        rate_limit_fallback_secs: 0,
        ..LoopConfig::default()
    }
}

/// Empty project to confirmed completion.
///
/// 1. Initializer: agent writes spec, changelog, one failing record.
/// 2. Coding: agent flips the record to passing; detector goes pending.
/// 3. Todo: forced review; detector confirms.
#[test]
fn empty_project_runs_to_confirmed_completion() {
    let temp = tempfile::tempdir().expect("tempdir");
    let options = LoopOptions {
        project_dir: temp.path().to_path_buf(),
        metadata_dir: temp.path().join(DEFAULT_METADATA_DIR),
        flags: ModeFlags::default(),
        filter: None,
    };

    let adapter = ScriptedAdapter::new(vec![
        ScriptedRun::exit(0, &["planning"]).with_effect(|request| {
            let metadata = metadata_of(request);
            fs::write(metadata.join("spec.md"), "# Todo app\n").expect("spec");
            fs::write(metadata.join("CHANGELOG.md"), "- initial plan\n").expect("changelog");
            write_feature(&metadata, &feature("feature-list", false));
        }),
        ScriptedRun::exit(0, &["implementing"]).with_effect(|request| {
            write_feature(&metadata_of(request), &feature("feature-list", true));
        }),
        ScriptedRun::exit(0, &["nothing left"]),
    ]);
    let shutdown = Shutdown::new(options.metadata_dir.join("STOP"));

    let mut records: Vec<IterationRecord> = Vec::new();
    let outcome = run_loop(&adapter, &quick_config(), &options, &shutdown, |record| {
        records.push(record.clone());
    })
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Complete);
    assert_eq!(outcome.exit_code(), exit_codes::PROJECT_COMPLETE);
    let phases: Vec<Phase> = records.iter().map(|record| record.phase).collect();
    assert_eq!(phases, vec![Phase::Initializer, Phase::Coding, Phase::Todo]);
    assert!(records.iter().all(|record| record.status == IterationStatus::Success));
    assert_eq!(adapter.remaining(), 0);
    assert!(!options.metadata_dir.join(".completion_pending").exists());

    let sidecar = fs::read_to_string(options.metadata_dir.join("iterations/003.json")).expect("read");
    assert!(sidecar.contains("\"phase\": \"todo\""));
}

#[test]
fn regression_during_confirmation_restarts_the_gate() {
    let temp = tempfile::tempdir().expect("tempdir");
    let metadata = temp.path().join(DEFAULT_METADATA_DIR);
    fs::create_dir_all(&metadata).expect("mkdir");
    fs::write(metadata.join("spec.md"), "# App\n").expect("spec");
    fs::write(metadata.join("CHANGELOG.md"), "- init\n").expect("changelog");
    write_feature(&metadata, &feature("feature-a", true));
    let options = LoopOptions {
        project_dir: temp.path().to_path_buf(),
        metadata_dir: metadata.clone(),
        flags: ModeFlags::default(),
        filter: None,
    };

    let adapter = ScriptedAdapter::new(vec![
        ScriptedRun::exit(0, &[]),
        // The review finds a gap and adds a TODO.
        ScriptedRun::exit(0, &[]).with_effect(|request| {
            fs::write(metadata_of(request).join("todo.md"), "- [ ] handle empty input\n")
                .expect("todo");
        }),
        ScriptedRun::exit(0, &[]).with_effect(|request| {
            fs::write(metadata_of(request).join("todo.md"), "- [x] handle empty input\n")
                .expect("todo");
        }),
        ScriptedRun::exit(0, &[]),
    ]);
    let shutdown = Shutdown::new(metadata.join("STOP"));

    let mut phases = Vec::new();
    let outcome = run_loop(&adapter, &quick_config(), &options, &shutdown, |record| {
        phases.push(record.phase);
    })
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Complete);
    assert_eq!(
        phases,
        vec![Phase::Coding, Phase::Todo, Phase::Coding, Phase::Todo]
    );
}

#[test]
fn threshold_of_one_aborts_on_first_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let options = LoopOptions {
        project_dir: temp.path().to_path_buf(),
        metadata_dir: temp.path().join(DEFAULT_METADATA_DIR),
        flags: ModeFlags::default(),
        filter: None,
    };
    write_feature(&options.metadata_dir, &feature("feature-a", false));
    let adapter = ScriptedAdapter::new(vec![ScriptedRun::exit(0, &["No messages returned"])]);
    let config = LoopConfig {
        quit_on_abort_threshold: 1,
        ..quick_config()
    };
    let shutdown = Shutdown::new(options.metadata_dir.join("STOP"));

    let outcome = run_loop(&adapter, &config, &options, &shutdown, |_| {}).expect("loop");
    assert_eq!(outcome.exit_code(), exit_codes::NO_ASSISTANT);
    assert_eq!(outcome.iterations, 1);
}
