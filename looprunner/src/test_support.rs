//! Test-only helpers: feature record builders, scripted agents, and a
//! git-backed scratch repository.

use std::collections::VecDeque;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{FeatureRecord, FeatureStatus};
use crate::io::agent::{AgentAdapter, AgentProcess, AgentRequest, LaunchError};
use crate::io::feature_store::{FEATURE_FILE, FEATURES_DIR};

/// Deterministic record: `completed` when passing, `pending` otherwise.
pub fn feature(id: &str, passes: bool) -> FeatureRecord {
    FeatureRecord {
        id: id.to_string(),
        category: "core".to_string(),
        description: format!("{id} description"),
        title: format!("{id} title"),
        status: if passes {
            FeatureStatus::Completed
        } else {
            FeatureStatus::Pending
        },
        priority: 2,
        passes,
        dependencies: Vec::new(),
        audit_source: None,
        audit_severity: None,
        affected_files: Vec::new(),
        created_at: None,
        updated_at: None,
    }
}

/// Write `record` to `<metadata>/features/<id>/feature.json`.
pub fn write_feature(metadata_dir: &Path, record: &FeatureRecord) {
    let raw = serde_json::to_string_pretty(record).expect("serialize feature");
    write_raw_feature(metadata_dir, &record.id, &raw);
}

/// Write arbitrary text as a record file under `features/<dir_name>/`.
pub fn write_raw_feature(metadata_dir: &Path, dir_name: &str, raw: &str) {
    let dir = metadata_dir.join(FEATURES_DIR).join(dir_name);
    fs::create_dir_all(&dir).expect("create feature dir");
    fs::write(dir.join(FEATURE_FILE), raw).expect("write feature");
}

type Effect = Box<dyn Fn(&AgentRequest) + Send>;

/// One scripted agent run: emitted lines, then an exit code.
pub struct ScriptedRun {
    pub lines: Vec<String>,
    pub exit_code: i32,
    effect: Option<Effect>,
}

impl ScriptedRun {
    pub fn exit(exit_code: i32, lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(ToString::to_string).collect(),
            exit_code,
            effect: None,
        }
    }

    /// Run `effect` when the agent starts (e.g. write feature records).
    pub fn with_effect(mut self, effect: impl Fn(&AgentRequest) + Send + 'static) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }
}

/// Adapter that replays queued [`ScriptedRun`]s without spawning processes.
#[derive(Default)]
pub struct ScriptedAdapter {
    runs: Mutex<VecDeque<ScriptedRun>>,
    prompts: Mutex<Vec<String>>,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAdapter {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            ..Self::default()
        }
    }

    /// Prompt text seen by each start, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    /// Everything written to the agents' stdin (nudges).
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().expect("inputs lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.runs.lock().expect("runs lock").len()
    }
}

impl AgentAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn start(&self, request: &AgentRequest) -> Result<Box<dyn AgentProcess>> {
        let run = self
            .runs
            .lock()
            .map_err(|_| anyhow!("runs lock poisoned"))?
            .pop_front()
            .ok_or_else(|| LaunchError {
                adapter: "scripted".to_string(),
                reason: "no scripted runs left".to_string(),
            })?;
        let prompt = fs::read_to_string(&request.prompt_path).unwrap_or_default();
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompts lock poisoned"))?
            .push(prompt);
        if let Some(effect) = &run.effect {
            effect(request);
        }
        let mut output = run.lines.join("\n");
        if !output.is_empty() {
            output.push('\n');
        }
        Ok(Box::new(ScriptedProcess {
            output: Some(output.into_bytes()),
            exit_code: run.exit_code,
            inputs: self.inputs.clone(),
        }))
    }
}

struct ScriptedProcess {
    output: Option<Vec<u8>>,
    exit_code: i32,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl AgentProcess for ScriptedProcess {
    fn take_output_streams(&mut self) -> Vec<Box<dyn Read + Send>> {
        self.output
            .take()
            .map(|bytes| vec![Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>])
            .unwrap_or_default()
    }

    fn send_input(&mut self, text: &str) -> Result<()> {
        self.inputs
            .lock()
            .map_err(|_| anyhow!("inputs lock poisoned"))?
            .push(text.to_string());
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }

    fn wait(&mut self, _timeout: Option<Duration>) -> Result<Option<i32>> {
        Ok(Some(self.exit_code))
    }
}

/// Temporary git repository with one initial commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "test"])?;
        fs::write(repo.path().join("README.md"), "hi\n").context("write README")?;
        repo.commit_all("chore: init")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Conventional metadata directory inside the repo.
    pub fn metadata_dir(&self) -> PathBuf {
        self.path().join(".looprunner")
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "--allow-empty", "-m", message])
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .status()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !status.success() {
            return Err(anyhow!("git {} failed", args.join(" ")));
        }
        Ok(())
    }
}
