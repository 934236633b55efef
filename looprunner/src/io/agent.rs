//! Agent adapters.
//!
//! An [`AgentAdapter`] knows how to launch one agent CLI; the returned
//! [`AgentProcess`] is what the supervisor drives. Tests use scripted
//! adapters that never spawn a process.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};
use wait_timeout::ChildExt;

use crate::exit_codes;

/// Environment variable carrying the prompt path to every adapter.
pub const PROMPT_FILE_ENV: &str = "LOOPRUNNER_PROMPT_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Claude,
    Codex,
    /// Arbitrary program from `agent.command`.
    Command,
}

impl AdapterKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "claude" => Ok(AdapterKind::Claude),
            "codex" => Ok(AdapterKind::Codex),
            "command" => Ok(AdapterKind::Command),
            other => Err(anyhow!("unknown adapter '{other}' (claude, codex, command)")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AdapterKind::Claude => "claude",
            AdapterKind::Codex => "codex",
            AdapterKind::Command => "command",
        }
    }
}

/// Parameters for one agent launch.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workdir: PathBuf,
    pub prompt_path: PathBuf,
    pub model_args: Vec<String>,
}

/// The agent could not be started. Never retried.
#[derive(Debug)]
pub struct LaunchError {
    pub adapter: String,
    pub reason: String,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "launch {} agent: {}", self.adapter, self.reason)
    }
}

impl std::error::Error for LaunchError {}

/// A running agent.
pub trait AgentProcess: Send {
    /// Hand over the output streams. Subsequent calls return nothing.
    fn take_output_streams(&mut self) -> Vec<Box<dyn Read + Send>>;
    /// Write text to the agent's stdin.
    fn send_input(&mut self, text: &str) -> Result<()>;
    /// Kill the agent. Safe to call after it exited.
    fn terminate(&mut self) -> Result<()>;
    /// Wait up to `timeout` (forever when `None`). `Ok(None)` means still running.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<i32>>;
}

/// Launches one kind of agent.
pub trait AgentAdapter {
    fn name(&self) -> &str;
    /// Errors from here are [`LaunchError`]s.
    fn start(&self, request: &AgentRequest) -> Result<Box<dyn AgentProcess>>;
}

/// Build the adapter for `kind`.
pub fn create_adapter(kind: AdapterKind, command: &[String]) -> Box<dyn AgentAdapter> {
    match kind {
        AdapterKind::Claude => Box::new(ClaudeAdapter),
        AdapterKind::Codex => Box::new(CodexAdapter),
        AdapterKind::Command => Box::new(CommandAdapter::new(command.to_vec())),
    }
}

/// Program and arguments; the prompt itself always goes to stdin, which
/// stays open for nudges.
#[derive(Debug, Clone)]
struct LaunchSpec {
    program: String,
    args: Vec<String>,
}

/// `claude -p` in non-interactive mode, prompt read from stdin.
pub struct ClaudeAdapter;

impl ClaudeAdapter {
    fn launch_spec(model_args: &[String]) -> LaunchSpec {
        let mut args = vec![
            "--dangerously-skip-permissions".to_string(),
            "--verbose".to_string(),
        ];
        args.extend(model_args.iter().cloned());
        args.push("-p".to_string());
        LaunchSpec {
            program: "claude".to_string(),
            args,
        }
    }
}

impl AgentAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    fn start(&self, request: &AgentRequest) -> Result<Box<dyn AgentProcess>> {
        spawn_agent(self.name(), &Self::launch_spec(&request.model_args), request)
    }
}

/// `codex exec` with full workspace access; `-` reads the prompt from stdin.
pub struct CodexAdapter;

impl CodexAdapter {
    fn launch_spec(model_args: &[String]) -> LaunchSpec {
        let mut args = vec![
            "exec".to_string(),
            "--sandbox".to_string(),
            "danger-full-access".to_string(),
            "--skip-git-repo-check".to_string(),
        ];
        args.extend(model_args.iter().cloned());
        args.push("-".to_string());
        LaunchSpec {
            program: "codex".to_string(),
            args,
        }
    }
}

impl AgentAdapter for CodexAdapter {
    fn name(&self) -> &str {
        "codex"
    }

    fn start(&self, request: &AgentRequest) -> Result<Box<dyn AgentProcess>> {
        spawn_agent(self.name(), &Self::launch_spec(&request.model_args), request)
    }
}

/// Any program; the prompt arrives on stdin and in `LOOPRUNNER_PROMPT_FILE`.
pub struct CommandAdapter {
    command: Vec<String>,
}

impl CommandAdapter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl AgentAdapter for CommandAdapter {
    fn name(&self) -> &str {
        "command"
    }

    fn start(&self, request: &AgentRequest) -> Result<Box<dyn AgentProcess>> {
        let Some((program, rest)) = self.command.split_first() else {
            return Err(LaunchError {
                adapter: self.name().to_string(),
                reason: "agent.command is empty".to_string(),
            }
            .into());
        };
        let mut args = rest.to_vec();
        args.extend(request.model_args.iter().cloned());
        let spec = LaunchSpec {
            program: program.clone(),
            args,
        };
        spawn_agent(self.name(), &spec, request)
    }
}

#[instrument(skip_all, fields(adapter = %adapter, program = %spec.program))]
fn spawn_agent(
    adapter: &str,
    spec: &LaunchSpec,
    request: &AgentRequest,
) -> Result<Box<dyn AgentProcess>> {
    let launch_error = |reason: String| LaunchError {
        adapter: adapter.to_string(),
        reason,
    };
    let prompt = fs::read_to_string(&request.prompt_path).map_err(|err| {
        launch_error(format!("read prompt {}: {err}", request.prompt_path.display()))
    })?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&request.workdir)
        .env(PROMPT_FILE_ENV, &request.prompt_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group so termination reaches everything the agent spawned.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning agent");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn agent");
        launch_error(format!("spawn {}: {err}", spec.program))
    })?;

    let stdin = match child.stdin.take() {
        Some(stdin) => {
            // Written on a thread so a large prompt cannot block on a full pipe.
            StdinState::Writing(thread::spawn(move || -> io::Result<ChildStdin> {
                let mut stdin = stdin;
                stdin.write_all(prompt.as_bytes())?;
                stdin.write_all(b"\n")?;
                stdin.flush()?;
                Ok(stdin)
            }))
        }
        None => StdinState::Closed,
    };

    Ok(Box::new(ChildProcess { child, stdin }))
}

enum StdinState {
    Writing(JoinHandle<io::Result<ChildStdin>>),
    Ready(ChildStdin),
    Closed,
}

/// An agent backed by a spawned OS process.
struct ChildProcess {
    child: Child,
    stdin: StdinState,
}

impl ChildProcess {
    /// Stdin once the prompt is fully written. Never waits on the writer:
    /// an agent that has not drained its prompt cannot take input yet.
    fn stdin(&mut self) -> Result<&mut ChildStdin> {
        if matches!(&self.stdin, StdinState::Writing(handle) if handle.is_finished())
            && let StdinState::Writing(handle) =
                std::mem::replace(&mut self.stdin, StdinState::Closed)
        {
            let stdin = handle
                .join()
                .map_err(|_| anyhow!("prompt writer thread panicked"))?
                .map_err(|err| anyhow!("write prompt: {err}"))?;
            self.stdin = StdinState::Ready(stdin);
        }
        match &mut self.stdin {
            StdinState::Ready(stdin) => Ok(stdin),
            StdinState::Writing(_) => Err(anyhow!("agent has not read its prompt yet")),
            StdinState::Closed => Err(anyhow!("agent stdin is closed")),
        }
    }
}

impl AgentProcess for ChildProcess {
    fn take_output_streams(&mut self) -> Vec<Box<dyn Read + Send>> {
        let mut streams: Vec<Box<dyn Read + Send>> = Vec::new();
        if let Some(stdout) = self.child.stdout.take() {
            streams.push(Box::new(stdout));
        }
        if let Some(stderr) = self.child.stderr.take() {
            streams.push(Box::new(stderr));
        }
        streams
    }

    fn send_input(&mut self, text: &str) -> Result<()> {
        let stdin = self.stdin()?;
        stdin.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            stdin.write_all(b"\n")?;
        }
        stdin.flush()?;
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        self.stdin = StdinState::Closed;
        #[cfg(unix)]
        kill_process_group(self.child.id());
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already reaped.
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(anyhow!("kill agent: {err}")),
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        let status = match timeout {
            Some(timeout) => self.child.wait_timeout(timeout)?,
            None => Some(self.child.wait()?),
        };
        Ok(status.map(exit_code))
    }
}

/// SIGKILL the agent's process group. The leader is not reaped yet, so the
/// group id cannot have been recycled.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(error = %err, "process group already gone");
    }
}

/// Exit code of a finished process; signals map to `128 + signal` on unix.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    exit_codes::GENERAL_ERROR
}
