//! Supervision of one agent process.
//!
//! Output from every stream is merged into one line channel. Each wait on
//! that channel is bounded by the current silence deadline:
//!
//! - `Running`: the nudge fires after `idle_nudge_timeout` of silence.
//! - `Nudged`: the agent is killed once total silence reaches `idle_timeout`.
//!
//! Any line returns the state to `Running`. The overall `timeout` and the
//! shutdown flag cap every wait. Only launch failures escape as errors;
//! everything else becomes a typed [`Supervision`].

use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{Classifier, Signal};
use crate::core::types::IterationStatus;
use crate::exit_codes;
use crate::io::agent::{AgentAdapter, AgentProcess, AgentRequest};
use crate::io::shutdown::Shutdown;
use crate::io::transcript::Transcript;

/// Upper bound on a single channel wait so shutdown is noticed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How long to wait for a killed agent to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub idle_timeout: Duration,
    pub idle_nudge_timeout: Duration,
    pub timeout: Option<Duration>,
    pub nudge_message: String,
}

/// Result of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supervision {
    pub status: IterationStatus,
    /// Child exit code for `Success`/`GenericFailure`, otherwise the status code.
    pub exit_code: i32,
    pub rate_limit_message: Option<String>,
    pub nudges: u32,
    pub lines: usize,
    /// Set when the run was cut short by the shutdown flag.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Running,
    Nudged,
    Done,
}

enum StreamEvent {
    Line(String),
    Closed,
}

fn spawn_stream_reader(reader: Box<dyn Read + Send>, tx: mpsc::Sender<StreamEvent>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => {
                    let _ = tx.send(StreamEvent::Closed);
                    break;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(StreamEvent::Line(line)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Launch the agent and supervise it to completion.
#[instrument(skip_all, fields(adapter = adapter.name(), prompt = %request.prompt_path.display()))]
pub fn supervise(
    adapter: &dyn AgentAdapter,
    request: &AgentRequest,
    settings: &SupervisorSettings,
    classifier: &Classifier,
    transcript: &mut Transcript,
    shutdown: &Shutdown,
) -> Result<Supervision> {
    let mut process = adapter.start(request)?;
    info!("agent started");
    Ok(Run::new(process.as_mut(), settings, classifier, transcript, shutdown).drive())
}

struct Run<'a> {
    process: &'a mut dyn AgentProcess,
    settings: &'a SupervisorSettings,
    classifier: &'a Classifier,
    transcript: &'a mut Transcript,
    shutdown: &'a Shutdown,
    state: SupervisorState,
    nudges: u32,
    lines: usize,
}

/// Terminal decision taken while the agent was still running.
struct Verdict {
    status: IterationStatus,
    exit_code: i32,
    rate_limit_message: Option<String>,
    interrupted: bool,
}

impl Verdict {
    fn fixed(status: IterationStatus) -> Self {
        Self {
            status,
            exit_code: status.fixed_exit_code().unwrap_or(exit_codes::GENERAL_ERROR),
            rate_limit_message: None,
            interrupted: false,
        }
    }
}

impl<'a> Run<'a> {
    fn new(
        process: &'a mut dyn AgentProcess,
        settings: &'a SupervisorSettings,
        classifier: &'a Classifier,
        transcript: &'a mut Transcript,
        shutdown: &'a Shutdown,
    ) -> Self {
        Self {
            process,
            settings,
            classifier,
            transcript,
            shutdown,
            state: SupervisorState::Running,
            nudges: 0,
            lines: 0,
        }
    }

    fn drive(mut self) -> Supervision {
        let (tx, rx) = mpsc::channel();
        let streams = self.process.take_output_streams();
        let mut open_streams = streams.len();
        for stream in streams {
            spawn_stream_reader(stream, tx.clone());
        }
        drop(tx);

        let started = Instant::now();
        let overall_deadline = self.settings.timeout.map(|timeout| started + timeout);
        let mut last_output = started;
        let mut exited: Option<i32> = None;

        let verdict = loop {
            if self.shutdown.is_requested() {
                self.transcript.note("shutdown requested; terminating agent");
                break Some(Verdict {
                    status: IterationStatus::GenericFailure,
                    exit_code: exit_codes::SIGNAL_TERMINATED,
                    rate_limit_message: None,
                    interrupted: true,
                });
            }
            let now = Instant::now();
            if overall_deadline.is_some_and(|deadline| now >= deadline) {
                self.transcript.note("overall timeout reached; terminating agent");
                break Some(Verdict::fixed(IterationStatus::Timeout));
            }

            let silence_deadline = match self.state {
                SupervisorState::Running => last_output + self.settings.idle_nudge_timeout,
                SupervisorState::Nudged => last_output + self.settings.idle_timeout,
                SupervisorState::Done => break None,
            };
            if now >= silence_deadline {
                match self.state {
                    SupervisorState::Running => {
                        self.nudge();
                        continue;
                    }
                    _ => {
                        self.transcript.note("idle timeout reached; terminating agent");
                        break Some(Verdict::fixed(IterationStatus::IdleTimeout));
                    }
                }
            }

            let mut wait_until = silence_deadline.min(now + POLL_INTERVAL);
            if let Some(deadline) = overall_deadline {
                wait_until = wait_until.min(deadline);
            }
            let wait = wait_until.saturating_duration_since(now);

            if open_streams == 0 {
                // Output is closed; the agent should be exiting.
                match self.process.wait(Some(wait)) {
                    Ok(Some(code)) => {
                        exited = Some(code);
                        self.state = SupervisorState::Done;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(err = %err, "wait for agent failed");
                        break Some(Verdict::fixed(IterationStatus::GenericFailure));
                    }
                }
                continue;
            }

            match rx.recv_timeout(wait) {
                Ok(StreamEvent::Line(line)) => {
                    last_output = Instant::now();
                    self.state = SupervisorState::Running;
                    if let Some(verdict) = self.on_line(&line) {
                        break Some(verdict);
                    }
                }
                Ok(StreamEvent::Closed) => {
                    open_streams = open_streams.saturating_sub(1);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    open_streams = 0;
                }
            }
        };

        match verdict {
            Some(verdict) => {
                self.terminate();
                self.state = SupervisorState::Done;
                debug!(status = %verdict.status, "agent terminated");
                Supervision {
                    status: verdict.status,
                    exit_code: verdict.exit_code,
                    rate_limit_message: verdict.rate_limit_message,
                    nudges: self.nudges,
                    lines: self.lines,
                    interrupted: verdict.interrupted,
                }
            }
            None => {
                let code = exited.unwrap_or(exit_codes::GENERAL_ERROR);
                let status = if code == 0 {
                    IterationStatus::Success
                } else {
                    IterationStatus::GenericFailure
                };
                info!(exit_code = code, %status, "agent exited");
                Supervision {
                    status,
                    exit_code: code,
                    rate_limit_message: None,
                    nudges: self.nudges,
                    lines: self.lines,
                    interrupted: false,
                }
            }
        }
    }

    fn on_line(&mut self, line: &str) -> Option<Verdict> {
        self.transcript.write_line(line);
        self.lines += 1;
        match self.classifier.classify(line)? {
            Signal::NoAssistant => {
                warn!("agent returned no assistant messages");
                Some(Verdict::fixed(IterationStatus::NoAssistant))
            }
            Signal::ProviderError => {
                warn!("provider error reported");
                Some(Verdict::fixed(IterationStatus::ProviderError))
            }
            Signal::RateLimit(message) => {
                warn!(%message, "rate limit reported");
                Some(Verdict {
                    rate_limit_message: Some(message),
                    ..Verdict::fixed(IterationStatus::RateLimited)
                })
            }
        }
    }

    fn nudge(&mut self) {
        self.nudges += 1;
        self.state = SupervisorState::Nudged;
        self.transcript.note("agent idle; sending nudge");
        info!(nudges = self.nudges, "agent idle; nudging");
        if let Err(err) = self.process.send_input(&self.settings.nudge_message) {
            warn!(err = %err, "nudge could not be delivered");
            self.transcript.note(&format!("nudge not delivered: {err:#}"));
        }
    }

    fn terminate(&mut self) {
        if let Err(err) = self.process.terminate() {
            warn!(err = %err, "terminate agent failed");
        }
        match self.process.wait(Some(REAP_TIMEOUT)) {
            Ok(Some(_)) => {}
            Ok(None) => warn!("agent did not exit after termination"),
            Err(err) => warn!(err = %err, "reap agent failed"),
        }
    }
}
