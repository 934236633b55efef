//! The outer iteration loop for `looprunner run`.
//!
//! Each iteration: check for shutdown, pick a phase, render its prompt, run
//! the agent under supervision, apply the retry policy, then ask the
//! completion detector whether to stop. This is the only place that turns
//! iteration outcomes into process exit codes.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Local, SecondsFormat};
use tracing::{info, info_span, warn};

use crate::core::classifier::Classifier;
use crate::core::filter::FeatureFilter;
use crate::core::mode::ModeFlags;
use crate::core::rate_limit::schedule_retry;
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::types::{IterationOutcome, IterationStatus};
use crate::exit_codes;
use crate::io::agent::{AgentAdapter, AgentRequest, LaunchError};
use crate::io::completion::{CompletionDetector, CompletionReport, CompletionState};
use crate::io::config::LoopConfig;
use crate::io::markers::MarkerStore;
use crate::io::prompt::PromptBuilder;
use crate::io::shutdown::Shutdown;
use crate::io::supervisor::{SupervisorSettings, supervise};
use crate::io::transcript::{self, IterationPaths, IterationRecord, Transcript};
use crate::select::{Selection, select_next};

const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Caller-supplied inputs for one loop invocation.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub project_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub flags: ModeFlags,
    pub filter: Option<FeatureFilter>,
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The completion detector confirmed the project is finished.
    Complete,
    /// `max_iterations` reached. Carries the last iteration's exit code.
    MaxIterations { last_exit_code: i32 },
    /// The retry policy gave up.
    Aborted {
        status: IterationStatus,
        exit_code: i32,
    },
    /// Signal or stop file.
    Shutdown,
    /// The agent could not be launched.
    LaunchFailed { reason: String },
}

impl LoopStop {
    pub fn exit_code(&self) -> i32 {
        match self {
            LoopStop::Complete => exit_codes::PROJECT_COMPLETE,
            LoopStop::MaxIterations { last_exit_code } => *last_exit_code,
            LoopStop::Aborted { exit_code, .. } => *exit_code,
            LoopStop::Shutdown => exit_codes::SIGNAL_TERMINATED,
            LoopStop::LaunchFailed { .. } => exit_codes::ADAPTER_ERROR,
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Iterations that ran to a recorded outcome (rate-limited attempts excluded).
    pub iterations: u32,
    pub rate_limit_waits: u32,
    pub last_report: Option<CompletionReport>,
    pub stop: LoopStop,
}

impl LoopOutcome {
    pub fn exit_code(&self) -> i32 {
        self.stop.exit_code()
    }
}

struct LoopState {
    iterations: u32,
    rate_limit_waits: u32,
    last_report: Option<CompletionReport>,
}

impl LoopState {
    fn finish(self, stop: LoopStop) -> LoopOutcome {
        info!(?stop, iterations = self.iterations, "loop stopped");
        LoopOutcome {
            iterations: self.iterations,
            rate_limit_waits: self.rate_limit_waits,
            last_report: self.last_report,
            stop,
        }
    }
}

/// Run iterations until completion, abort, shutdown, or the iteration limit.
///
/// Errors are fatal I/O problems (metadata directory, prompt rendering,
/// artifact writes); every agent-side failure is reported through
/// [`LoopStop`].
pub fn run_loop<F: FnMut(&IterationRecord)>(
    adapter: &dyn AgentAdapter,
    config: &LoopConfig,
    options: &LoopOptions,
    shutdown: &Shutdown,
    mut on_iteration: F,
) -> Result<LoopOutcome> {
    let metadata_dir = &options.metadata_dir;
    fs::create_dir_all(metadata_dir)
        .with_context(|| format!("create metadata directory {}", metadata_dir.display()))?;

    let markers = MarkerStore::new(metadata_dir);
    let prompts = PromptBuilder::new(metadata_dir, config.prompts_dir(metadata_dir));
    let classifier = Classifier::new(config.classifier.clone());
    let mut detector = CompletionDetector::new(metadata_dir, &options.project_dir);
    let mut retry = RetryPolicy::new(config.quit_on_abort_threshold, config.continue_on_timeout);
    let settings = SupervisorSettings {
        idle_timeout: config.idle_timeout(),
        idle_nudge_timeout: config.idle_nudge_timeout(),
        timeout: config.timeout(),
        nudge_message: config.nudge_message.clone(),
    };

    let mut flags = options.flags.clone();
    let mut index = transcript::next_index(metadata_dir)?;
    let mut last_exit_code = exit_codes::OK;
    let mut state = LoopState {
        iterations: 0,
        rate_limit_waits: 0,
        last_report: None,
    };

    loop {
        if shutdown.is_requested() {
            markers.clear_stop()?;
            return Ok(state.finish(LoopStop::Shutdown));
        }
        if config.max_iterations > 0 && state.iterations >= config.max_iterations {
            return Ok(state.finish(LoopStop::MaxIterations { last_exit_code }));
        }

        let paths = IterationPaths::new(metadata_dir, index);
        let mut transcript = Transcript::create(&paths.log_path)?;
        let Selection { prompt, .. } = match select_next(
            &prompts,
            &options.project_dir,
            metadata_dir,
            &flags,
            options.filter.as_ref(),
        ) {
            Ok(selection) => selection,
            Err(err) => {
                transcript.note(&format!("prompt preparation failed: {err:#}"));
                return Err(err);
            }
        };

        let span = info_span!("iteration", index, phase = %prompt.phase);
        let _enter = span.enter();

        transcript.note(&format!(
            "iteration {index} phase={} prompt={}",
            prompt.phase,
            prompt.path.display()
        ));
        info!(prompt = %prompt.path.display(), "iteration started");

        let request = AgentRequest {
            workdir: options.project_dir.clone(),
            prompt_path: prompt.path.clone(),
            model_args: config.agent.model_args.clone(),
        };
        let started_at = Local::now();
        let clock = Instant::now();
        let supervision = match supervise(
            adapter,
            &request,
            &settings,
            &classifier,
            &mut transcript,
            shutdown,
        ) {
            Ok(supervision) => supervision,
            Err(err) => {
                transcript.note(&format!("launch failed: {err:#}"));
                if let Some(launch) = err.downcast_ref::<LaunchError>() {
                    return Ok(state.finish(LoopStop::LaunchFailed {
                        reason: launch.to_string(),
                    }));
                }
                return Err(err);
            }
        };
        let ended_at = Local::now();

        if supervision.status == IterationStatus::RateLimited {
            let message = supervision.rate_limit_message.clone().unwrap_or_default();
            let wait = schedule_retry(
                &message,
                Local::now(),
                config.rate_limit_buffer(),
                config.rate_limit_fallback(),
            );
            warn!(wait_secs = wait.as_secs(), %message, "rate limited; retrying same iteration");
            drop(transcript);
            transcript::discard(&paths)?;
            state.rate_limit_waits += 1;
            if !sleep_unless_shutdown(wait, shutdown) {
                markers.clear_stop()?;
                return Ok(state.finish(LoopStop::Shutdown));
            }
            continue;
        }

        let mut outcome = IterationOutcome::new(supervision.status, Some(supervision.exit_code));
        if supervision.interrupted {
            outcome.exit_code = exit_codes::SIGNAL_TERMINATED;
        }
        let retry_decision = if supervision.interrupted {
            RetryDecision::Continue
        } else {
            retry.record(&mut outcome)
        };

        let report = if supervision.interrupted {
            None
        } else {
            let report = detector.check()?;
            transcript.note(&format!(
                "completion: {:?} failing={} blocking_todos={} unfixed_audit_findings={}",
                report.state,
                report.failing.len(),
                report.has_blocking_todos,
                report.unfixed_audit_findings
            ));
            Some(report)
        };
        transcript.note(&format!(
            "outcome: {} exit_code={} consecutive_failures={}",
            outcome.status, outcome.exit_code, outcome.consecutive_failures
        ));
        drop(transcript);

        let record = IterationRecord {
            iteration: index,
            phase: prompt.phase,
            prompt_path: prompt.path.display().to_string(),
            status: outcome.status,
            exit_code: outcome.exit_code,
            consecutive_failures: outcome.consecutive_failures,
            nudges: supervision.nudges,
            lines: supervision.lines,
            rate_limit_message: None,
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, false),
            ended_at: ended_at.to_rfc3339_opts(SecondsFormat::Secs, false),
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        transcript::write_record(&paths, &record)?;
        on_iteration(&record);

        state.iterations += 1;
        index += 1;
        last_exit_code = if outcome.is_success() {
            exit_codes::OK
        } else {
            outcome.exit_code
        };
        // Directives and audits are one-shot.
        flags.directive = None;
        flags.audit = None;

        if supervision.interrupted {
            markers.clear_stop()?;
            return Ok(state.finish(LoopStop::Shutdown));
        }
        if let RetryDecision::Abort(exit_code) = retry_decision {
            return Ok(state.finish(LoopStop::Aborted {
                status: outcome.status,
                exit_code,
            }));
        }
        let confirmed = report
            .as_ref()
            .is_some_and(|report| report.state == CompletionState::Confirmed);
        state.last_report = report;
        if confirmed {
            return Ok(state.finish(LoopStop::Complete));
        }
    }
}

/// Sleep in short slices. Returns `false` if shutdown was requested.
fn sleep_unless_shutdown(total: Duration, shutdown: &Shutdown) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.is_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
