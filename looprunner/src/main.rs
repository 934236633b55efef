//! `looprunner`: drive a coding agent in supervised iterations.
//!
//! Project state lives under `<project>/.looprunner/` (feature records,
//! TODO list, config, transcripts). Every command exits with a stable code
//! from [`looprunner::exit_codes`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use looprunner::core::filter::FeatureFilter;
use looprunner::core::mode::ModeFlags;
use looprunner::exit_codes;
use looprunner::io::agent::{AdapterKind, LaunchError, create_adapter};
use looprunner::io::config::{ConfigError, LoopConfig, load_effective};
use looprunner::io::markers::MarkerStore;
use looprunner::io::prompt::PromptBuilder;
use looprunner::io::shutdown::Shutdown;
use looprunner::looping::{LoopOptions, LoopStop, run_loop};
use looprunner::status::{StatusOutcome, completion_status};
use looprunner::{DEFAULT_METADATA_DIR, logging, select, validate};

#[derive(Parser)]
#[command(
    name = "looprunner",
    version,
    about = "Drive a coding agent in supervised iterations until the project is done"
)]
struct Cli {
    /// Log at info level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Project directory the agent works in.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,
    /// Metadata directory. Defaults to `<project>/.looprunner`.
    #[arg(long, global = true)]
    metadata: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run iterations until completion, abort, shutdown, or the iteration limit.
    Run(RunArgs),
    /// Report completion status (read-only unless `--advance`).
    Check {
        /// Run one detector pass, advancing the pending marker.
        #[arg(long)]
        advance: bool,
    },
    /// Print the next phase and render its prompt file.
    Select(ModeArgs),
    /// Check config and feature records; exit 7 on record problems.
    Validate,
}

#[derive(Args, Debug)]
struct ModeArgs {
    /// One-off instruction run as the first iteration.
    #[arg(long, conflicts_with = "audit")]
    directive: Option<String>,
    /// Audit template name under `<prompts>/audits/`.
    #[arg(long)]
    audit: Option<String>,
    #[arg(long)]
    todo: bool,
    #[arg(long)]
    validate: bool,
    #[arg(long)]
    in_progress: bool,
    /// Restrict work to records where `field=value`.
    #[arg(long, value_parser = FeatureFilter::parse)]
    filter: Option<FeatureFilter>,
}

impl ModeArgs {
    fn flags(&self) -> ModeFlags {
        ModeFlags {
            directive: self.directive.clone(),
            audit: self.audit.clone(),
            todo: self.todo,
            validate: self.validate,
            in_progress: self.in_progress,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    mode: ModeArgs,
    /// Stop after this many iterations (0 = unbounded).
    #[arg(long)]
    max_iterations: Option<u32>,
    #[arg(long, value_parser = AdapterKind::parse)]
    adapter: Option<AdapterKind>,
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,
    #[arg(long, value_name = "SECS")]
    idle_nudge_timeout: Option<u64>,
    /// Overall per-iteration bound (0 disables it).
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    #[arg(long)]
    quit_on_abort_threshold: Option<u32>,
    #[arg(long)]
    continue_on_timeout: bool,
    /// Extra arguments passed to the agent, after `--`.
    #[arg(last = true)]
    model_args: Vec<String>,
}

impl RunArgs {
    fn apply(&self, config: &mut LoopConfig) {
        if let Some(value) = self.max_iterations {
            config.max_iterations = value;
        }
        if let Some(adapter) = self.adapter {
            config.agent.adapter = adapter;
        }
        if let Some(value) = self.idle_timeout {
            config.idle_timeout_secs = value;
        }
        if let Some(value) = self.idle_nudge_timeout {
            config.idle_nudge_timeout_secs = value;
        }
        if let Some(value) = self.timeout {
            config.timeout_secs = value;
        }
        if let Some(value) = self.quit_on_abort_threshold {
            config.quit_on_abort_threshold = value;
        }
        if self.continue_on_timeout {
            config.continue_on_timeout = true;
        }
        if !self.model_args.is_empty() {
            config.agent.model_args = self.model_args.clone();
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let project = fs::canonicalize(&cli.project)
        .with_context(|| format!("project directory {}", cli.project.display()))?;
    let metadata = cli
        .metadata
        .clone()
        .unwrap_or_else(|| project.join(DEFAULT_METADATA_DIR));
    match cli.command {
        Command::Run(args) => cmd_run(&project, &metadata, &args),
        Command::Check { advance } => cmd_check(&project, &metadata, advance),
        Command::Select(args) => cmd_select(&project, &metadata, &args),
        Command::Validate => cmd_validate(&metadata),
    }
}

fn cmd_run(project: &Path, metadata: &Path, args: &RunArgs) -> Result<i32> {
    let mut config = load_effective(metadata).map_err(ConfigError::wrap)?;
    args.apply(&mut config);
    config.validate().map_err(ConfigError::wrap)?;

    let shutdown = Shutdown::install(MarkerStore::new(metadata).stop_path())?;
    let adapter = create_adapter(config.agent.adapter, &config.agent.command);
    let options = LoopOptions {
        project_dir: project.to_path_buf(),
        metadata_dir: metadata.to_path_buf(),
        flags: args.mode.flags(),
        filter: args.mode.filter.clone(),
    };
    info!(adapter = adapter.name(), project = %project.display(), "starting loop");

    let outcome = run_loop(adapter.as_ref(), &config, &options, &shutdown, |record| {
        println!(
            "iteration {:03} {} {} exit={}",
            record.iteration, record.phase, record.status, record.exit_code
        );
    })?;

    match &outcome.stop {
        LoopStop::Complete => println!("project complete after {} iterations", outcome.iterations),
        LoopStop::MaxIterations { .. } => println!("iteration limit reached"),
        LoopStop::Aborted { status, exit_code } => {
            eprintln!("aborted after repeated failures: {status} (exit {exit_code})");
        }
        LoopStop::Shutdown => eprintln!("stopped by request"),
        LoopStop::LaunchFailed { reason } => eprintln!("{reason}"),
    }
    Ok(outcome.exit_code())
}

fn cmd_check(project: &Path, metadata: &Path, advance: bool) -> Result<i32> {
    let outcome = completion_status(project, metadata, advance)?;
    match &outcome {
        StatusOutcome::Observed { evaluation, pending } => {
            print_failing(&evaluation.failing);
            println!("blocking todos: {}", evaluation.has_blocking_todos);
            println!("unfixed audit findings: {}", evaluation.unfixed_audit_findings);
            println!("held for approval: {}", evaluation.held);
            println!("pending marker: {pending}");
        }
        StatusOutcome::Advanced(report) => {
            print_failing(&report.failing);
            println!("blocking todos: {}", report.has_blocking_todos);
            println!("unfixed audit findings: {}", report.unfixed_audit_findings);
            println!("state: {:?}", report.state);
        }
    }
    Ok(outcome.exit_code())
}

fn print_failing(failing: &[String]) {
    if failing.is_empty() {
        println!("failing records: none");
    } else {
        println!("failing records: {}", failing.join(", "));
    }
}

fn cmd_select(project: &Path, metadata: &Path, args: &ModeArgs) -> Result<i32> {
    let config = load_effective(metadata).map_err(ConfigError::wrap)?;
    let prompts = PromptBuilder::new(metadata, config.prompts_dir(metadata));
    let selection = select::select_next(
        &prompts,
        project,
        metadata,
        &args.flags(),
        args.filter.as_ref(),
    )?;
    println!("{}\t{}", selection.prompt.phase, selection.prompt.path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(metadata: &Path) -> Result<i32> {
    let outcome = validate::validate_metadata(metadata)?;
    for problem in &outcome.report.problems {
        println!("{}: {}", problem.path.display(), problem.message);
    }
    if outcome.report.is_ok() {
        println!("ok: {} records checked", outcome.report.checked);
    }
    Ok(outcome.exit_code())
}

/// Closest stable exit code for a fatal error.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.is::<ConfigError>() {
            return exit_codes::INVALID_ARGS;
        }
        if cause.is::<LaunchError>() {
            return exit_codes::ADAPTER_ERROR;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return exit_codes::for_io_error(io);
        }
    }
    exit_codes::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides_and_model_args() {
        let cli = Cli::parse_from([
            "looprunner",
            "run",
            "--max-iterations",
            "3",
            "--adapter",
            "codex",
            "--filter",
            "category=security",
            "--",
            "--model",
            "o3",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = LoopConfig::default();
        args.apply(&mut config);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.agent.adapter, AdapterKind::Codex);
        assert_eq!(config.agent.model_args, vec!["--model", "o3"]);
        assert_eq!(args.mode.filter.expect("filter").value, "security");
    }

    #[test]
    fn parse_rejects_directive_with_audit() {
        let parsed = Cli::try_parse_from([
            "looprunner",
            "select",
            "--directive",
            "x",
            "--audit",
            "security",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parse_global_metadata_after_subcommand() {
        let cli = Cli::parse_from(["looprunner", "check", "--advance", "--metadata", "/tmp/meta"]);
        assert_eq!(cli.metadata, Some(PathBuf::from("/tmp/meta")));
        assert!(matches!(cli.command, Command::Check { advance: true }));
    }

    #[test]
    fn config_errors_map_to_invalid_args() {
        let err = anyhow::Error::new(ConfigError {
            reason: "bad".to_string(),
        })
        .context("load");
        assert_eq!(exit_code_for(&err), exit_codes::INVALID_ARGS);

        let missing = anyhow::Error::new(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(exit_code_for(&missing), exit_codes::NOT_FOUND);
    }
}
