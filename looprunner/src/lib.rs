//! Supervised iteration loop for an external coding agent.
//!
//! Each iteration picks a phase, renders its prompt, runs the agent under a
//! two-stage idle timeout, classifies the outcome, and asks a two-phase
//! completion detector whether the project is finished. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, retry policy,
//!   reset-time parsing, mode selection, record checks). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, git, agent processes,
//!   supervision, transcripts).
//!
//! Orchestration modules ([`looping`], [`select`], [`status`], [`validate`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod select;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;

/// Metadata directory name used when `--metadata` is not given.
pub const DEFAULT_METADATA_DIR: &str = ".looprunner";
