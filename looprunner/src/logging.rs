//! Diagnostic tracing for the loop engine.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: operator diagnostics via `RUST_LOG`, output to
//!   stderr. Not persisted.
//!
//! - **Transcripts (`io/transcript`)**: per-iteration product artifacts under
//!   `<metadata>/iterations/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Falls back to `info` when `verbose` is set, `warn`
/// otherwise. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=looprunner=debug looprunner run
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
