//! Stable exit codes for `looprunner` commands.
//!
//! Callers and CI scripts branch on these values; never renumber them.

/// Command succeeded.
pub const OK: i32 = 0;
/// Unclassified failure.
pub const GENERAL_ERROR: i32 = 1;
/// Invalid arguments or configuration.
pub const INVALID_ARGS: i32 = 2;
/// A required file or directory does not exist.
pub const NOT_FOUND: i32 = 3;
/// Filesystem permission denied.
pub const PERMISSION_DENIED: i32 = 4;
/// The agent exceeded the overall wall-clock timeout.
pub const TIMEOUT: i32 = 5;
/// The loop gave up after too many consecutive failures.
pub const ABORTED: i32 = 6;
/// Feature records failed structural validation.
pub const VALIDATION_ERROR: i32 = 7;
/// The agent adapter could not be launched.
pub const ADAPTER_ERROR: i32 = 8;
/// The agent produced no assistant output.
pub const NO_ASSISTANT: i32 = 70;
/// The agent stayed silent past the idle budget.
pub const IDLE_TIMEOUT: i32 = 71;
/// The model provider reported an error.
pub const PROVIDER_ERROR: i32 = 72;
/// The completion detector confirmed the project is finished.
pub const PROJECT_COMPLETE: i32 = 73;
/// The provider rate limit was hit.
pub const RATE_LIMITED: i32 = 74;
/// Terminated by SIGINT/SIGTERM or the stop file.
pub const SIGNAL_TERMINATED: i32 = 124;

/// Map an I/O error kind to the closest stable exit code.
pub fn for_io_error(err: &std::io::Error) -> i32 {
    match err.kind() {
        std::io::ErrorKind::NotFound => NOT_FOUND,
        std::io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        _ => GENERAL_ERROR,
    }
}
