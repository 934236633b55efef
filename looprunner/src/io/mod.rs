//! Side-effecting adapters: filesystem, git, child processes, signals.

pub mod agent;
pub mod completion;
pub mod config;
pub mod feature_store;
pub mod git;
pub mod markers;
pub mod project;
pub mod prompt;
pub mod shutdown;
pub mod supervisor;
pub mod transcript;
