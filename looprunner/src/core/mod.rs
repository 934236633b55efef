//! Deterministic, pure logic shared by the loop engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and caller-supplied clocks and return deterministic outputs suitable
//! for tests.

pub mod classifier;
pub mod feature;
pub mod filter;
pub mod mode;
pub mod rate_limit;
pub mod retry;
pub mod todo;
pub mod types;
