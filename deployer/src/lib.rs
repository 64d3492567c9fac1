//! Deployment orchestrator for upstream example applications.
//!
//! One run clones an upstream repository into a temporary enlistment,
//! installs its dependencies, builds a fixed list of examples, and publishes
//! each example's build output into a local destination directory.
//!
//! - **[`core`]**: Pure, deterministic logic (target records, path planning,
//!   run reports). No I/O.
//! - **[`io`]**: Side-effecting operations (config file, child processes,
//!   git, the enlistment guard, directory publishing).
//!
//! [`deploy`] coordinates both to implement a single run.

pub mod core;
pub mod deploy;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
