//! I/O adapters for deploy runs.

pub mod config;
pub mod enlistment;
pub mod git;
pub mod process;
pub mod publish;
pub mod toolchain;
