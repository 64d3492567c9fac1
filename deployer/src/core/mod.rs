//! Deterministic, pure logic shared by the deploy pipeline.
//!
//! Core modules must be free of I/O side effects. Path planning here is
//! lexical only and never consults the filesystem.

pub mod plan;
pub mod types;
