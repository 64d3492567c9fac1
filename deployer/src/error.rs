//! Typed failures for pipeline steps.
//!
//! Orchestration code propagates these through `anyhow`; callers that need
//! the failing step can `downcast_ref::<StepError>()`.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::Step;

#[derive(Debug, Error)]
pub enum StepError {
    /// Command ran to completion with a non-zero status.
    #[error("{step} failed: `{command}` exited with {status}{}", stderr_suffix(.stderr))]
    ExitStatus {
        step: Step,
        command: String,
        status: String,
        stderr: String,
    },

    /// Command exceeded the configured timeout and was killed.
    #[error("{step} timed out after {timeout_secs}s: `{command}`")]
    TimedOut {
        step: Step,
        command: String,
        timeout_secs: u64,
    },

    /// Command could not be started at all.
    #[error("{step} failed: could not run `{command}`: {message}")]
    Spawn {
        step: Step,
        command: String,
        message: String,
    },

    /// Example directory absent from the enlistment.
    #[error("{step} failed: missing example directory {}", .path.display())]
    MissingExample { step: Step, path: PathBuf },

    /// Build finished but left no output directory behind.
    #[error("{step} failed: build output {} is missing or not a directory", .path.display())]
    MissingOutput { step: Step, path: PathBuf },
}

impl StepError {
    pub fn step(&self) -> Step {
        match self {
            StepError::ExitStatus { step, .. }
            | StepError::TimedOut { step, .. }
            | StepError::Spawn { step, .. }
            | StepError::MissingExample { step, .. }
            | StepError::MissingOutput { step, .. } => *step,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
