//! Stable exit codes for the deployer CLI.

use crate::core::types::DeployOutcome;

/// Every target was published.
pub const OK: i32 = 0;
/// Invalid config, a failed clone/install, or no target published.
pub const FAILED: i32 = 1;
/// `--keep-going` run where only some targets were published.
pub const PARTIAL: i32 = 2;

pub fn for_outcome(outcome: DeployOutcome) -> i32 {
    match outcome {
        DeployOutcome::Success => OK,
        DeployOutcome::Partial => PARTIAL,
        DeployOutcome::Failed => FAILED,
    }
}
