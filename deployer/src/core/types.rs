//! Shared types for deploy runs.
//!
//! Reports are serialized as JSON by `deployer --json`, so field names and
//! enum tags are part of the CLI contract.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A pipeline step, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Clone,
    Checkout,
    Install,
    Build,
    Publish,
    Cleanup,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Clone => "clone",
            Step::Checkout => "checkout",
            Step::Install => "install",
            Step::Build => "build",
            Step::Publish => "publish",
            Step::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// What happened to one build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    /// Destination replaced with the build output.
    Published { files: u64, bytes: u64 },
    /// Build did not produce an output directory. Destination untouched.
    BuildFailed { error: String },
    /// Output was built but copying it into place failed.
    PublishFailed { error: String },
    /// Not built or not published because of another target's failure.
    Skipped { reason: String },
}

impl TargetStatus {
    pub fn is_published(&self) -> bool {
        matches!(self, TargetStatus::Published { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub example: String,
    pub destination: PathBuf,
    #[serde(flatten)]
    pub status: TargetStatus,
}

/// Overall classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployOutcome {
    Success,
    Partial,
    Failed,
}

/// Result of a run that got past clone and install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub base_dir: PathBuf,
    /// Upstream HEAD after checkout, if it could be resolved.
    pub commit: Option<String>,
    /// Whether targets were allowed to publish independently of each other.
    pub keep_going: bool,
    pub targets: Vec<TargetReport>,
}

impl DeployReport {
    pub fn published(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.status.is_published())
            .count()
    }

    /// `Partial` only exists for keep-going runs. Without it, anything short of
    /// every target published is a failure.
    pub fn outcome(&self) -> DeployOutcome {
        let published = self.published();
        if published == self.targets.len() && published > 0 {
            DeployOutcome::Success
        } else if published > 0 && self.keep_going {
            DeployOutcome::Partial
        } else {
            DeployOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(statuses: Vec<TargetStatus>) -> DeployReport {
        DeployReport {
            base_dir: PathBuf::from("/srv/site"),
            commit: None,
            keep_going: true,
            targets: statuses
                .into_iter()
                .enumerate()
                .map(|(i, status)| TargetReport {
                    example: format!("example{i}"),
                    destination: PathBuf::from(format!("/srv/site/target{i}")),
                    status,
                })
                .collect(),
        }
    }

    fn published() -> TargetStatus {
        TargetStatus::Published { files: 1, bytes: 4 }
    }

    #[test]
    fn outcome_success_when_all_published() {
        let r = report(vec![published(), published()]);
        assert_eq!(r.outcome(), DeployOutcome::Success);
    }

    #[test]
    fn outcome_partial_when_some_published() {
        let r = report(vec![
            published(),
            TargetStatus::BuildFailed {
                error: "boom".to_string(),
            },
        ]);
        assert_eq!(r.outcome(), DeployOutcome::Partial);
    }

    #[test]
    fn outcome_failed_when_some_published_without_keep_going() {
        let mut r = report(vec![
            published(),
            TargetStatus::PublishFailed {
                error: "rename failed".to_string(),
            },
        ]);
        r.keep_going = false;
        assert_eq!(r.outcome(), DeployOutcome::Failed);
    }

    #[test]
    fn outcome_failed_without_targets() {
        assert_eq!(report(Vec::new()).outcome(), DeployOutcome::Failed);
    }

    #[test]
    fn outcome_failed_when_nothing_published() {
        let r = report(vec![
            TargetStatus::Skipped {
                reason: "x".to_string(),
            },
            TargetStatus::BuildFailed {
                error: "boom".to_string(),
            },
        ]);
        assert_eq!(r.outcome(), DeployOutcome::Failed);
    }

    #[test]
    fn target_report_serializes_flat_status_tag() {
        let r = report(vec![published()]);
        let json = serde_json::to_value(&r.targets[0]).expect("serialize");
        assert_eq!(json["status"], "published");
        assert_eq!(json["files"], 1);
        assert_eq!(json["example"], "example0");
    }

    #[test]
    fn step_display_is_lowercase() {
        assert_eq!(Step::Install.to_string(), "install");
        assert_eq!(Step::Clone.to_string(), "clone");
    }
}
