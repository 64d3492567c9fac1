//! Orchestration for a single deploy run.
//!
//! A run is strictly sequential: fetch the upstream source into a fresh
//! enlistment, install dependencies, build every target, publish, clean up.
//!
//! - Fetch and install failures abort the run before any destination is touched.
//! - Build failures are recorded per target. Unless `keep_going` is set, the first
//!   build failure stops the build phase and blocks every publish.
//! - Without `keep_going`, every target is staged before any destination is
//!   swapped, and a staging failure publishes nothing.
//! - The enlistment is removed on every path (see [`Enlistment`]).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{error, info, instrument};

use crate::core::plan::{DeployPlan, TargetPlan, normalize_lexically, render_command, resolve_plan};
use crate::core::types::{DeployReport, Step, TargetReport, TargetStatus};
use crate::error::StepError;
use crate::io::config::DeployConfig;
use crate::io::enlistment::Enlistment;
use crate::io::git::Git;
use crate::io::publish::{publish_output, stage_output};
use crate::io::toolchain::Toolchain;

enum BuildState {
    Built,
    Failed(String),
    NotRun,
}

/// Absolute, lexically normalized form of `base_dir`. The directory must exist.
pub fn resolve_base_dir(base_dir: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(base_dir)
        .with_context(|| format!("resolve base directory {}", base_dir.display()))?;
    let absolute = normalize_lexically(&absolute);
    if !absolute.is_dir() {
        bail!("base directory {} does not exist", absolute.display());
    }
    Ok(absolute)
}

/// Resolve and sanity-check every path of a run.
pub fn plan_for(base_dir: &Path, cfg: &DeployConfig) -> Result<DeployPlan> {
    let plan = resolve_plan(
        base_dir,
        &cfg.enlistment_dir,
        &cfg.commands.output_dir,
        &cfg.targets,
    );
    let errors = plan.overlap_errors();
    if !errors.is_empty() {
        return Err(anyhow!("unsafe layout:\n- {}", errors.join("\n- ")));
    }
    Ok(plan)
}

/// Run one deployment rooted at `base_dir`.
///
/// Returns `Err` when the run could not get as far as building (invalid config,
/// clone, checkout or install failure, cleanup failure). Per-target build and
/// publish failures are reported in the returned [`DeployReport`].
#[instrument(skip_all, fields(base = %base_dir.display()))]
pub fn run_deploy<T: Toolchain>(
    base_dir: &Path,
    cfg: &DeployConfig,
    toolchain: &T,
) -> Result<DeployReport> {
    cfg.validate()?;
    let base_dir = resolve_base_dir(base_dir)?;
    let plan = plan_for(&base_dir, cfg)?;
    info!(
        enlistment = %plan.enlistment_dir.display(),
        targets = plan.targets.len(),
        keep_going = cfg.keep_going,
        "starting deploy"
    );

    let enlistment = Enlistment::prepare(&plan.enlistment_dir, cfg.keep_enlistment)?;
    let commit = toolchain
        .fetch_source(&cfg.source, enlistment.path())
        .context("fetch upstream source")?;
    if let Some(sha) = &commit {
        info!(commit = %sha, "upstream fetched");
    }
    toolchain
        .install_dependencies(enlistment.path())
        .context("install dependencies")?;

    let states = build_targets(&plan, toolchain, cfg.keep_going);
    let targets = publish_targets(&plan, states, cfg.keep_going);
    enlistment.close()?;

    let report = DeployReport {
        base_dir: plan.base_dir,
        commit,
        keep_going: cfg.keep_going,
        targets,
    };
    info!(
        outcome = ?report.outcome(),
        published = report.published(),
        total = report.targets.len(),
        "deploy finished"
    );
    Ok(report)
}

fn build_targets<T: Toolchain>(
    plan: &DeployPlan,
    toolchain: &T,
    keep_going: bool,
) -> Vec<BuildState> {
    let mut states = Vec::with_capacity(plan.targets.len());
    let mut aborted = false;
    for target in &plan.targets {
        if aborted {
            states.push(BuildState::NotRun);
            continue;
        }
        match build_target(target, toolchain) {
            Ok(()) => {
                info!(example = %target.example, "build succeeded");
                states.push(BuildState::Built);
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(example = %target.example, err = %message, "build failed");
                states.push(BuildState::Failed(message));
                aborted = !keep_going;
            }
        }
    }
    states
}

fn build_target<T: Toolchain>(target: &TargetPlan, toolchain: &T) -> Result<()> {
    if !target.example_dir.is_dir() {
        return Err(StepError::MissingExample {
            step: Step::Build,
            path: target.example_dir.clone(),
        }
        .into());
    }
    toolchain.build_example(&target.example_dir)?;
    if !target.output_dir.is_dir() {
        return Err(StepError::MissingOutput {
            step: Step::Build,
            path: target.output_dir.clone(),
        }
        .into());
    }
    Ok(())
}

fn publish_targets(
    plan: &DeployPlan,
    states: Vec<BuildState>,
    keep_going: bool,
) -> Vec<TargetReport> {
    let first_failure = plan
        .targets
        .iter()
        .zip(&states)
        .find(|(_, state)| matches!(state, BuildState::Failed(_)))
        .map(|(target, _)| target.example.clone());

    let statuses: Vec<TargetStatus> = match (keep_going, first_failure) {
        (true, _) => plan
            .targets
            .iter()
            .zip(states)
            .map(|(target, state)| match state {
                BuildState::Built => publish_target(target),
                BuildState::Failed(error) => TargetStatus::BuildFailed { error },
                BuildState::NotRun => TargetStatus::Skipped {
                    reason: "not built".to_string(),
                },
            })
            .collect(),
        (false, Some(example)) => states
            .into_iter()
            .map(|state| match state {
                BuildState::Built => TargetStatus::Skipped {
                    reason: format!("not published: build failed for {example}"),
                },
                BuildState::Failed(error) => TargetStatus::BuildFailed { error },
                BuildState::NotRun => TargetStatus::Skipped {
                    reason: format!("not built: build failed for {example}"),
                },
            })
            .collect(),
        (false, None) => publish_all_or_nothing(plan),
    };

    plan.targets
        .iter()
        .zip(statuses)
        .map(|(target, status)| TargetReport {
            example: target.example.clone(),
            destination: target.destination.clone(),
            status,
        })
        .collect()
}

/// Stage every target, then swap them in. Nothing is swapped unless all staged.
fn publish_all_or_nothing(plan: &DeployPlan) -> Vec<TargetStatus> {
    let mut staged = Vec::with_capacity(plan.targets.len());
    for (index, target) in plan.targets.iter().enumerate() {
        match stage_output(&target.output_dir, &target.destination) {
            Ok(output) => staged.push(output),
            Err(err) => {
                let message = format!("{err:#}");
                error!(example = %target.example, err = %message, "staging failed, publishing nothing");
                drop(staged);
                return (0..plan.targets.len())
                    .map(|i| {
                        if i == index {
                            TargetStatus::PublishFailed {
                                error: message.clone(),
                            }
                        } else {
                            TargetStatus::Skipped {
                                reason: format!(
                                    "not published: publish failed for {}",
                                    target.example
                                ),
                            }
                        }
                    })
                    .collect();
            }
        }
    }

    let mut failed: Option<&str> = None;
    let mut statuses = Vec::with_capacity(staged.len());
    for (target, output) in plan.targets.iter().zip(staged) {
        let status = match failed {
            Some(example) => {
                drop(output);
                TargetStatus::Skipped {
                    reason: format!("not published: publish failed for {example}"),
                }
            }
            None => match output.commit() {
                Ok(stats) => TargetStatus::Published {
                    files: stats.files,
                    bytes: stats.bytes,
                },
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(example = %target.example, err = %message, "publish failed");
                    failed = Some(&target.example);
                    TargetStatus::PublishFailed { error: message }
                }
            },
        };
        statuses.push(status);
    }
    statuses
}

fn publish_target(target: &TargetPlan) -> TargetStatus {
    match publish_output(&target.output_dir, &target.destination) {
        Ok(stats) => TargetStatus::Published {
            files: stats.files,
            bytes: stats.bytes,
        },
        Err(err) => {
            let message = format!("{err:#}");
            error!(example = %target.example, err = %message, "publish failed");
            TargetStatus::PublishFailed { error: message }
        }
    }
}

/// Describe what a run would do, one step per line, without doing it.
pub fn render_plan(plan: &DeployPlan, cfg: &DeployConfig) -> String {
    let git = |args: Vec<String>| {
        let mut argv = vec![cfg.commands.git.clone()];
        argv.extend(args);
        render_command(&argv)
    };
    let mut out = String::new();
    let _ = writeln!(out, "base: {}", plan.base_dir.display());
    let _ = writeln!(out, "enlistment: {}", plan.enlistment_dir.display());
    let _ = writeln!(
        out,
        "clone: {}",
        git(Git::clone_args(
            &cfg.source.repo_url,
            &plan.enlistment_dir,
            cfg.source.clone_depth
        ))
    );
    if let Some(revision) = &cfg.source.revision {
        let _ = writeln!(out, "checkout: {}", git(Git::checkout_args(revision)));
    }
    let _ = writeln!(
        out,
        "install: (in {}) {}",
        plan.enlistment_dir.display(),
        render_command(&cfg.commands.install)
    );
    for target in &plan.targets {
        let _ = writeln!(
            out,
            "build {}: (in {}) {}",
            target.example,
            target.example_dir.display(),
            render_command(&cfg.commands.build)
        );
        let _ = writeln!(
            out,
            "publish {}: {} -> {}",
            target.example,
            target.output_dir.display(),
            target.destination.display()
        );
    }
    let cleanup = if cfg.keep_enlistment { "keep" } else { "remove" };
    let _ = writeln!(out, "cleanup: {cleanup} {}", plan.enlistment_dir.display());
    out
}
