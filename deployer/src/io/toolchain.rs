//! Toolchain abstraction for fetching, installing and building.
//!
//! The [`Toolchain`] trait decouples orchestration from the concrete
//! commands. [`ProcessToolchain`] spawns the configured `git`, install and
//! build commands; tests substitute scripted toolchains.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::types::Step;
use crate::io::config::{DeployConfig, SourceConfig};
use crate::io::git::Git;
use crate::io::process::run_step_command;

pub trait Toolchain {
    /// Clone the upstream source into `dest` (which does not exist yet) and
    /// check out the pinned revision. Returns HEAD when it can be resolved.
    fn fetch_source(&self, source: &SourceConfig, dest: &Path) -> Result<Option<String>>;

    /// Resolve dependencies with `enlistment` as working directory.
    fn install_dependencies(&self, enlistment: &Path) -> Result<()>;

    /// Build one example with `example_dir` as working directory.
    fn build_example(&self, example_dir: &Path) -> Result<()>;
}

/// Toolchain that spawns the commands from [`DeployConfig::commands`].
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
    git: Git,
    install: Vec<String>,
    build: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ProcessToolchain {
    pub fn from_config(cfg: &DeployConfig) -> Self {
        let timeout = cfg.command_timeout();
        Self {
            git: Git::new(&cfg.commands.git, timeout, cfg.output_limit_bytes),
            install: cfg.commands.install.clone(),
            build: cfg.commands.build.clone(),
            timeout,
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn run(&self, step: Step, argv: &[String], workdir: &Path) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("{step} command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);
        run_step_command(step, cmd, self.timeout, self.output_limit_bytes)?;
        Ok(())
    }
}

impl Toolchain for ProcessToolchain {
    fn fetch_source(&self, source: &SourceConfig, dest: &Path) -> Result<Option<String>> {
        self.git.clone_into(&source.repo_url, dest, source.clone_depth)?;
        if let Some(revision) = &source.revision {
            self.git.checkout(dest, revision)?;
        }
        match self.git.head_sha(dest) {
            Ok(sha) => Ok(Some(sha)),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not resolve upstream HEAD");
                Ok(None)
            }
        }
    }

    #[instrument(skip_all, fields(workdir = %enlistment.display()))]
    fn install_dependencies(&self, enlistment: &Path) -> Result<()> {
        info!("installing dependencies");
        self.run(Step::Install, &self.install, enlistment)
    }

    #[instrument(skip_all, fields(workdir = %example_dir.display()))]
    fn build_example(&self, example_dir: &Path) -> Result<()> {
        info!("building example");
        self.run(Step::Build, &self.build, example_dir)
    }
}
