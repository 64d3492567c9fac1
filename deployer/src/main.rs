//! Example-site deployer.
//!
//! Clones the upstream repository next to the base directory, builds the
//! configured examples, and replaces each destination directory with the
//! example's build output. Running with no arguments uses the built-in
//! target list and the current directory as base.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use deployer::core::types::{DeployReport, TargetStatus};
use deployer::deploy::{plan_for, render_plan, resolve_base_dir, run_deploy};
use deployer::exit_codes;
use deployer::io::config::{CONFIG_FILE_NAME, DeployConfig, load_config, render_config};
use deployer::io::toolchain::ProcessToolchain;
use deployer::logging;

#[derive(Parser, Debug)]
#[command(
    name = "deployer",
    version,
    about = "Build upstream example apps and publish their dist output"
)]
struct Cli {
    /// Directory the destinations (and a relative enlistment) are resolved against.
    #[arg(long, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Config file. Defaults to `deploy.toml` in the base directory.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Publish targets that built even when another target failed.
    #[arg(long)]
    keep_going: bool,

    /// Leave the temporary checkout on disk after the run.
    #[arg(long)]
    keep_enlistment: bool,

    /// Print the resolved steps without running anything.
    #[arg(long, conflicts_with = "print_config")]
    dry_run: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// More log output (`-v` debug, `-vv` trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let base_dir = match &cli.base_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("read current directory")?,
    };
    let base_dir = resolve_base_dir(&base_dir)?;
    let cfg = effective_config(&cli, &base_dir)?;

    if cli.print_config {
        print!("{}", render_config(&cfg)?);
        return Ok(exit_codes::OK);
    }
    if cli.dry_run {
        let plan = plan_for(&base_dir, &cfg)?;
        print!("{}", render_plan(&plan, &cfg));
        return Ok(exit_codes::OK);
    }

    let toolchain = ProcessToolchain::from_config(&cfg);
    let report = run_deploy(&base_dir, &cfg, &toolchain)?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        print_report(&report);
    }
    Ok(exit_codes::for_outcome(report.outcome()))
}

fn effective_config(cli: &Cli, base_dir: &Path) -> Result<DeployConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| base_dir.join(CONFIG_FILE_NAME));
    let mut cfg = load_config(&path)?;
    cfg.keep_going |= cli.keep_going;
    cfg.keep_enlistment |= cli.keep_enlistment;
    Ok(cfg)
}

fn print_report(report: &DeployReport) {
    for target in &report.targets {
        let detail = match &target.status {
            TargetStatus::Published { files, bytes } => {
                format!("published files={files} bytes={bytes}")
            }
            TargetStatus::BuildFailed { error } => format!("build_failed: {error}"),
            TargetStatus::PublishFailed { error } => format!("publish_failed: {error}"),
            TargetStatus::Skipped { reason } => format!("skipped: {reason}"),
        };
        println!(
            "target: example={} destination={} {}",
            target.example,
            target.destination.display(),
            detail
        );
    }
    println!(
        "deploy: outcome={:?} published={}/{} commit={}",
        report.outcome(),
        report.published(),
        report.targets.len(),
        report.commit.as_deref().unwrap_or("unknown")
    );
}
