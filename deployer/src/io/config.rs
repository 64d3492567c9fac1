//! Deploy configuration, optionally stored in `deploy.toml` next to the targets.
//!
//! Every field has a default, so running with no file reproduces the stock
//! deployment: clone msagljs, build the deck.gl and SVG renderer examples.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::plan::{BuildTarget, is_contained_relative, validate_targets};

/// Config file name looked up in the base directory.
pub const CONFIG_FILE_NAME: &str = "deploy.toml";

/// Deployer configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeployConfig {
    /// Temporary checkout location, relative to the base directory.
    pub enlistment_dir: PathBuf,

    /// Wall-clock limit for each external command.
    pub command_timeout_secs: u64,

    /// Captured stdout/stderr per command is truncated beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Publish the targets that built even if others failed.
    pub keep_going: bool,

    /// Leave the enlistment on disk after the run.
    pub keep_enlistment: bool,

    pub source: SourceConfig,

    pub commands: CommandsConfig,

    pub targets: Vec<BuildTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    pub repo_url: String,

    /// Commit, tag or branch to check out after cloning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Shallow clone depth. Full history when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandsConfig {
    /// Git executable.
    pub git: String,

    /// Dependency install command, run in the enlistment root.
    pub install: Vec<String>,

    /// Build command, run in each example directory.
    pub build: Vec<String>,

    /// Build output directory, relative to the example directory.
    pub output_dir: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/microsoft/msagljs".to_string(),
            revision: None,
            clone_depth: None,
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            install: vec!["yarn".to_string()],
            build: vec!["npm".to_string(), "run".to_string(), "build".to_string()],
            output_dir: "dist".to_string(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            enlistment_dir: PathBuf::from("../jagl_tmp"),
            command_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            keep_going: false,
            keep_enlistment: false,
            source: SourceConfig::default(),
            commands: CommandsConfig::default(),
            targets: vec![
                BuildTarget::new("renderWithDeckGL", "deck.gl_backend"),
                BuildTarget::new("renderWithSVG", "svg_backend"),
            ],
        }
    }
}

impl DeployConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.command_timeout_secs == 0 {
            errors.push("command_timeout_secs must be > 0".to_string());
        }
        if self.output_limit_bytes == 0 {
            errors.push("output_limit_bytes must be > 0".to_string());
        }
        if self.enlistment_dir.as_os_str().is_empty() {
            errors.push("enlistment_dir must not be empty".to_string());
        }
        if self.source.repo_url.trim().is_empty() {
            errors.push("source.repo_url must not be empty".to_string());
        }
        if self.source.clone_depth == Some(0) {
            errors.push("source.clone_depth must be > 0 when set".to_string());
        }
        if let Some(revision) = &self.source.revision
            && revision.trim().is_empty()
        {
            errors.push("source.revision must not be empty when set".to_string());
        }
        if self.commands.git.trim().is_empty() {
            errors.push("commands.git must not be empty".to_string());
        }
        if !is_runnable(&self.commands.install) {
            errors.push("commands.install must be a non-empty array".to_string());
        }
        if !is_runnable(&self.commands.build) {
            errors.push("commands.build must be a non-empty array".to_string());
        }
        if !is_contained_relative(&self.commands.output_dir) {
            errors.push(format!(
                "commands.output_dir '{}' must be a relative path inside the example",
                self.commands.output_dir
            ));
        }
        errors.extend(validate_targets(&self.targets));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid config:\n- {}", errors.join("\n- ")))
        }
    }
}

fn is_runnable(argv: &[String]) -> bool {
    argv.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DeployConfig::default()`.
pub fn load_config(path: &Path) -> Result<DeployConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = DeployConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DeployConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    debug!(path = %path.display(), targets = cfg.targets.len(), "config loaded");
    Ok(cfg)
}

/// Serialize config as pretty TOML with a trailing newline.
pub fn render_config(cfg: &DeployConfig) -> Result<String> {
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DeployConfig::default());
    }

    #[test]
    fn defaults_match_stock_deployment() {
        let cfg = DeployConfig::default();
        assert_eq!(cfg.source.repo_url, "https://github.com/microsoft/msagljs");
        assert_eq!(cfg.enlistment_dir, PathBuf::from("../jagl_tmp"));
        assert_eq!(cfg.commands.install, vec!["yarn"]);
        assert_eq!(cfg.commands.build, vec!["npm", "run", "build"]);
        assert_eq!(
            cfg.targets,
            vec![
                BuildTarget::new("renderWithDeckGL", "deck.gl_backend"),
                BuildTarget::new("renderWithSVG", "svg_backend"),
            ]
        );
    }

    #[test]
    fn render_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        let mut cfg = DeployConfig::default();
        cfg.source.revision = Some("v1.1.0".to_string());
        cfg.source.clone_depth = Some(1);
        fs::write(&path, render_config(&cfg).expect("render")).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "keep_going = true\n\n[commands]\ninstall = [\"npm\", \"ci\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(cfg.keep_going);
        assert_eq!(cfg.commands.install, vec!["npm", "ci"]);
        assert_eq!(cfg.commands.build, vec!["npm", "run", "build"]);
        assert_eq!(cfg.targets.len(), 2);
    }

    #[test]
    fn custom_targets_replace_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[[targets]]\nexample = \"react\"\ndestination = \"react_app\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.targets, vec![BuildTarget::new("react", "react_app")]);
    }

    #[test]
    fn validate_collects_all_errors() {
        let mut cfg = DeployConfig::default();
        cfg.command_timeout_secs = 0;
        cfg.commands.build = Vec::new();
        cfg.commands.output_dir = "../dist".to_string();
        cfg.targets.clear();
        let err = cfg.validate().expect_err("invalid");
        let message = err.to_string();
        assert!(message.contains("command_timeout_secs"), "{message}");
        assert!(message.contains("commands.build"), "{message}");
        assert!(message.contains("commands.output_dir"), "{message}");
        assert!(message.contains("at least one example"), "{message}");
    }

    #[test]
    fn invalid_file_reports_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "command_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains(CONFIG_FILE_NAME));
    }
}
