//! Path planning for a deploy run.
//!
//! Every path the pipeline touches is derived here from the base directory,
//! so orchestration never depends on the process working directory.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directory inside the enlistment that holds the example applications.
pub const EXAMPLES_DIR: &str = "examples";

/// One example application and the local directory that receives its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    /// Example name under `<enlistment>/examples/`.
    pub example: String,
    /// Destination directory name under the base directory.
    pub destination: String,
}

impl BuildTarget {
    pub fn new(example: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            example: example.into(),
            destination: destination.into(),
        }
    }
}

/// Absolute paths for a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlan {
    pub example: String,
    pub example_dir: PathBuf,
    pub output_dir: PathBuf,
    pub destination: PathBuf,
}

/// Absolute paths for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPlan {
    pub base_dir: PathBuf,
    pub enlistment_dir: PathBuf,
    pub targets: Vec<TargetPlan>,
}

impl DeployPlan {
    /// Paths that would make enlistment cleanup delete something it must not.
    pub fn overlap_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.base_dir.starts_with(&self.enlistment_dir) {
            errors.push(format!(
                "enlistment {} contains the base directory {}",
                self.enlistment_dir.display(),
                self.base_dir.display()
            ));
        }
        for target in &self.targets {
            if target.destination.starts_with(&self.enlistment_dir)
                || self.enlistment_dir.starts_with(&target.destination)
            {
                errors.push(format!(
                    "enlistment {} overlaps destination {}",
                    self.enlistment_dir.display(),
                    target.destination.display()
                ));
            }
        }
        errors
    }
}

/// Resolve all run paths against an absolute `base_dir`.
///
/// `enlistment_dir` may be relative (resolved against `base_dir`) and may
/// climb out of it (the default is `../jagl_tmp`).
pub fn resolve_plan(
    base_dir: &Path,
    enlistment_dir: &Path,
    output_dir: &str,
    targets: &[BuildTarget],
) -> DeployPlan {
    let base_dir = normalize_lexically(base_dir);
    let enlistment_dir = normalize_lexically(&base_dir.join(enlistment_dir));
    let targets = targets
        .iter()
        .map(|target| {
            let example_dir = enlistment_dir.join(EXAMPLES_DIR).join(&target.example);
            TargetPlan {
                example: target.example.clone(),
                output_dir: example_dir.join(output_dir),
                example_dir,
                destination: base_dir.join(&target.destination),
            }
        })
        .collect();
    DeployPlan {
        base_dir,
        enlistment_dir,
        targets,
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
///
/// `..` at the root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    Some(Component::RootDir | Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True if `path` is non-empty, relative, and made only of normal components.
pub fn is_contained_relative(path: &str) -> bool {
    let path = Path::new(path);
    path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Check the target list. Returns one message per violation.
///
/// - at least one target
/// - examples are contained relative paths
/// - destinations are single path components, unique across targets
pub fn validate_targets(targets: &[BuildTarget]) -> Vec<String> {
    let mut errors = Vec::new();
    if targets.is_empty() {
        errors.push("targets must list at least one example".to_string());
    }
    let mut seen = HashSet::new();
    for (index, target) in targets.iter().enumerate() {
        if !is_contained_relative(&target.example) {
            errors.push(format!(
                "targets[{index}].example '{}' must be a relative path inside the examples directory",
                target.example
            ));
        }
        let single = Path::new(&target.destination).components().count() == 1;
        if !is_contained_relative(&target.destination) || !single {
            errors.push(format!(
                "targets[{index}].destination '{}' must be a single directory name",
                target.destination
            ));
        }
        if !seen.insert(target.destination.as_str()) {
            errors.push(format!(
                "targets[{index}].destination '{}' is used more than once",
                target.destination
            ));
        }
    }
    errors
}

/// Render an argv as a copy-pasteable shell command line.
pub fn render_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_escape(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_escape(input: &str) -> String {
    if !input.is_empty()
        && input
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return input.to_string();
    }
    let mut escaped = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}
