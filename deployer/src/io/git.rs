//! Git adapter for fetching the upstream source.
//!
//! Every call runs `git` with an explicit working directory and checks its
//! exit status, so a failed clone can never be mistaken for an empty one.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::Step;
use crate::io::process::{CommandOutput, run_step_command};

/// Wrapper for executing git commands.
#[derive(Debug, Clone)]
pub struct Git {
    program: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(program: impl Into<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            program: program.into(),
            timeout,
            output_limit_bytes,
        }
    }

    /// Clone `url` into `dest`.
    ///
    /// Missing parent directories of `dest` are created, and removed again if
    /// the clone fails.
    #[instrument(skip_all, fields(url, dest = %dest.display()))]
    pub fn clone_into(&self, url: &str, dest: &Path, depth: Option<u32>) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("clone destination has no parent {}", dest.display()))?;
        let created = first_missing_ancestor(parent);
        fs::create_dir_all(parent)
            .with_context(|| format!("create clone parent {}", parent.display()))?;

        let args = Self::clone_args(url, dest, depth);
        info!(url, "cloning upstream repository");
        if let Err(err) = self.run_checked(Step::Clone, parent, &args) {
            if let Some(created) = created
                && let Err(cleanup) = fs::remove_dir_all(&created)
            {
                warn!(path = %created.display(), err = %cleanup, "failed to remove clone parent");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Arguments for `git clone`, also shown by `--dry-run`.
    pub fn clone_args(url: &str, dest: &Path, depth: Option<u32>) -> Vec<String> {
        let mut args = vec!["clone".to_string(), "--quiet".to_string()];
        if let Some(depth) = depth {
            args.push("--depth".to_string());
            args.push(depth.to_string());
        }
        args.push(url.to_string());
        args.push(dest.to_string_lossy().into_owned());
        args
    }

    /// Arguments for checking out a pinned revision.
    pub fn checkout_args(revision: &str) -> Vec<String> {
        vec![
            "checkout".to_string(),
            "--quiet".to_string(),
            "--detach".to_string(),
            revision.to_string(),
        ]
    }

    /// Check out `revision` (detached) inside `workdir`.
    #[instrument(skip_all, fields(revision))]
    pub fn checkout(&self, workdir: &Path, revision: &str) -> Result<()> {
        info!(revision, "checking out pinned revision");
        self.run_checked(Step::Checkout, workdir, &Self::checkout_args(revision))?;
        Ok(())
    }

    /// Full SHA of HEAD in `workdir`.
    pub fn head_sha(&self, workdir: &Path) -> Result<String> {
        let out = self.run_checked(
            Step::Checkout,
            workdir,
            &["rev-parse".to_string(), "HEAD".to_string()],
        )?;
        let sha = out.stdout_lossy().trim().to_string();
        if sha.is_empty() {
            return Err(anyhow!("git rev-parse HEAD printed nothing"));
        }
        debug!(sha = %sha, "resolved HEAD");
        Ok(sha)
    }

    fn run_checked(&self, step: Step, workdir: &Path, args: &[String]) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(workdir);
        run_step_command(step, cmd, self.timeout, self.output_limit_bytes)
    }
}

/// Outermost ancestor of `path` (inclusive) that does not exist yet.
fn first_missing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut missing = None;
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() || ancestor.exists() {
            break;
        }
        missing = Some(ancestor.to_path_buf());
    }
    missing
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::StepError;

    fn git() -> Git {
        Git::new("git", Duration::from_secs(60), 100_000)
    }

    fn init_upstream(dir: &Path) {
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir)
                .status()
                .expect("spawn git");
            assert!(status.success(), "git {:?}", args);
        };
        run(&["init", "--quiet"]);
        run(&["config", "user.name", "Deployer Test"]);
        run(&["config", "user.email", "deployer-test@local.invalid"]);
        fs::write(dir.join("README.md"), "upstream\n").expect("write readme");
        run(&["add", "."]);
        run(&["commit", "--quiet", "-m", "init"]);
    }

    #[test]
    fn clones_local_repository_and_reads_head() {
        let temp = tempfile::tempdir().expect("tempdir");
        let upstream = temp.path().join("upstream");
        fs::create_dir_all(&upstream).expect("mkdir");
        init_upstream(&upstream);

        let dest = temp.path().join("work").join("enlistment");
        let url = upstream.to_string_lossy().into_owned();
        git().clone_into(&url, &dest, None).expect("clone");

        assert!(dest.join("README.md").exists());
        let sha = git().head_sha(&dest).expect("head");
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn clone_args_include_depth() {
        let args = Git::clone_args("https://example.invalid/r", Path::new("/tmp/e"), Some(1));
        assert_eq!(
            args,
            vec![
                "clone",
                "--quiet",
                "--depth",
                "1",
                "https://example.invalid/r",
                "/tmp/e"
            ]
        );
    }

    #[test]
    fn clone_of_missing_repository_is_clone_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("enlistment");
        let missing = temp.path().join("does-not-exist");
        let err = git()
            .clone_into(&missing.to_string_lossy(), &dest, None)
            .expect_err("clone should fail");
        let step_err = err.downcast_ref::<StepError>().expect("step error");
        assert_eq!(step_err.step(), Step::Clone);
    }

    #[test]
    fn failed_clone_removes_created_parents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("nested/deeper/enlistment");
        let missing = temp.path().join("does-not-exist");

        git()
            .clone_into(&missing.to_string_lossy(), &dest, None)
            .expect_err("clone should fail");

        assert!(!temp.path().join("nested").exists());
        assert!(temp.path().exists());
    }

    #[test]
    fn first_missing_ancestor_stops_at_existing_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a/b/c");
        assert_eq!(first_missing_ancestor(&path), Some(temp.path().join("a")));
        assert_eq!(first_missing_ancestor(temp.path()), None);
    }
}
