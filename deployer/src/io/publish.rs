//! Replacing a destination directory with fresh build output.
//!
//! Publishing is split in two so a run can stage every target before touching
//! any of them. [`stage_output`] copies the new tree into a hidden staging
//! sibling. [`StagedOutput::commit`] moves the previous destination aside,
//! renames the staging directory into place, and restores the previous
//! destination if that rename fails. A staged output that is dropped without
//! being committed removes its staging directory.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::types::Step;
use crate::error::StepError;
use crate::io::enlistment::remove_path_if_exists;

/// What a publish copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub files: u64,
    pub bytes: u64,
}

/// Build output copied next to its destination, ready to be swapped in.
#[derive(Debug)]
pub struct StagedOutput {
    destination: PathBuf,
    staging: PathBuf,
    previous: PathBuf,
    stats: PublishStats,
    committed: bool,
}

/// Replace `destination` with a recursive copy of `output_dir`.
///
/// Leaves `destination` untouched unless `output_dir` is an existing directory
/// and the staged copy completed.
pub fn publish_output(output_dir: &Path, destination: &Path) -> Result<PublishStats> {
    stage_output(output_dir, destination)?.commit()
}

/// Copy `output_dir` into the staging sibling of `destination`.
///
/// `destination` itself is not modified, except that a destination left at its
/// `previous` sibling by an interrupted run is moved back first.
#[instrument(skip_all, fields(output = %output_dir.display(), destination = %destination.display()))]
pub fn stage_output(output_dir: &Path, destination: &Path) -> Result<StagedOutput> {
    if !output_dir.is_dir() {
        return Err(StepError::MissingOutput {
            step: Step::Publish,
            path: output_dir.to_path_buf(),
        }
        .into());
    }

    let staging = sibling(destination, "staging")?;
    let previous = sibling(destination, "previous")?;
    recover_previous(destination, &previous)?;
    remove_path_if_exists(&staging)?;

    let mut staged = StagedOutput {
        destination: destination.to_path_buf(),
        staging,
        previous,
        stats: PublishStats::default(),
        committed: false,
    };
    staged.stats = copy_tree(output_dir, &staged.staging)?;
    debug!(
        files = staged.stats.files,
        bytes = staged.stats.bytes,
        "staged build output"
    );
    Ok(staged)
}

impl StagedOutput {
    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    /// Swap the staged tree into the destination.
    #[instrument(skip_all, fields(destination = %self.destination.display()))]
    pub fn commit(mut self) -> Result<PublishStats> {
        let destination = self.destination.clone();
        let had_previous = fs::symlink_metadata(&destination).is_ok();
        if had_previous {
            fs::rename(&destination, &self.previous)
                .with_context(|| format!("move aside {}", destination.display()))?;
        }
        if let Err(err) = fs::rename(&self.staging, &destination) {
            if had_previous && let Err(restore) = fs::rename(&self.previous, &destination) {
                error!(
                    previous = %self.previous.display(),
                    err = %restore,
                    "failed to restore previous destination"
                );
            }
            return Err(err)
                .with_context(|| format!("move staging into {}", destination.display()));
        }
        self.committed = true;
        if had_previous && let Err(err) = remove_path_if_exists(&self.previous) {
            warn!(
                previous = %self.previous.display(),
                err = %format!("{err:#}"),
                "published, but failed to remove previous destination"
            );
        }

        info!(files = self.stats.files, bytes = self.stats.bytes, "published");
        Ok(self.stats)
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = remove_path_if_exists(&self.staging) {
            warn!(
                staging = %self.staging.display(),
                err = %format!("{err:#}"),
                "failed to remove staging directory"
            );
        }
    }
}

/// Put back a destination that an interrupted swap left at `previous`.
fn recover_previous(destination: &Path, previous: &Path) -> Result<()> {
    if fs::symlink_metadata(previous).is_err() {
        return Ok(());
    }
    if fs::symlink_metadata(destination).is_err() {
        warn!(
            previous = %previous.display(),
            "destination missing, restoring it from an interrupted publish"
        );
        return fs::rename(previous, destination)
            .with_context(|| format!("restore {}", destination.display()));
    }
    remove_path_if_exists(previous)?;
    Ok(())
}

/// Recursively copy `src` into a new directory `dst`, following symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<PublishStats> {
    let mut stats = PublishStats::default();
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        } else {
            let bytes = fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
            stats.files += 1;
            stats.bytes += bytes;
        }
    }
    Ok(stats)
}

fn sibling(destination: &Path, suffix: &str) -> Result<PathBuf> {
    let name = destination
        .file_name()
        .ok_or_else(|| anyhow!("destination has no name {}", destination.display()))?;
    let mut hidden = OsString::from(".");
    hidden.push(name);
    hidden.push(".");
    hidden.push(suffix);
    Ok(destination.with_file_name(hidden))
}
