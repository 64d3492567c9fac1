//! Scoped ownership of the temporary enlistment directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Temporary checkout that is removed when the run ends.
///
/// Removal happens in [`Enlistment::close`] on the success path and in `Drop`
/// when a step bails out early, so no run leaves a checkout behind.
#[derive(Debug)]
pub struct Enlistment {
    path: PathBuf,
    keep: bool,
    closed: bool,
}

impl Enlistment {
    /// Remove any stale directory at `path` and take ownership of the location.
    pub fn prepare(path: impl Into<PathBuf>, keep: bool) -> Result<Self> {
        let path = path.into();
        if remove_path_if_exists(&path)? {
            info!(path = %path.display(), "removed stale enlistment");
        }
        Ok(Self {
            path,
            keep,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the enlistment now, reporting failures.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        if self.keep {
            info!(path = %self.path.display(), "keeping enlistment");
            return Ok(());
        }
        remove_path_if_exists(&self.path)
            .with_context(|| format!("remove enlistment {}", self.path.display()))?;
        debug!(path = %self.path.display(), "enlistment removed");
        Ok(())
    }
}

impl Drop for Enlistment {
    fn drop(&mut self) {
        if self.closed || self.keep {
            return;
        }
        if let Err(err) = remove_path_if_exists(&self.path) {
            warn!(path = %self.path.display(), err = %format!("{err:#}"), "failed to remove enlistment");
        }
    }
}

/// Remove a file, symlink or directory tree. Returns whether anything was removed.
pub fn remove_path_if_exists(path: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err).with_context(|| format!("stat {}", path.display())),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
    } else {
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(true)
}
