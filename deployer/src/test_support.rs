//! Test-only helpers: a scripted toolchain and directory fixtures.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::core::plan::{EXAMPLES_DIR, normalize_lexically};
use crate::io::config::{DeployConfig, SourceConfig};
use crate::io::toolchain::Toolchain;

/// What a scripted build does for one example.
#[derive(Debug, Clone)]
pub enum ScriptedBuild {
    /// Write these files under `dist/` and succeed.
    Files(Vec<(String, String)>),
    /// Succeed without producing `dist/`.
    NoOutput,
    /// Fail with this message.
    Fail(String),
}

impl ScriptedBuild {
    pub fn files(files: &[(&str, &str)]) -> Self {
        ScriptedBuild::Files(
            files
                .iter()
                .map(|(path, contents)| (path.to_string(), contents.to_string()))
                .collect(),
        )
    }

    pub fn fail(message: &str) -> Self {
        ScriptedBuild::Fail(message.to_string())
    }

    /// The tree [`read_tree`] returns for a directory holding exactly `files`.
    pub fn expected(files: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        files
            .iter()
            .map(|(path, contents)| (path.to_string(), contents.as_bytes().to_vec()))
            .collect()
    }
}

/// Toolchain that never spawns a process.
///
/// `fetch_source` creates an example directory for every scripted build, so
/// examples without a script are missing from the enlistment.
#[derive(Debug, Default)]
pub struct ScriptedToolchain {
    builds: Vec<(String, ScriptedBuild)>,
    fail_fetch: bool,
    fail_install: bool,
    calls: RefCell<Vec<String>>,
}

impl ScriptedToolchain {
    pub const COMMIT: &'static str = "0123456789abcdef0123456789abcdef01234567";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(mut self, example: &str, build: ScriptedBuild) -> Self {
        self.builds.push((example.to_string(), build));
        self
    }

    pub fn fail_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub fn fail_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    /// Calls made so far, e.g. `["fetch", "install", "build renderWithSVG"]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl Toolchain for ScriptedToolchain {
    fn fetch_source(&self, _source: &SourceConfig, dest: &Path) -> Result<Option<String>> {
        self.record("fetch".to_string());
        if self.fail_fetch {
            bail!("clone failed: network unreachable");
        }
        for (example, _) in &self.builds {
            fs::create_dir_all(dest.join(EXAMPLES_DIR).join(example))?;
        }
        Ok(Some(Self::COMMIT.to_string()))
    }

    fn install_dependencies(&self, enlistment: &Path) -> Result<()> {
        self.record("install".to_string());
        if self.fail_install {
            bail!("install failed: registry unavailable");
        }
        fs::create_dir_all(enlistment.join("node_modules"))?;
        Ok(())
    }

    fn build_example(&self, example_dir: &Path) -> Result<()> {
        let name = example_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("build {name}"));
        let build = self
            .builds
            .iter()
            .find(|(example, _)| *example == name)
            .map(|(_, build)| build.clone());
        match build {
            Some(ScriptedBuild::Files(files)) => {
                let dist = example_dir.join("dist");
                for (path, contents) in files {
                    let path = dist.join(path);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(path, contents)?;
                }
                Ok(())
            }
            Some(ScriptedBuild::NoOutput) => Ok(()),
            Some(ScriptedBuild::Fail(message)) => bail!("{message}"),
            None => bail!("no scripted build for {name}"),
        }
    }
}

/// A temporary base directory with the default config.
///
/// The enlistment (`../jagl_tmp`) lands next to `base` inside the same temp dir.
pub struct SiteLayout {
    _temp: TempDir,
    pub base: PathBuf,
    pub config: DeployConfig,
}

impl SiteLayout {
    pub fn enlistment(&self) -> PathBuf {
        normalize_lexically(&self.base.join(&self.config.enlistment_dir))
    }
}

pub fn site_layout() -> SiteLayout {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = temp.path().join("site");
    fs::create_dir_all(&base).expect("create base");
    SiteLayout {
        _temp: temp,
        base,
        config: DeployConfig::default(),
    }
}

/// Create `files` (relative path, contents) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
    }
}

/// Every file under `root`, keyed by `/`-separated relative path.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = entry.expect("walk");
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).expect("relative");
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(key, fs::read(entry.path()).expect("read file"));
    }
    files
}
