//! Session-wide harness configuration.
//!
//! A [`HarnessConfig`] is built once per session (from the CLI or in code through
//! [`HarnessConfigBuilder`]) and shared read-only by every scenario.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{HarnessError, Result};

/// Default name of the entry file written into every workspace.
pub const DEFAULT_ENTRY_FILE: &str = "main.py";
/// Default source suffix stripped from diagnostic paths.
pub const DEFAULT_SOURCE_SUFFIX: &str = ".py";
/// Name of the incremental cache directory, both shared and per workspace.
pub const CACHE_DIR_NAME: &str = ".mypy_cache";

/// How the checker's incremental cache is handled across invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStrategy {
    /// One run per step against a session-shared cache. This scenario's cache
    /// entries are pruned after every run.
    #[default]
    SharedIncremental,
    /// One run per step with incremental analysis turned off.
    NoIncremental,
    /// Two runs per step against a cache private to the workspace: the first
    /// against an empty cache, the second reusing it.
    NonSharedIncremental,
}

impl CacheStrategy {
    pub const ALL: [CacheStrategy; 3] = [
        CacheStrategy::SharedIncremental,
        CacheStrategy::NoIncremental,
        CacheStrategy::NonSharedIncremental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::SharedIncremental => "SHARED_INCREMENTAL",
            CacheStrategy::NoIncremental => "NO_INCREMENTAL",
            CacheStrategy::NonSharedIncremental => "NON_SHARED_INCREMENTAL",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStrategy {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        CacheStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                HarnessError::config(format!(
                    "unknown cache strategy '{}', expected one of SHARED_INCREMENTAL, NO_INCREMENTAL, NON_SHARED_INCREMENTAL",
                    s
                ))
            })
    }
}

/// Immutable configuration for one test session.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Run the checker through a registered in-process entry instead of a subprocess.
    pub same_process: bool,
    pub strategy: CacheStrategy,
    /// Suppress diagnostics coming from installed third-party packages.
    pub only_local_stub: bool,
    /// Directory under which every workspace is created.
    pub base_dir: PathBuf,
    pub base_ini: Option<PathBuf>,
    pub base_toml: Option<PathBuf>,
    /// Session-shared incremental cache (`<base_dir>/.mypy_cache`).
    pub cache_dir: PathBuf,
    pub checker_executable: PathBuf,
    /// Project root used to resolve relative `PYTHONPATH`/`MYPYPATH` overrides.
    pub project_root: Option<PathBuf>,
    /// Reject unknown keys in scenario documents.
    pub closed_schema: bool,
    pub entry_file: String,
    pub source_suffix: String,
}

impl HarnessConfig {
    pub fn builder() -> HarnessConfigBuilder {
        HarnessConfigBuilder::default()
    }

    /// The entry file name with the source suffix removed (`main`).
    pub fn entry_module(&self) -> &str {
        self.entry_file
            .strip_suffix(self.source_suffix.as_str())
            .unwrap_or(&self.entry_file)
    }
}

/// Builder for [`HarnessConfig`]; `build` performs all session-level validation.
#[derive(Debug, Clone, Default)]
pub struct HarnessConfigBuilder {
    same_process: bool,
    strategy: CacheStrategy,
    only_local_stub: bool,
    base_dir: Option<PathBuf>,
    base_ini: Option<PathBuf>,
    base_toml: Option<PathBuf>,
    checker_executable: Option<PathBuf>,
    project_root: Option<PathBuf>,
    closed_schema: bool,
    entry_file: Option<String>,
    source_suffix: Option<String>,
}

impl HarnessConfigBuilder {
    pub fn same_process(mut self, same_process: bool) -> Self {
        self.same_process = same_process;
        self
    }

    pub fn strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn only_local_stub(mut self, only_local_stub: bool) -> Self {
        self.only_local_stub = only_local_stub;
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn base_ini(mut self, path: Option<PathBuf>) -> Self {
        self.base_ini = path;
        self
    }

    pub fn base_toml(mut self, path: Option<PathBuf>) -> Self {
        self.base_toml = path;
        self
    }

    pub fn checker_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.checker_executable = Some(path.into());
        self
    }

    pub fn project_root(mut self, root: Option<PathBuf>) -> Self {
        self.project_root = root;
        self
    }

    pub fn closed_schema(mut self, closed: bool) -> Self {
        self.closed_schema = closed;
        self
    }

    pub fn entry_file(mut self, name: impl Into<String>) -> Self {
        self.entry_file = Some(name.into());
        self
    }

    pub fn source_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.source_suffix = Some(suffix.into());
        self
    }

    pub fn build(self) -> Result<HarnessConfig> {
        if self.base_ini.is_some() && self.base_toml.is_some() {
            return Err(HarnessError::config_conflict(
                "cannot specify both an ini config file and a toml config file",
            ));
        }

        let base_dir = self.base_dir.unwrap_or_else(std::env::temp_dir);
        let base_dir = absolutize(&base_dir);
        let cache_dir = base_dir.join(CACHE_DIR_NAME);

        let checker_executable = match self.checker_executable {
            Some(path) => path,
            None if self.same_process => PathBuf::from("mypy"),
            None => find_executable("mypy")
                .ok_or_else(|| HarnessError::config("checker executable 'mypy' is not found on PATH"))?,
        };

        Ok(HarnessConfig {
            same_process: self.same_process,
            strategy: self.strategy,
            only_local_stub: self.only_local_stub,
            base_dir,
            base_ini: self.base_ini.map(|p| absolutize(&p)),
            base_toml: self.base_toml.map(|p| absolutize(&p)),
            cache_dir,
            checker_executable,
            project_root: self.project_root,
            closed_schema: self.closed_schema,
            entry_file: self
                .entry_file
                .unwrap_or_else(|| DEFAULT_ENTRY_FILE.to_string()),
            source_suffix: self
                .source_suffix
                .unwrap_or_else(|| DEFAULT_SOURCE_SUFFIX.to_string()),
        })
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Resolves a bare name through `PATH`; a name with a directory part is checked as given.
pub fn find_executable(name: impl AsRef<OsStr>) -> Option<PathBuf> {
    which::which(name).ok()
}
