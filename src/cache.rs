//! Incremental cache strategies.
//!
//! The controller decides, per step, how many checker runs to make and with
//! which cache flags. The session-shared cache is an explicit resource: a step
//! that uses it holds its lock across every run and the prune that follows.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use walkdir::WalkDir;

use crate::config::{CacheStrategy, CACHE_DIR_NAME};
use crate::errors::{HarnessError, Result};

const CACHE_ENTRY_SUFFIXES: [&str; 2] = [".data.json", ".meta.json"];

// =============================================================================
// SHARED CACHE
// =============================================================================

/// The session-wide incremental cache directory and the lock guarding it.
#[derive(Debug)]
pub struct SharedCache {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl SharedCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Takes exclusive use of the cache. A poisoned lock is still usable: the
    /// cache holds no in-memory state.
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Removes the cache entries of every file in `workspace`, across every
    /// version directory, then any directories left empty inside the cache.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, workspace: &Path) -> Result<usize> {
        let versions = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .map(|e| e.path())
                .collect::<Vec<_>>(),
            Err(_) => return Ok(0),
        };

        let mut removed = 0;
        for entry in WalkDir::new(workspace).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(workspace) else {
                continue;
            };
            let stem = relative.with_extension("");
            for version in &versions {
                removed += self.remove_entries(&version.join(&stem))?;
            }
        }
        Ok(removed)
    }

    fn remove_entries(&self, stem: &Path) -> Result<usize> {
        let mut removed = 0;
        for suffix in CACHE_ENTRY_SUFFIXES {
            let mut name = OsString::from(stem.as_os_str());
            name.push(suffix);
            let target = PathBuf::from(name);
            if target.is_file() {
                fs::remove_file(&target).map_err(|e| HarnessError::workspace(&target, e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            self.remove_empty_parents(stem);
        }
        Ok(removed)
    }

    fn remove_empty_parents(&self, stem: &Path) {
        for dir in stem.ancestors().skip(1) {
            if dir == self.dir || !dir.starts_with(&self.dir) {
                break;
            }
            let is_empty = fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty || fs::remove_dir(dir).is_err() {
                break;
            }
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// How one step talks to the checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePlan {
    pub flags: Vec<String>,
    pub runs: usize,
    /// Use (and prune) the shared cache.
    pub shared: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheController<'a> {
    strategy: CacheStrategy,
    shared: &'a SharedCache,
}

impl<'a> CacheController<'a> {
    pub fn new(strategy: CacheStrategy, shared: &'a SharedCache) -> Self {
        Self { strategy, shared }
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// The plan for the next step in `workspace`. Must be computed before the
    /// step's first run, since it looks at the workspace cache.
    pub fn plan(&self, workspace: &Path, disable_cache: bool) -> CachePlan {
        match self.strategy {
            CacheStrategy::SharedIncremental if disable_cache => CachePlan {
                flags: Vec::new(),
                runs: 1,
                shared: false,
            },
            CacheStrategy::SharedIncremental => CachePlan {
                flags: vec!["--cache-dir".to_string(), self.shared.dir().display().to_string()],
                runs: 1,
                shared: true,
            },
            CacheStrategy::NoIncremental => CachePlan {
                flags: vec!["--no-incremental".to_string()],
                runs: 1,
                shared: false,
            },
            CacheStrategy::NonSharedIncremental => {
                let warm = workspace.join(CACHE_DIR_NAME).exists();
                CachePlan {
                    flags: vec!["--incremental".to_string()],
                    runs: if warm || disable_cache { 1 } else { 2 },
                    shared: false,
                }
            }
        }
    }

    /// Runs one step. `run` is called once per planned run with the cache flags
    /// and the run index; the first error stops the step. Shared-cache entries
    /// are pruned afterwards whatever the outcome.
    pub fn run_step<E, F>(&self, workspace: &Path, disable_cache: bool, mut run: F) -> std::result::Result<(), E>
    where
        F: FnMut(&[String], usize) -> std::result::Result<(), E>,
    {
        let plan = self.plan(workspace, disable_cache);
        let _guard = plan.shared.then(|| self.shared.acquire());

        let outcome = (0..plan.runs).try_for_each(|attempt| run(&plan.flags, attempt));

        if plan.shared {
            match self.shared.prune(workspace) {
                Ok(removed) => tracing::debug!(removed, "pruned shared cache entries"),
                Err(err) => tracing::warn!(error = %err, "failed to prune shared cache"),
            }
        }
        outcome
    }
}
