//! Per-scenario temporary workspaces and the run log.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tempfile::TempDir;

use crate::errors::{HarnessError, Result};
use crate::scenario::{FileEntry, FollowupFile};

/// Prefix of every workspace directory name.
pub const WORKSPACE_PREFIX: &str = "typecase-";

// =============================================================================
// RUN LOG
// =============================================================================

/// The ordered record of what a scenario did, shown when it fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new(workspace: &Path) -> Self {
        Self {
            lines: vec![format!("Ran mypy the following times from {}", workspace.display())],
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn command(&mut self, display: &str) {
        self.push(format!("  % {}", display));
    }

    /// Records one invocation result, one log line per output line.
    pub fn result(&mut self, exit_code: i32, stdout: &str, stderr: &str) {
        self.push(format!("  | returncode: {}", exit_code));
        for line in stdout.split('\n') {
            self.push(format!("  | stdout: {}", line));
        }
        for line in stderr.split('\n') {
            self.push(format!("  | stderr: {}", line));
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for RunLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

// =============================================================================
// WORKSPACE
// =============================================================================

/// An isolated temporary directory, removed by [`Workspace::close`] or on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Creates `typecase-XXXX` under `base_dir`.
    pub fn materialize(base_dir: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(base_dir)
            .map_err(|source| HarnessError::BaseDirectory {
                path: base_dir.to_path_buf(),
                source,
            })?;
        tracing::debug!(workspace = %dir.path().display(), "created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory, reporting what dropping it would swallow.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| HarnessError::workspace(path, e))
    }

    /// Resolves a relative file path inside the workspace. Paths that would
    /// escape it are rejected.
    pub fn path_for(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(HarnessError::workspace(
                rel,
                io::Error::new(io::ErrorKind::InvalidInput, "file paths must stay inside the workspace"),
            ));
        }
        Ok(self.path().join(rel))
    }

    fn write(&self, full: &Path, content: &str) -> Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::workspace(parent, e))?;
        }
        fs::write(full, content).map_err(|e| HarnessError::workspace(full, e))
    }

    /// Writes an initial file, creating parent directories.
    pub fn make_file(&self, file: &FileEntry, log: &mut RunLog) -> Result<()> {
        let full = self.path_for(&file.path)?;
        log.push(format!("  > Created {}", full.display()));
        self.write(&full, &file.content)
    }

    /// Applies one followup mutation.
    ///
    /// `None` deletes the file or directory (missing is fine). Identical content
    /// is a no-op. Otherwise the file is written and its modification time is
    /// guaranteed to land on a later whole second than before.
    pub fn apply_followup_file(&self, file: &FollowupFile, log: &mut RunLog) -> Result<()> {
        let full = self.path_for(&file.path)?;
        let Some(content) = &file.content else {
            log.push(format!("  > Deleted {}", full.display()));
            return remove_path(&full);
        };

        let previous = match fs::metadata(&full) {
            Ok(meta) if meta.is_file() => {
                let existing = fs::read_to_string(&full).map_err(|e| HarnessError::workspace(&full, e))?;
                if existing == *content {
                    return Ok(());
                }
                log.push(format!("  > Changed {}", full.display()));
                meta.modified().ok()
            }
            _ => {
                log.push(format!("  > Created {}", full.display()));
                None
            }
        };

        self.write(&full, content)?;
        if let Some(previous) = previous {
            bump_mtime(&full, previous)?;
        }
        Ok(())
    }
}

fn whole_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn bump_mtime(path: &Path, previous: SystemTime) -> Result<()> {
    let current = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| HarnessError::workspace(path, e))?;
    if whole_seconds(current) > whole_seconds(previous) {
        return Ok(());
    }
    let bumped = UNIX_EPOCH + Duration::from_secs(whole_seconds(previous) + 1);
    File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(bumped))
        .map_err(|e| HarnessError::workspace(path, e))
}

/// Removes a file or a directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|e| HarnessError::workspace(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (TempDir, Workspace) {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::materialize(base.path()).unwrap();
        (base, ws)
    }

    #[test]
    fn workspace_lives_under_base_and_is_removed_on_drop() {
        let (base, ws) = workspace();
        let path = ws.path().to_path_buf();
        assert!(path.starts_with(base.path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX));
        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn close_removes_the_tree_and_reports_failures() {
        let (_base, ws) = workspace();
        let path = ws.path().to_path_buf();
        ws.make_file(&FileEntry::new("pkg/mod.py", "x = 1"), &mut RunLog::default()).unwrap();
        ws.close().unwrap();
        assert!(!path.exists());

        let (_base, gone) = workspace();
        fs::remove_dir_all(gone.path()).unwrap();
        assert!(matches!(gone.close(), Err(HarnessError::Workspace { .. })));
    }

    #[test]
    fn missing_base_directory_is_reported() {
        let err = Workspace::materialize(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, HarnessError::BaseDirectory { .. }));
    }

    #[test]
    fn make_file_creates_parents_and_logs() {
        let (_base, ws) = workspace();
        let mut log = RunLog::new(ws.path());
        ws.make_file(&FileEntry::new("pkg/sub/mod.py", ""), &mut log).unwrap();
        assert!(ws.path().join("pkg/sub/mod.py").is_file());
        assert!(log.lines()[1].starts_with("  > Created "));
    }

    #[test]
    fn paths_cannot_escape() {
        let (_base, ws) = workspace();
        assert!(ws.path_for("../evil.py").is_err());
        assert!(ws.path_for("/etc/passwd").is_err());
        assert!(ws.path_for("ok/fine.py").is_ok());
    }

    #[test]
    fn followup_changes_advance_mtime() {
        let (_base, ws) = workspace();
        let mut log = RunLog::new(ws.path());
        ws.make_file(&FileEntry::new("a.py", "x = 1"), &mut log).unwrap();
        let before = fs::metadata(ws.path().join("a.py")).unwrap().modified().unwrap();

        let change = FollowupFile {
            path: "a.py".into(),
            content: Some("x = 2".into()),
        };
        ws.apply_followup_file(&change, &mut log).unwrap();
        let after = fs::metadata(ws.path().join("a.py")).unwrap().modified().unwrap();
        assert!(whole_seconds(after) > whole_seconds(before));
        assert!(log.lines().last().unwrap().starts_with("  > Changed "));
    }

    #[test]
    fn identical_followup_content_is_a_no_op() {
        let (_base, ws) = workspace();
        let mut log = RunLog::new(ws.path());
        ws.make_file(&FileEntry::new("a.py", "x = 1"), &mut log).unwrap();
        let entries = log.lines().len();
        let same = FollowupFile {
            path: "a.py".into(),
            content: Some("x = 1".into()),
        };
        ws.apply_followup_file(&same, &mut log).unwrap();
        assert_eq!(log.lines().len(), entries);
    }

    #[test]
    fn followup_deletes_files_and_directories() {
        let (_base, ws) = workspace();
        let mut log = RunLog::new(ws.path());
        ws.make_file(&FileEntry::new("pkg/__init__.py", ""), &mut log).unwrap();
        ws.make_file(&FileEntry::new("b.py", ""), &mut log).unwrap();

        for path in ["pkg", "b.py", "never-existed.py"] {
            let delete = FollowupFile {
                path: path.into(),
                content: None,
            };
            ws.apply_followup_file(&delete, &mut log).unwrap();
        }
        assert!(!ws.path().join("pkg").exists());
        assert!(!ws.path().join("b.py").exists());
    }
}
