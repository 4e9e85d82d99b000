//! Checker invocation, as a subprocess or through a registered in-process entry.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};

/// Exit code for a clean run.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when diagnostics were reported.
pub const EXIT_DIAGNOSTICS: i32 = 1;
/// Exit code reported for a crashed in-process entry.
pub const EXIT_FATAL: i32 = 2;

const PATH_SEPARATOR: &str = ":";

static ENV_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?:([A-Za-z_][A-Za-z0-9_]*)|\{([^}]*)\})").unwrap());

/// Serializes in-process runs: they swap the working directory and environment.
static IN_PROCESS_LOCK: Mutex<()> = Mutex::new(());

/// What one checker run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    pub fn output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Only 0 and 1 are checker verdicts; anything else is a tool failure.
    pub fn ensure_completed(&self) -> Result<()> {
        match self.exit_code {
            EXIT_SUCCESS | EXIT_DIAGNOSTICS => Ok(()),
            code => Err(HarnessError::Invocation {
                message: "Critical error occurred".to_string(),
                exit_code: Some(code),
                output: self.output(),
            }),
        }
    }
}

/// Builds the full argument vector for one run.
pub fn checker_args(config: &HarnessConfig, config_file: &Path, cache_flags: &[String], start: &[String]) -> Vec<String> {
    let mut args: Vec<String> = [
        "--show-traceback",
        "--no-error-summary",
        "--no-pretty",
        "--hide-error-context",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if !config.only_local_stub {
        args.push("--no-silence-site-packages".to_string());
    }
    args.push(format!("--config-file={}", config_file.display()));
    args.extend(cache_flags.iter().cloned());
    args.extend(start.iter().cloned());
    args
}

/// One invocation request.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub workspace: &'a Path,
    pub args: &'a [String],
    pub env: &'a BTreeMap<String, String>,
}

/// Runs the checker.
pub trait Executor: Send + Sync {
    fn execute(&self, invocation: &Invocation<'_>) -> Result<RunResult>;

    /// The command line as shown in the run log.
    fn display(&self, args: &[String]) -> String {
        format!("mypy {}", args.join(" "))
    }
}

/// Rejects names and values the platform cannot store in the environment.
pub fn check_env_var(name: &str, value: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("environment variable name is empty".to_string());
    }
    if name.contains('=') || name.contains('\0') {
        return Err(format!("invalid environment variable name {:?}", name));
    }
    if value.contains('\0') {
        return Err(format!("environment variable {} has a NUL byte in its value", name));
    }
    Ok(())
}

fn checked_var(name: &str, value: &str) -> Result<()> {
    check_env_var(name, value).map_err(|message| HarnessError::Invocation {
        message,
        exit_code: None,
        output: String::new(),
    })
}

// =============================================================================
// SUBPROCESS
// =============================================================================

/// Expands `$NAME` and `${NAME}`; unknown variables are left as written.
pub fn expand_vars(text: &str) -> String {
    ENV_VAR_RE
        .replace_all(text, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
            env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn resolve_against(value: &str, root: Option<&Path>) -> String {
    let expanded = expand_vars(value);
    match root {
        Some(root) if !Path::new(&expanded).is_absolute() => root.join(&expanded).display().to_string(),
        _ => expanded,
    }
}

fn ambient(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// `PYTHONPATH`: ambient value, workspace, then the override resolved and raw.
pub fn collect_python_path(workspace: &Path, overrides: &BTreeMap<String, String>, root: Option<&Path>) -> String {
    let mut parts = Vec::new();
    parts.extend(ambient("PYTHONPATH"));
    parts.push(workspace.display().to_string());
    if let Some(value) = overrides.get("PYTHONPATH").filter(|v| !v.is_empty()) {
        parts.push(resolve_against(value, root));
        parts.push(value.clone());
    }
    parts.join(PATH_SEPARATOR)
}

/// `MYPYPATH`: ambient value, the override resolved and raw, then the project root.
pub fn collect_mypy_path(overrides: &BTreeMap<String, String>, root: Option<&Path>) -> String {
    let mut parts = Vec::new();
    parts.extend(ambient("MYPYPATH"));
    if let Some(value) = overrides.get("MYPYPATH").filter(|v| !v.is_empty()) {
        parts.push(resolve_against(value, root));
        parts.push(value.clone());
    }
    if let Some(root) = root {
        parts.push(root.display().to_string());
    }
    parts.join(PATH_SEPARATOR)
}

/// Spawns the checker executable with the workspace as working directory.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    executable: PathBuf,
    project_root: Option<PathBuf>,
}

impl SubprocessExecutor {
    pub fn new(executable: impl Into<PathBuf>, project_root: Option<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            project_root,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.checker_executable, config.project_root.clone())
    }
}

impl Executor for SubprocessExecutor {
    fn execute(&self, invocation: &Invocation<'_>) -> Result<RunResult> {
        for (name, value) in invocation.env {
            checked_var(name, value)?;
        }
        let root = self.project_root.as_deref();
        let output = Command::new(&self.executable)
            .args(invocation.args)
            .current_dir(invocation.workspace)
            .envs(invocation.env)
            .env("PYTHONPATH", collect_python_path(invocation.workspace, invocation.env, root))
            .env("MYPYPATH", collect_mypy_path(invocation.env, root))
            .output()
            .map_err(|e| HarnessError::Invocation {
                message: format!("failed to spawn {}: {}", self.executable.display(), e),
                exit_code: None,
                output: String::new(),
            })?;

        Ok(RunResult {
            // Killed by a signal: no code, always a tool failure.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// =============================================================================
// IN PROCESS
// =============================================================================

/// A checker callable in the current process: `(args, stdout, stderr) -> exit code`.
pub type CheckerEntry = Arc<dyn Fn(&[String], &mut dyn Write, &mut dyn Write) -> i32 + Send + Sync>;

/// Swaps the working directory and environment, restoring both on drop.
struct ProcessStateGuard {
    cwd: PathBuf,
    saved: Vec<(String, Option<OsString>)>,
}

impl ProcessStateGuard {
    fn enter(workspace: &Path, overrides: &BTreeMap<String, String>) -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| HarnessError::workspace(workspace, e))?;
        let mut guard = Self {
            cwd,
            saved: Vec::new(),
        };
        for (key, value) in overrides {
            guard.set(key, value.clone())?;
        }
        let python_path = match env::var("PYTHONPATH").ok().filter(|v| !v.is_empty()) {
            Some(existing) => format!("{}{}{}", workspace.display(), PATH_SEPARATOR, existing),
            None => workspace.display().to_string(),
        };
        guard.set("PYTHONPATH", python_path)?;
        env::set_current_dir(workspace).map_err(|e| HarnessError::workspace(workspace, e))?;
        Ok(guard)
    }

    /// Only validated keys are recorded, so restoring on drop cannot fail.
    fn set(&mut self, key: &str, value: String) -> Result<()> {
        checked_var(key, &value)?;
        if !self.saved.iter().any(|(k, _)| k == key) {
            self.saved.push((key.to_string(), env::var_os(key)));
        }
        env::set_var(key, value);
        Ok(())
    }
}

impl Drop for ProcessStateGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            match value {
                Some(value) => env::set_var(&key, value),
                None => env::remove_var(&key),
            }
        }
        if let Err(err) = env::set_current_dir(&self.cwd) {
            tracing::warn!(cwd = %self.cwd.display(), error = %err, "failed to restore working directory");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "checker panicked".to_string()
    }
}

/// Calls a registered [`CheckerEntry`] inside the harness process.
#[derive(Clone)]
pub struct InProcessExecutor {
    entry: CheckerEntry,
}

impl InProcessExecutor {
    pub fn new(entry: CheckerEntry) -> Self {
        Self { entry }
    }

    pub fn from_fn<F>(entry: F) -> Self
    where
        F: Fn(&[String], &mut dyn Write, &mut dyn Write) -> i32 + Send + Sync + 'static,
    {
        Self::new(Arc::new(entry))
    }
}

impl std::fmt::Debug for InProcessExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessExecutor").finish_non_exhaustive()
    }
}

impl Executor for InProcessExecutor {
    fn execute(&self, invocation: &Invocation<'_>) -> Result<RunResult> {
        let _lock = IN_PROCESS_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _state = ProcessStateGuard::enter(invocation.workspace, invocation.env)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.entry)(invocation.args, &mut stdout, &mut stderr)
        }));
        let exit_code = match outcome {
            Ok(code) => code,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let _ = writeln!(stderr, "{}", message);
                EXIT_FATAL
            }
        };

        Ok(RunResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}
