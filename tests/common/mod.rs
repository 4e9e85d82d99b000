//! Shared fixtures for the integration tests: a tiny fake checker that runs
//! in-process, plus builders for harnesses rooted in temporary directories.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use typecase::{CacheStrategy, CaseDefinition, Harness, HarnessConfig, ScenarioHooks, ScenarioReport};

/// Version directory the fake checker writes cache entries under.
pub const CACHE_VERSION: &str = "3.12";

fn literal_type(expr: &str) -> Option<&'static str> {
    let expr = expr.trim();
    if expr.parse::<i64>().is_ok() {
        Some("builtins.int")
    } else if (expr.starts_with('"') && expr.ends_with('"')) || (expr.starts_with('\'') && expr.ends_with('\'')) {
        Some("builtins.str")
    } else if expr == "True" || expr == "False" {
        Some("builtins.bool")
    } else if expr == "None" {
        Some("None")
    } else {
        None
    }
}

fn imported_module(code: &str) -> Option<&str> {
    let rest = code
        .strip_prefix("import ")
        .or_else(|| code.strip_prefix("from "))?;
    rest.split_whitespace().next()
}

fn module_exists(module: &str) -> bool {
    let base = module.replace('.', "/");
    Path::new(&format!("{}.py", base)).is_file() || Path::new(&base).join("__init__.py").is_file()
}

fn module_file(module: &str) -> String {
    let base = module.replace('.', "/");
    if Path::new(&format!("{}.py", base)).is_file() {
        format!("{}.py", base)
    } else {
        format!("{}/__init__.py", base)
    }
}

/// Checks one file, pushing diagnostics and newly discovered imports.
fn check_file(path: &str, diagnostics: &mut Vec<String>, queue: &mut Vec<String>) {
    let Ok(source) = fs::read_to_string(path) else {
        diagnostics.push(format!("{}: error: Cannot read file '{}'", path, path));
        return;
    };
    let mut names: Vec<(String, &'static str)> = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let lineno = index + 1;
        let code = line.split(" # ").next().unwrap_or("").trim();
        if code.contains("crash()") {
            panic!("INTERNAL ERROR: crash requested at {}:{}", path, lineno);
        }
        if let Some(module) = imported_module(code) {
            if module_exists(module) {
                queue.push(module_file(module));
            } else {
                diagnostics.push(format!(
                    "{}:{}: error: Cannot find implementation or library stub for module named \"{}\"",
                    path, lineno, module
                ));
            }
            continue;
        }
        if let Some(inner) = code.strip_prefix("reveal_type(").and_then(|r| r.strip_suffix(')')) {
            let revealed = literal_type(inner)
                .or_else(|| names.iter().rev().find(|(n, _)| n == inner.trim()).map(|(_, t)| *t))
                .unwrap_or("Any");
            diagnostics.push(format!("{}:{}: note: Revealed type is \"{}\"", path, lineno, revealed));
            continue;
        }
        if let Some((name, value)) = code.split_once(" = ") {
            if let Some(ty) = literal_type(value) {
                names.push((name.trim().to_string(), ty));
            }
        }
    }
}

fn write_cache_entries(cache_dir: &Path, checked: &BTreeSet<String>) {
    for file in checked {
        let stem = Path::new(file).with_extension("");
        for suffix in [".data.json", ".meta.json"] {
            let mut target = cache_dir.join(CACHE_VERSION).join(&stem).into_os_string();
            target.push(suffix);
            let target = PathBuf::from(target);
            if let Some(parent) = target.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = fs::write(&target, "{}");
        }
    }
}

/// A fake checker: reveals literal types, reports missing imports, panics on
/// `crash()`, and writes cache entries the way the real tool lays them out.
pub fn fake_checker(args: &[String], stdout: &mut dyn Write, _stderr: &mut dyn Write) -> i32 {
    let mut cache_dir: Option<PathBuf> = None;
    let mut incremental = true;
    let mut queue = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--cache-dir" => cache_dir = iter.next().map(PathBuf::from),
            "--no-incremental" => incremental = false,
            flag if flag.starts_with("--") => {}
            file => queue.push(file.to_string()),
        }
    }

    let mut checked = BTreeSet::new();
    let mut diagnostics = Vec::new();
    while let Some(file) = queue.pop() {
        if checked.insert(file.clone()) {
            check_file(&file, &mut diagnostics, &mut queue);
        }
    }

    if incremental {
        let dir = cache_dir.unwrap_or_else(|| PathBuf::from(".mypy_cache"));
        write_cache_entries(&dir, &checked);
    }

    for line in &diagnostics {
        let _ = writeln!(stdout, "{}", line);
    }
    if diagnostics.iter().any(|d| d.contains(": error: ")) {
        1
    } else {
        0
    }
}

/// A temporary base directory plus a harness running the fake checker in it.
pub struct Fixture {
    pub base: TempDir,
    pub harness: Harness,
}

impl Fixture {
    pub fn new(strategy: CacheStrategy) -> Self {
        let base = tempfile::tempdir().unwrap();
        let config = HarnessConfig::builder()
            .same_process(true)
            .strategy(strategy)
            .base_dir(base.path())
            .build()
            .unwrap();
        let harness = Harness::new(config).with_checker_entry(Arc::new(fake_checker));
        Self { base, harness }
    }

    pub fn shared() -> Self {
        Self::new(CacheStrategy::SharedIncremental)
    }

    /// Installs scenario hooks on the fixture's harness.
    pub fn with_hooks(mut self, hooks: Arc<dyn ScenarioHooks>) -> Self {
        self.harness = self.harness.with_scenario_hooks(hooks);
        self
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.harness.config().cache_dir.clone()
    }

    /// Runs a case that must expand to exactly one scenario.
    pub fn run_one(&self, definition: &CaseDefinition) -> ScenarioReport {
        let mut reports = self.harness.run_case(definition).unwrap();
        assert_eq!(reports.len(), 1, "expected a single scenario");
        reports.remove(0)
    }

    /// Parses a YAML document and runs every scenario of every case.
    pub fn run_yaml(&self, text: &str) -> Vec<ScenarioReport> {
        typecase::document::parse_document(text, false)
            .unwrap()
            .iter()
            .flat_map(|case| self.harness.run_case(case).unwrap())
            .collect()
    }
}

/// Panics with the rendered failure when a report is not a pass.
pub fn assert_passed(report: &ScenarioReport) {
    if let typecase::Outcome::Failed(failure) = &report.outcome {
        panic!(
            "{} failed in {}:\n{}\nrun log:\n{}",
            report.name, failure.step, failure.failure, report.run_log
        );
    }
    assert!(report.outcome.is_passed(), "{} was {:?}", report.name, report.outcome);
}

/// Writes an executable shell script and returns its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// A shell checker revealing `int` for every `reveal_type(1)` line of its inputs.
#[cfg(unix)]
pub const REVEAL_INT_SCRIPT: &str = r#"skip=0
for arg in "$@"; do
  if [ "$skip" = 1 ]; then skip=0; continue; fi
  case "$arg" in
    --cache-dir) skip=1 ;;
    --*) ;;
    *)
      grep -n 'reveal_type(1)' "$arg" | while IFS=: read -r n rest; do
        echo "$arg:$n: note: Revealed type is \"builtins.int\""
      done
      ;;
  esac
done
exit 0
"#;
