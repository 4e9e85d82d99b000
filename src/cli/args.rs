//! Defines the command-line arguments for the Typecase CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::CacheStrategy;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "typecase",
    version,
    about = "Runs YAML-described type checker scenarios and compares diagnostics."
)]
pub struct TypecaseArgs {
    /// Scenario documents or directories to search for `test-*.yml` files.
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Directory in which workspaces and the shared cache are created.
    #[arg(long, env = "TYPECASE_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Base ini config merged with every case's `mypy_config`.
    #[arg(long, conflicts_with = "toml_file")]
    pub ini_file: Option<PathBuf>,

    /// Base `pyproject.toml` whose `[tool.mypy]` is merged with every case's `mypy_config`.
    #[arg(long)]
    pub toml_file: Option<PathBuf>,

    /// Run the checker inside this process (needs a registered entry).
    #[arg(long)]
    pub same_process: bool,

    /// Name of a registered extension hook applied to every scenario.
    #[arg(long, value_name = "NAME")]
    pub extension_hook: Option<String>,

    /// Name of a registered set of scenario hooks.
    #[arg(long, value_name = "NAME")]
    pub scenario_hooks: Option<String>,

    /// Session flag that skip expressions see as `flag.NAME` (repeatable).
    #[arg(long = "skip-flag", value_name = "NAME")]
    pub skip_flags: Vec<String>,

    /// Do not report diagnostics from installed packages.
    #[arg(long)]
    pub only_local_stub: bool,

    /// Reject unknown keys in scenario documents.
    #[arg(long)]
    pub closed_schema: bool,

    /// Incremental cache strategy.
    #[arg(long, value_enum, env = "TYPECASE_CACHE_STRATEGY", default_value_t = StrategyArg::SharedIncremental)]
    pub cache_strategy: StrategyArg,

    /// Checker executable (searched on PATH when not a path).
    #[arg(long, env = "TYPECASE_CHECKER")]
    pub checker: Option<PathBuf>,

    /// Root against which relative PYTHONPATH/MYPYPATH overrides are resolved.
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Only run scenarios whose name contains this substring.
    #[arg(long, short = 'k', value_name = "SUBSTR")]
    pub filter: Option<String>,

    /// Number of scenarios to run in parallel.
    #[arg(long, short = 'j', default_value_t = 1)]
    pub jobs: usize,

    /// Print one JSON document with every report instead of text.
    #[arg(long)]
    pub json: bool,

    /// More logging (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// When to color the output.
    #[arg(long, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyArg {
    SharedIncremental,
    NoIncremental,
    NonSharedIncremental,
}

impl From<StrategyArg> for CacheStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::SharedIncremental => CacheStrategy::SharedIncremental,
            StrategyArg::NoIncremental => CacheStrategy::NoIncremental,
            StrategyArg::NonSharedIncremental => CacheStrategy::NonSharedIncremental,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}
