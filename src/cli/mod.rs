//! The Typecase Command-Line Interface.
//!
//! This module is the main entry point of the binary: it builds the session
//! configuration, collects scenarios from the given paths, runs them and
//! reports.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use clap::Parser;

use crate::cli::args::TypecaseArgs;
use crate::cli::output::{render_json, Reporter, Summary};
use crate::config::HarnessConfig;
use crate::discovery::discover_documents;
use crate::document::load_document;
use crate::errors::{print_error, HarnessError, Result};
use crate::hooks::HookRegistry;
use crate::logging::init_logging;
use crate::runner::{Harness, ScenarioReport};
use crate::scenario::Scenario;
use crate::skip::SkipFacts;
use crate::template;

pub mod args;
pub mod output;

/// The main entry point for the CLI.
pub fn run() {
    let args = TypecaseArgs::parse();
    init_logging(args.verbose, args.quiet);

    match run_with(&args, &HookRegistry::with_builtins()) {
        Ok(summary) if summary.success() => {}
        Ok(_) => process::exit(1),
        Err(e) => {
            print_error(e);
            process::exit(1);
        }
    }
}

/// Builds the session configuration from the arguments.
pub fn build_config(args: &TypecaseArgs) -> Result<HarnessConfig> {
    let mut builder = HarnessConfig::builder()
        .same_process(args.same_process)
        .strategy(args.cache_strategy.into())
        .only_local_stub(args.only_local_stub)
        .base_ini(args.ini_file.clone())
        .base_toml(args.toml_file.clone())
        .project_root(args.project_root.clone())
        .closed_schema(args.closed_schema);
    if let Some(dir) = &args.base_dir {
        builder = builder.base_dir(dir);
    }
    if let Some(checker) = &args.checker {
        builder = builder.checker_executable(resolve_checker(checker)?);
    }
    builder.build()
}

fn resolve_checker(checker: &Path) -> Result<PathBuf> {
    crate::config::find_executable(checker)
        .ok_or_else(|| HarnessError::config(format!("checker executable '{}' is not found", checker.display())))
}

/// Builds the harness with the hooks the arguments name.
pub fn build_harness(args: &TypecaseArgs, registry: &HookRegistry) -> Result<Harness> {
    let facts = args
        .skip_flags
        .iter()
        .fold(SkipFacts::current(), |facts, flag| facts.with_flag(flag.as_str()));
    let mut harness = Harness::new(build_config(args)?).with_skip_facts(facts);
    if let Some(name) = &args.extension_hook {
        harness = harness.with_extension_hook(registry.extension(name)?);
    }
    if let Some(name) = &args.scenario_hooks {
        harness = harness.with_scenario_hooks(registry.scenario_hooks(name)?);
    }
    harness.validate()?;
    Ok(harness)
}

/// One unit of work: a scenario ready to run, or a case that failed to expand.
enum Work {
    Run { document: PathBuf, scenario: Box<Scenario> },
    Done(ScenarioReport),
}

fn collect(args: &TypecaseArgs, config: &HarnessConfig) -> Result<Vec<Work>> {
    let filter = args.filter.as_deref().map(str::to_lowercase);
    let mut work = Vec::new();
    for root in &args.paths {
        for document in discover_documents(root)? {
            for definition in load_document(&document, config.closed_schema)? {
                let scenarios = match template::expand(&definition, config) {
                    Ok(scenarios) => scenarios,
                    Err(err) => {
                        work.push(Work::Done(ScenarioReport::case_error(&definition, err).with_document(&document)));
                        continue;
                    }
                };
                for scenario in scenarios {
                    let selected = filter
                        .as_deref()
                        .map_or(true, |f| scenario.name.to_lowercase().contains(f));
                    if selected {
                        work.push(Work::Run {
                            document: document.clone(),
                            scenario: Box::new(scenario),
                        });
                    }
                }
            }
        }
    }
    Ok(work)
}

/// Runs every unit on `jobs` threads; reports keep collection order.
fn execute(harness: &Harness, work: Vec<Work>, jobs: usize) -> Vec<ScenarioReport> {
    let total = work.len();
    let queue: Vec<Mutex<Option<Work>>> = work.into_iter().map(|w| Mutex::new(Some(w))).collect();
    let results: Vec<Mutex<Option<ScenarioReport>>> = (0..total).map(|_| Mutex::new(None)).collect();
    let next = AtomicUsize::new(0);

    let worker = || loop {
        let index = next.fetch_add(1, Ordering::SeqCst);
        if index >= total {
            break;
        }
        let Some(unit) = queue[index].lock().ok().and_then(|mut slot| slot.take()) else {
            continue;
        };
        let report = match unit {
            Work::Run { document, scenario } => harness.run_scenario(*scenario).with_document(document),
            Work::Done(report) => report,
        };
        if let Ok(mut slot) = results[index].lock() {
            *slot = Some(report);
        }
    };

    std::thread::scope(|scope| {
        for _ in 0..jobs.clamp(1, total.max(1)) {
            scope.spawn(worker);
        }
    });

    results
        .into_iter()
        .filter_map(|slot| slot.into_inner().ok().flatten())
        .collect()
}

/// Runs a whole session and prints the results. Returns the summary.
pub fn run_with(args: &TypecaseArgs, registry: &HookRegistry) -> Result<Summary> {
    let harness = build_harness(args, registry)?;
    let work = collect(args, harness.config())?;
    tracing::info!(scenarios = work.len(), jobs = args.jobs, "collected scenarios");

    let reports = execute(&harness, work, args.jobs);
    let summary = Summary::from_reports(&reports);

    if args.json {
        let json = render_json(&reports).map_err(|e| HarnessError::config(format!("cannot render JSON: {}", e)))?;
        println!("{}", json);
        return Ok(summary);
    }

    let mut reporter = Reporter::stdout(args.color);
    for report in &reports {
        if let Err(e) = reporter.report(report) {
            tracing::warn!(error = %e, "failed to write report");
        }
    }
    if let Err(e) = reporter.summary(&reports) {
        tracing::warn!(error = %e, "failed to write summary");
    }
    Ok(summary)
}
