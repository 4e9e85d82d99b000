//! Scenario execution.
//!
//! A [`Harness`] holds everything that lives for a whole session (configuration,
//! the shared cache, the executor, hooks, the skip evaluator) and runs scenarios
//! one by one or from several threads at once. Each scenario gets its own
//! workspace, which is removed when the scenario ends.
//!
//! Execution of one scenario:
//!
//! 1. evaluate `skip`;
//! 2. materialize the workspace, apply the extension hook, write the files;
//! 3. run the initial step: write the checker config, call
//!    [`ScenarioHooks::before_run`], run the checker under the cache strategy,
//!    compare output;
//! 4. for each followup: mutate the workspace, recompute expectations from the
//!    accumulated files and the current `out`, and run another step.
//!
//! The first failing step ends the scenario.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_yaml::Mapping;

use crate::cache::{CacheController, SharedCache};
use crate::checker_config::prepare_config_file;
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};
use crate::hooks::{ExtensionHook, HookContext, NoopHooks, RunOptions, ScenarioHooks};
use crate::invoker::{checker_args, CheckerEntry, Executor, InProcessExecutor, Invocation, RunResult, SubprocessExecutor};
use crate::matcher::{self, MatchFailure};
use crate::scenario::{CaseDefinition, FileEntry, FollowupFile, Scenario, SkipCondition};
use crate::skip::{DefaultSkipEvaluator, SkipEvaluator, SkipFacts};
use crate::template;
use crate::workspace::{RunLog, Workspace};

// =============================================================================
// OUTCOMES
// =============================================================================

/// Which step of a scenario failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Initial,
    /// 1-based followup position.
    Followup { index: usize, description: String },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Initial => f.write_str("initial run"),
            Step::Followup { index, description } if description.is_empty() => {
                write!(f, "followup {}", index)
            }
            Step::Followup { index, description } => write!(f, "followup {}: {}", index, description),
        }
    }
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Output did not match the expectations.
    Mismatch(MatchFailure),
    /// `expect_fail` was set but the output matched.
    UnexpectedPass,
    /// The checker crashed or could not be started. Never masked by `expect_fail`.
    Invocation {
        message: String,
        exit_code: Option<i32>,
        output: String,
    },
    /// Any other harness error (workspace, config, hooks, skip expressions).
    Error { message: String },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Mismatch(failure) => write!(f, "{}", failure),
            FailureKind::UnexpectedPass => f.write_str("Expected failure, but test passed"),
            FailureKind::Invocation { message, exit_code, output } => {
                match exit_code {
                    Some(code) => writeln!(f, "{} (exit code {})", message, code)?,
                    None => writeln!(f, "{}", message)?,
                }
                f.write_str(output.trim_end())
            }
            FailureKind::Error { message } => f.write_str(message),
        }
    }
}

impl From<HarnessError> for FailureKind {
    fn from(err: HarnessError) -> Self {
        match err {
            HarnessError::Invocation {
                message,
                exit_code,
                output,
            } => FailureKind::Invocation {
                message,
                exit_code,
                output,
            },
            other => FailureKind::Error {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    #[serde(flatten)]
    pub step: Step,
    pub failure: FailureKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed(StepFailure),
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }
}

/// The result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub case: String,
    /// Document the case came from, when known.
    pub document: Option<PathBuf>,
    pub starting_lineno: usize,
    pub outcome: Outcome,
    pub run_log: RunLog,
    pub duration_ms: u64,
}

impl ScenarioReport {
    /// Document line to point at: the case's `main:` line plus the line of
    /// the first mismatching expectation.
    pub fn failure_line(&self) -> Option<usize> {
        match &self.outcome {
            Outcome::Failed(StepFailure {
                failure: FailureKind::Mismatch(mismatch),
                ..
            }) => Some(self.starting_lineno + mismatch.lineno),
            Outcome::Failed(_) => Some(self.starting_lineno),
            _ => None,
        }
    }

    pub fn with_document(mut self, document: impl Into<PathBuf>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// A failed report for a case that never produced scenarios.
    pub fn case_error(definition: &CaseDefinition, err: HarnessError) -> Self {
        Self {
            name: definition.case.clone(),
            case: definition.case.clone(),
            document: None,
            starting_lineno: definition.starting_lineno,
            outcome: Outcome::Failed(StepFailure {
                step: Step::Initial,
                failure: err.into(),
            }),
            run_log: RunLog::default(),
            duration_ms: 0,
        }
    }
}

// =============================================================================
// STEP ERRORS
// =============================================================================

enum StepError {
    Harness(HarnessError),
    Mismatch(MatchFailure),
    UnexpectedPass,
}

impl From<HarnessError> for StepError {
    fn from(err: HarnessError) -> Self {
        StepError::Harness(err)
    }
}

impl StepError {
    fn at(self, step: Step) -> StepFailure {
        let failure = match self {
            StepError::Harness(err) => err.into(),
            StepError::Mismatch(mismatch) => FailureKind::Mismatch(mismatch),
            StepError::UnexpectedPass => FailureKind::UnexpectedPass,
        };
        StepFailure { step, failure }
    }
}

fn skip_reason(condition: &SkipCondition) -> String {
    match condition {
        SkipCondition::Flag(_) => "Marked 'skip'".to_string(),
        SkipCondition::Expression(expr) => format!("Skip condition holds: {}", expr),
    }
}

/// Applies one followup mutation to the accumulated file set.
fn accumulate(files: &mut Vec<FileEntry>, change: &FollowupFile) {
    match &change.content {
        None => {
            let nested = format!("{}/", change.path.trim_end_matches('/'));
            files.retain(|f| f.path != change.path && !f.path.starts_with(&nested));
        }
        Some(content) => match files.iter_mut().find(|f| f.path == change.path) {
            Some(existing) => existing.content = content.clone(),
            None => files.push(FileEntry::new(change.path.clone(), content.clone())),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutorKind {
    Subprocess,
    InProcess,
    Custom,
}

// =============================================================================
// HARNESS
// =============================================================================

/// Session state shared by every scenario.
pub struct Harness {
    config: HarnessConfig,
    shared_cache: SharedCache,
    executor: Arc<dyn Executor>,
    executor_kind: ExecutorKind,
    extension_hook: Option<Arc<dyn ExtensionHook>>,
    scenario_hooks: Arc<dyn ScenarioHooks>,
    skip_evaluator: Arc<dyn SkipEvaluator>,
    skip_facts: SkipFacts,
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .field("shared_cache", &self.shared_cache)
            .field("executor_kind", &self.executor_kind)
            .field("extension_hook", &self.extension_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Harness {
    /// A harness running the configured checker executable as a subprocess.
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            shared_cache: SharedCache::new(config.cache_dir.clone()),
            executor: Arc::new(SubprocessExecutor::from_config(&config)),
            executor_kind: ExecutorKind::Subprocess,
            extension_hook: None,
            scenario_hooks: Arc::new(NoopHooks),
            skip_evaluator: Arc::new(DefaultSkipEvaluator),
            skip_facts: SkipFacts::current(),
            config,
        }
    }

    /// Runs the checker through `entry` inside this process.
    pub fn with_checker_entry(mut self, entry: CheckerEntry) -> Self {
        self.executor = Arc::new(InProcessExecutor::new(entry));
        self.executor_kind = ExecutorKind::InProcess;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self.executor_kind = ExecutorKind::Custom;
        self
    }

    pub fn with_extension_hook(mut self, hook: Arc<dyn ExtensionHook>) -> Self {
        self.extension_hook = Some(hook);
        self
    }

    pub fn with_scenario_hooks(mut self, hooks: Arc<dyn ScenarioHooks>) -> Self {
        self.scenario_hooks = hooks;
        self
    }

    pub fn with_skip_evaluator(mut self, evaluator: Arc<dyn SkipEvaluator>) -> Self {
        self.skip_evaluator = evaluator;
        self
    }

    pub fn with_skip_facts(mut self, facts: SkipFacts) -> Self {
        self.skip_facts = facts;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn shared_cache(&self) -> &SharedCache {
        &self.shared_cache
    }

    /// Same-process mode needs an in-process entry (or a custom executor).
    pub fn validate(&self) -> Result<()> {
        if self.config.same_process && self.executor_kind == ExecutorKind::Subprocess {
            return Err(HarnessError::config(
                "same-process execution requires a registered in-process checker entry",
            ));
        }
        Ok(())
    }

    /// Expands and runs every scenario of a case.
    pub fn run_case(&self, definition: &CaseDefinition) -> Result<Vec<ScenarioReport>> {
        let scenarios = template::expand(definition, &self.config)?;
        Ok(scenarios.into_iter().map(|s| self.run_scenario(s)).collect())
    }

    /// Runs one concrete scenario to a verdict.
    pub fn run_scenario(&self, mut scenario: Scenario) -> ScenarioReport {
        let span = tracing::info_span!("scenario", name = %scenario.name);
        let _entered = span.enter();
        let started = Instant::now();
        let mut log = RunLog::default();

        let outcome = match self.skip_evaluator.should_skip(&scenario.skip, &self.skip_facts) {
            Ok(true) => Outcome::Skipped {
                reason: skip_reason(&scenario.skip),
            },
            Ok(false) => match self.execute(&mut scenario, &mut log) {
                Ok(()) => Outcome::Passed,
                Err(failure) => Outcome::Failed(failure),
            },
            Err(err) => Outcome::Failed(StepError::from(err).at(Step::Initial)),
        };

        match &outcome {
            Outcome::Passed => tracing::info!("passed"),
            Outcome::Skipped { reason } => tracing::info!(%reason, "skipped"),
            Outcome::Failed(failure) => tracing::info!(step = %failure.step, "failed"),
        }

        ScenarioReport {
            name: scenario.name,
            case: scenario.case,
            document: None,
            starting_lineno: scenario.starting_lineno,
            outcome,
            run_log: log,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn execute(&self, scenario: &mut Scenario, log: &mut RunLog) -> std::result::Result<(), StepFailure> {
        let initial = |err: HarnessError| StepError::from(err).at(Step::Initial);
        self.validate().map_err(initial)?;

        let workspace = Workspace::materialize(&self.config.base_dir).map_err(initial)?;
        *log = RunLog::new(workspace.path());

        let result = self.run_steps(&workspace, scenario, log);
        if let Err(err) = workspace.close() {
            tracing::warn!(error = %err, "failed to remove workspace");
        }
        result
    }

    fn run_steps(
        &self,
        workspace: &Workspace,
        scenario: &mut Scenario,
        log: &mut RunLog,
    ) -> std::result::Result<(), StepFailure> {
        let initial = |err: HarnessError| StepError::from(err).at(Step::Initial);
        if let Some(hook) = &self.extension_hook {
            hook.apply(scenario);
        }
        let scenario: &Scenario = scenario;

        let mut files = Vec::with_capacity(scenario.files.len());
        for file in &scenario.files {
            workspace.make_file(file, log).map_err(initial)?;
            files.push(file.clone());
        }

        let mut out = scenario.out.clone();
        let mut expect_fail = scenario.expect_fail;
        let options = RunOptions {
            start: scenario.start.clone(),
            expect_fail,
            expected_output: scenario.expected_output.clone(),
        };
        self.run_step(workspace, scenario, options, &scenario.additional_properties, log)
            .map_err(|e| e.at(Step::Initial))?;

        for (position, followup) in scenario.followups.iter().enumerate() {
            let step = Step::Followup {
                index: position + 1,
                description: followup.description.clone(),
            };
            let skip = self
                .skip_evaluator
                .should_skip(&followup.skip, &self.skip_facts)
                .map_err(|e| StepError::from(e).at(step.clone()))?;
            if skip {
                log.push(format!("Skipping followup: {}: {}", position, followup.description));
                continue;
            }
            log.push(format!("Running followup: {}: {}", position, followup.description));

            let mut changes = Vec::with_capacity(followup.files.len() + 1);
            if let Some(main) = &followup.main {
                changes.push(FollowupFile {
                    path: self.config.entry_file.clone(),
                    content: Some(main.clone()),
                });
            }
            changes.extend(followup.files.iter().cloned());
            for change in &changes {
                workspace
                    .apply_followup_file(change, log)
                    .map_err(|e| StepError::from(e).at(step.clone()))?;
                accumulate(&mut files, change);
            }

            if let Some(new_out) = &followup.out {
                out = new_out.clone();
            }
            if let Some(new_expect_fail) = followup.expect_fail {
                expect_fail = new_expect_fail;
            }
            let options = RunOptions {
                start: scenario.start.clone(),
                expect_fail,
                expected_output: matcher::build_expected(
                    files.iter().map(|f| (f.path.as_str(), f.content.as_str())),
                    &out,
                    &self.config.source_suffix,
                    scenario.regex,
                ),
            };
            self.run_step(workspace, scenario, options, &followup.additional_properties, log)
                .map_err(|e| e.at(step))?;
        }

        Ok(())
    }

    fn run_step(
        &self,
        workspace: &Workspace,
        scenario: &Scenario,
        options: RunOptions,
        additional_properties: &Mapping,
        log: &mut RunLog,
    ) -> std::result::Result<(), StepError> {
        let config_file = prepare_config_file(workspace.path(), &self.config, &scenario.mypy_config)?;

        let options = {
            let mut ctx = HookContext {
                scenario,
                workspace,
                config_file: &config_file,
                additional_properties,
                log: &mut *log,
            };
            self.scenario_hooks.before_run(&mut ctx, options)?
        };

        let controller = CacheController::new(self.config.strategy, &self.shared_cache);
        controller.run_step(workspace.path(), scenario.disable_cache, |flags, attempt| {
            let args = checker_args(&self.config, &config_file, flags, &options.start);
            if attempt == 0 {
                log.command(&self.executor.display(&args));
            } else {
                log.command("ran again");
            }
            tracing::debug!(attempt, args = ?args, "invoking checker");

            let result = self.executor.execute(&Invocation {
                workspace: workspace.path(),
                args: &args,
                env: &scenario.env,
            })?;
            tracing::debug!(exit_code = result.exit_code, "checker finished");
            log.result(result.exit_code, &result.stdout, &result.stderr);
            self.check(&result, workspace, &options)
        })
    }

    fn check(&self, result: &RunResult, workspace: &Workspace, options: &RunOptions) -> std::result::Result<(), StepError> {
        result.ensure_completed()?;
        let actual = matcher::normalize_output(&result.output(), workspace.path(), &self.config.source_suffix);
        match (matcher::check(&options.expected_output, &actual), options.expect_fail) {
            (Ok(()), false) | (Err(_), true) => Ok(()),
            (Ok(()), true) => Err(StepError::UnexpectedPass),
            (Err(mismatch), false) => Err(StepError::Mismatch(mismatch)),
        }
    }
}
