//! Extension points around scenario execution.
//!
//! - An [`ExtensionHook`] rewrites a scenario in place before anything is
//!   written to its workspace.
//! - [`ScenarioHooks::before_run`] runs before every checker step (initial and
//!   followups) and may adjust the step's [`RunOptions`] or add files.
//!
//! Hooks are looked up by name in a [`HookRegistry`]; there is no dynamic loading.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_yaml::Mapping;

use crate::errors::{HarnessError, Result};
use crate::matcher::OutputMatcher;
use crate::scenario::{FileEntry, Scenario};
use crate::template::value_to_text;
use crate::workspace::{RunLog, Workspace};

/// Rewrites a scenario before execution.
pub trait ExtensionHook: Send + Sync {
    fn apply(&self, scenario: &mut Scenario);
}

impl<F> ExtensionHook for F
where
    F: Fn(&mut Scenario) + Send + Sync,
{
    fn apply(&self, scenario: &mut Scenario) {
        self(scenario)
    }
}

/// Options of one checker step, passed through [`ScenarioHooks::before_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub start: Vec<String>,
    pub expect_fail: bool,
    pub expected_output: Vec<OutputMatcher>,
}

/// What a scenario hook can see and touch for one step.
pub struct HookContext<'a> {
    pub scenario: &'a Scenario,
    pub workspace: &'a Workspace,
    pub config_file: &'a Path,
    /// The step's additional properties: the case's for the initial run, the
    /// followup's afterwards.
    pub additional_properties: &'a Mapping,
    pub log: &'a mut RunLog,
}

impl HookContext<'_> {
    /// Writes an extra file into the workspace, recording it in the run log.
    pub fn make_file(&mut self, file: &FileEntry) -> Result<()> {
        self.workspace.make_file(file, self.log)
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.additional_properties.get(key).map(value_to_text)
    }
}

/// Per-step scenario hooks. The default implementation changes nothing.
pub trait ScenarioHooks: Send + Sync {
    fn before_run(&self, _ctx: &mut HookContext<'_>, options: RunOptions) -> Result<RunOptions> {
        Ok(options)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ScenarioHooks for NoopHooks {}

// =============================================================================
// BUILT-IN HOOKS
// =============================================================================

/// Replaces the entry file with `reveal_type(<expr>)` when the case carries a
/// `reveal_type: <expr>` key.
pub fn reveal_type_hook(scenario: &mut Scenario) {
    let Some(expr) = scenario.parsed_test_data.get("reveal_type").map(value_to_text) else {
        return;
    };
    if expr.is_empty() {
        return;
    }
    for file in scenario.files.iter_mut().filter(|f| f.path.ends_with("main.py")) {
        file.content = format!("reveal_type({})", expr);
    }
}

/// Writes `stuff.py` revealing the `desired_val` property when a step starts
/// from that file alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesiredValueHooks;

impl ScenarioHooks for DesiredValueHooks {
    fn before_run(&self, ctx: &mut HookContext<'_>, options: RunOptions) -> Result<RunOptions> {
        if options.start == ["stuff.py"] {
            if let Some(value) = ctx.property("desired_val") {
                ctx.make_file(&FileEntry::new("stuff.py", format!("reveal_type({})", value)))?;
            }
        }
        Ok(options)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Named hooks available to the CLI.
#[derive(Clone, Default)]
pub struct HookRegistry {
    extensions: BTreeMap<String, Arc<dyn ExtensionHook>>,
    scenario_hooks: BTreeMap<String, Arc<dyn ScenarioHooks>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field("scenario_hooks", &self.scenario_hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HookRegistry {
    /// A registry holding the stock hooks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register_extension("reveal_type", reveal_type_hook);
        registry.register_scenario_hooks("default", NoopHooks);
        registry.register_scenario_hooks("desired_val", DesiredValueHooks);
        registry
    }

    pub fn register_extension(&mut self, name: impl Into<String>, hook: impl ExtensionHook + 'static) {
        self.extensions.insert(name.into(), Arc::new(hook));
    }

    pub fn register_scenario_hooks(&mut self, name: impl Into<String>, hooks: impl ScenarioHooks + 'static) {
        self.scenario_hooks.insert(name.into(), Arc::new(hooks));
    }

    pub fn extension(&self, name: &str) -> Result<Arc<dyn ExtensionHook>> {
        self.extensions.get(name).cloned().ok_or_else(|| HarnessError::UnknownHook {
            kind: "extension",
            name: name.to_string(),
        })
    }

    pub fn scenario_hooks(&self, name: &str) -> Result<Arc<dyn ScenarioHooks>> {
        self.scenario_hooks.get(name).cloned().ok_or_else(|| HarnessError::UnknownHook {
            kind: "scenario",
            name: name.to_string(),
        })
    }
}
