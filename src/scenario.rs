//! Scenario data model.
//!
//! A [`CaseDefinition`] is one validated entry of a scenario document, possibly a
//! parametrized template. [`crate::template::expand`] turns it into one or more
//! concrete [`Scenario`] values, which are what the runner executes.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_yaml::Mapping;

use crate::matcher::OutputMatcher;

/// A file written into the workspace before the first run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: String,
    /// May be empty; an empty file is still created.
    pub content: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A file mutation declared by a followup. `None` content deletes the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowupFile {
    pub path: String,
    pub content: Option<String>,
}

/// A `skip:` value: either a literal flag or an expression over [`crate::skip::SkipFacts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipCondition {
    Flag(bool),
    Expression(String),
}

impl Default for SkipCondition {
    fn default() -> Self {
        SkipCondition::Flag(false)
    }
}

/// A mutation-and-rerun step executed after the initial run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Followup {
    /// New entry source; `None` leaves the entry file untouched.
    pub main: Option<String>,
    pub description: String,
    pub skip: SkipCondition,
    pub files: Vec<FollowupFile>,
    /// New `out:` block; `None` reuses the previous step's.
    pub out: Option<String>,
    /// New `expect_fail`; `None` reuses the previous step's.
    pub expect_fail: Option<bool>,
    #[serde(skip)]
    pub additional_properties: Mapping,
}

/// One validated case of a scenario document, before parametrization.
#[derive(Debug, Clone)]
pub struct CaseDefinition {
    pub case: String,
    pub main: String,
    pub files: Vec<FileEntry>,
    pub followups: Vec<Followup>,
    /// Line of the case's `main:` key in the document (1-based, 0 if unknown).
    pub starting_lineno: usize,
    pub env: BTreeMap<String, String>,
    pub out: String,
    pub start: Vec<String>,
    pub skip: SkipCondition,
    pub regex: bool,
    pub mypy_config: String,
    pub expect_fail: bool,
    pub disable_cache: bool,
    /// Raw parameter entries; empty means "not parametrized".
    pub parametrized: Vec<Mapping>,
    /// Keys the document format does not know about, kept for hooks.
    pub additional_properties: Mapping,
    /// The whole mapping as it appeared in the document.
    pub parsed_test_data: Mapping,
}

impl CaseDefinition {
    /// A minimal definition, mostly useful for building cases in code.
    pub fn new(case: impl Into<String>, main: impl Into<String>) -> Self {
        Self {
            case: case.into(),
            main: main.into(),
            files: Vec::new(),
            followups: Vec::new(),
            starting_lineno: 0,
            env: BTreeMap::new(),
            out: String::new(),
            start: Vec::new(),
            skip: SkipCondition::default(),
            regex: false,
            mypy_config: String::new(),
            expect_fail: false,
            disable_cache: false,
            parametrized: Vec::new(),
            additional_properties: Mapping::new(),
            parsed_test_data: Mapping::new(),
        }
    }
}

/// A fully resolved scenario, ready to run.
///
/// This is also the item handed to extension hooks, which may rewrite any of it
/// in place before execution.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    /// Unique name: the case name plus a `[k=v,...]` suffix when parametrized.
    pub name: String,
    pub case: String,
    /// Parameter bindings, rendered to text, in declaration order.
    pub params: Vec<(String, String)>,
    /// Entry points passed to the checker, relative to the workspace.
    pub start: Vec<String>,
    /// Files to materialize; the rendered entry file is always first.
    pub files: Vec<FileEntry>,
    /// Inline checker config, rendered.
    pub mypy_config: String,
    pub env: BTreeMap<String, String>,
    /// The `out:` block, rendered.
    pub out: String,
    pub regex: bool,
    pub expect_fail: bool,
    pub disable_cache: bool,
    pub skip: SkipCondition,
    /// Followups with their entry sources already rendered.
    pub followups: Vec<Followup>,
    pub expected_output: Vec<OutputMatcher>,
    pub starting_lineno: usize,
    #[serde(skip)]
    pub additional_properties: Mapping,
    #[serde(skip)]
    pub parsed_test_data: Mapping,
}

impl Scenario {
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn file_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        self.files.iter_mut().find(|f| f.path == path)
    }
}
