//! Typecase: a declarative scenario harness for static type checkers.
//!
//! Scenarios are described in YAML documents. Each one is materialized into a
//! temporary workspace, the checker runs there under one of three incremental
//! cache strategies, and its diagnostics are compared with expectations written
//! as `# E:`/`# N:` annotations or as an `out:` block. Followups mutate the
//! workspace and run the checker again.
//!
//! ```rust,no_run
//! use typecase::{document, HarnessConfig, Harness};
//!
//! let config = HarnessConfig::builder().build()?;
//! let harness = Harness::new(config);
//! for case in document::load_document("tests/test-basics.yml".as_ref(), false)? {
//!     for report in harness.run_case(&case)? {
//!         println!("{}: {:?}", report.name, report.outcome);
//!     }
//! }
//! # Ok::<(), typecase::HarnessError>(())
//! ```

pub mod cache;
pub mod checker_config;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod document;
pub mod errors;
pub mod hooks;
pub mod invoker;
pub mod logging;
pub mod matcher;
pub mod runner;
pub mod scenario;
pub mod skip;
pub mod template;
pub mod workspace;

pub use crate::config::{CacheStrategy, HarnessConfig};
pub use crate::errors::{HarnessError, Result, ValidationError};
pub use crate::hooks::{ExtensionHook, HookRegistry, RunOptions, ScenarioHooks};
pub use crate::invoker::{CheckerEntry, Executor, RunResult};
pub use crate::matcher::{MatchFailure, OutputMatcher, Severity};
pub use crate::runner::{FailureKind, Harness, Outcome, ScenarioReport};
pub use crate::scenario::{CaseDefinition, Scenario};
