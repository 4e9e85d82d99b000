//! Typecase Error Handling
//!
//! Every failure the harness can hit before or around a checker invocation is a
//! [`HarnessError`]. Each variant is a `miette` diagnostic with a stable code so the
//! binary can render it with help text, and tests can match on the variant.
//!
//! Diagnostic mismatches are *not* errors: they are reported as
//! [`crate::matcher::MatchFailure`] values so a single bad scenario never stops the
//! rest of a session.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// A schema violation in a scenario document.
///
/// `case` is the case name when known; `field` is a dotted path such as
/// `followups[1].files[0].content`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{location}: {message}")]
pub struct ValidationError {
    pub case: Option<String>,
    pub field: String,
    pub message: String,
    location: String,
}

impl ValidationError {
    pub fn new(case: Option<&str>, field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let location = match case {
            Some(case) => format!("case '{}', field '{}'", case, field),
            None => format!("field '{}'", field),
        };
        Self {
            case: case.map(str::to_string),
            field,
            message: message.into(),
            location,
        }
    }
}

/// All errors surfaced by the harness.
#[derive(Debug, Error, Diagnostic)]
pub enum HarnessError {
    #[error("invalid scenario document: {0}")]
    #[diagnostic(
        code(typecase::validation),
        help("check the offending field against the scenario document format")
    )]
    Validation(#[from] ValidationError),

    #[error("conflicting checker configuration: {message}")]
    #[diagnostic(
        code(typecase::config_conflict),
        help("pass either an ini file or a toml file, not both")
    )]
    ConfigConflict { message: String },

    #[error("invalid harness configuration: {message}")]
    #[diagnostic(code(typecase::config))]
    Config { message: String },

    #[error("checker invocation failed: {message}")]
    #[diagnostic(
        code(typecase::invocation),
        help("this is a tool-level failure and is never masked by `expect_fail`")
    )]
    Invocation {
        message: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("workspace error at {}: {source}", path.display())]
    #[diagnostic(code(typecase::workspace))]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("testing base directory {} must exist and be writable", path.display())]
    #[diagnostic(code(typecase::base_dir))]
    BaseDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load {}: {message}", path.display())]
    #[diagnostic(code(typecase::document))]
    Document { path: PathBuf, message: String },

    #[error("cannot evaluate skip condition '{expression}': {message}")]
    #[diagnostic(
        code(typecase::skip),
        help("supported forms: True, False, platform == 'x', env.NAME, flag.NAME, not, and, or")
    )]
    Skip { expression: String, message: String },

    #[error("unknown {kind} hook '{name}'")]
    #[diagnostic(code(typecase::hook))]
    UnknownHook { kind: &'static str, name: String },

    #[error("invalid checker config text: {message}")]
    #[diagnostic(code(typecase::checker_config))]
    CheckerConfig { message: String },
}

impl HarnessError {
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }

    pub fn validation(case: Option<&str>, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(case, field, message))
    }

    pub fn config_conflict(message: impl Into<String>) -> Self {
        Self::ConfigConflict {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for failures that `expect_fail` must never hide.
    pub fn is_invocation(&self) -> bool {
        matches!(self, Self::Invocation { .. })
    }
}

/// Prints a harness error with full miette diagnostics.
pub fn print_error(error: HarnessError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}
