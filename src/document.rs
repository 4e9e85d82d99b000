//! Scenario document loading and validation.
//!
//! A document is a YAML sequence of case mappings. Validation runs over the raw
//! `serde_yaml::Value` so every violation can name the case and the exact field,
//! in the wording users know from JSON Schema validators.
//!
//! ```yaml
//! - case: reveal_int
//!   main: |
//!     reveal_type(1)  # N: Revealed type is "builtins.int"
//!   files:
//!     - path: helper.py
//!       content: "x = 1"
//!   followups:
//!     - description: drop the helper
//!       files:
//!         - path: helper.py
//!           content: null
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::errors::{HarnessError, Result, ValidationError};
use crate::invoker::check_env_var;
use crate::scenario::{CaseDefinition, FileEntry, Followup, FollowupFile, SkipCondition};
use crate::template::value_to_text;

static CASE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

const CASE_FIELDS: &[&str] = &[
    "case",
    "main",
    "start",
    "files",
    "out",
    "skip",
    "expect_fail",
    "regex",
    "mypy_config",
    "env",
    "disable_cache",
    "parametrized",
    "followups",
    "additional_properties",
];

const FOLLOWUP_FIELDS: &[&str] = &[
    "main",
    "description",
    "skip",
    "files",
    "out",
    "expect_fail",
    "additional_properties",
];

// =============================================================================
// LOADING
// =============================================================================

/// Reads and validates one scenario document.
pub fn load_document(path: &Path, closed_schema: bool) -> Result<Vec<CaseDefinition>> {
    let text = fs::read_to_string(path).map_err(|e| HarnessError::Document {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_document(&text, closed_schema).map_err(|err| match err {
        HarnessError::Document { message, .. } => HarnessError::Document {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}

/// Parses and validates document text. An empty document has no cases.
pub fn parse_document(text: &str, closed_schema: bool) -> Result<Vec<CaseDefinition>> {
    let root: Value = serde_yaml::from_str(text).map_err(|e| HarnessError::Document {
        path: PathBuf::from("<document>"),
        message: e.to_string(),
    })?;
    let items = match root {
        Value::Null => return Ok(Vec::new()),
        Value::Sequence(items) => items,
        other => {
            return Err(HarnessError::Document {
                path: PathBuf::from("<document>"),
                message: format!("test file has to be a YAML list, got {}", type_name(&other)),
            })
        }
    };

    let lines = starting_lines(text);
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let mut case = parse_case(item, idx, closed_schema)?;
            case.starting_lineno = lines.get(idx).copied().unwrap_or(0);
            Ok(case)
        })
        .collect()
}

/// For every top-level sequence item, the 1-based line of its `main:` key, or
/// of the item itself when it has none.
pub fn starting_lines(text: &str) -> Vec<usize> {
    let lines: Vec<&str> = text.lines().collect();
    let is_item = |line: &str| line.trim_start().starts_with("- ") || line.trim_end() == "-";
    let item_indent = lines
        .iter()
        .find(|l| is_item(l) && !l.trim_start().starts_with('#'))
        .map(|l| indent_of(l));
    let Some(item_indent) = item_indent else {
        return Vec::new();
    };

    let starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_item(l) && indent_of(l) == item_indent)
        .map(|(i, _)| i)
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(lines.len());
            let first = lines[start];
            let after_dash = &first[item_indent + 1..];
            let key_indent = item_indent + 1 + indent_of(after_dash);
            let main_line = (start..end).find(|&i| {
                let line = lines[i];
                let (column, rest) = if i == start {
                    (key_indent, after_dash.trim_start())
                } else {
                    (indent_of(line), line.trim_start())
                };
                column == key_indent && rest.starts_with("main:")
            });
            main_line.unwrap_or(start) + 1
        })
        .collect()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

// =============================================================================
// VALIDATION
// =============================================================================

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "array",
        Value::Mapping(_) => "object",
        Value::Tagged(_) => "tagged value",
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => value_to_text(other),
    }
}

struct Checker<'a> {
    case: Option<&'a str>,
}

impl Checker<'_> {
    fn fail(&self, field: impl Into<String>, message: impl Into<String>) -> HarnessError {
        ValidationError::new(self.case, field, message).into()
    }

    fn not_of_type(&self, field: &str, value: &Value, expected: &str) -> HarnessError {
        self.fail(field, format!("{} is not of type '{}'", describe(value), expected))
    }

    fn string(&self, field: &str, value: &Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.not_of_type(field, other, "string")),
        }
    }

    fn opt_string(&self, map: &Mapping, key: &str, prefix: &str) -> Result<Option<String>> {
        map.get(key)
            .map(|v| self.string(&format!("{prefix}{key}"), v))
            .transpose()
    }

    fn opt_bool(&self, map: &Mapping, key: &str, prefix: &str) -> Result<Option<bool>> {
        match map.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.not_of_type(&format!("{prefix}{key}"), other, "boolean")),
        }
    }

    fn sequence<'v>(&self, field: &str, value: &'v Value) -> Result<&'v [Value]> {
        match value {
            Value::Sequence(items) => Ok(items),
            other => Err(self.not_of_type(field, other, "array")),
        }
    }

    fn mapping<'v>(&self, field: &str, value: &'v Value) -> Result<&'v Mapping> {
        match value {
            Value::Mapping(map) => Ok(map),
            other => Err(self.not_of_type(field, other, "object")),
        }
    }

    fn skip(&self, field: &str, value: Option<&Value>) -> Result<SkipCondition> {
        match value {
            None => Ok(SkipCondition::default()),
            Some(Value::Bool(b)) => Ok(SkipCondition::Flag(*b)),
            Some(Value::String(s)) => Ok(SkipCondition::Expression(s.clone())),
            Some(other) => Err(self.fail(
                field,
                format!("{} is not valid under any of the given schemas", describe(other)),
            )),
        }
    }

    /// Splits known keys from the rest; closed schemas reject the rest.
    fn extras(&self, map: &Mapping, known: &[&str], closed: bool, field: &str) -> Result<Mapping> {
        let mut extras = Mapping::new();
        if let Some(Value::Mapping(explicit)) = map.get("additional_properties") {
            extras.extend(explicit.clone());
        }
        let unknown: Vec<(&Value, &Value)> = map
            .iter()
            .filter(|(k, _)| !k.as_str().is_some_and(|k| known.contains(&k)))
            .collect();
        if closed && !unknown.is_empty() {
            let names: Vec<String> = unknown.iter().map(|(k, _)| describe(k)).collect();
            let verb = if names.len() == 1 { "was" } else { "were" };
            return Err(self.fail(
                field,
                format!(
                    "Additional properties are not allowed ({} {} unexpected)",
                    names.join(", "),
                    verb
                ),
            ));
        }
        extras.extend(unknown.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(extras)
    }
}

fn parse_case(item: &Value, idx: usize, closed: bool) -> Result<CaseDefinition> {
    let anonymous = Checker { case: None };
    let map = anonymous.mapping(&format!("[{}]", idx), item)?;

    let case = match map.get("case") {
        Some(value) => anonymous.string("case", value)?,
        None => return Err(anonymous.fail(format!("[{}]", idx), "'case' is a required property")),
    };
    if !CASE_NAME_RE.is_match(&case) {
        return Err(anonymous.fail(
            "case",
            format!("invalid test name '{}', only '[a-zA-Z0-9_]' is allowed", case),
        ));
    }

    let checker = Checker { case: Some(&case) };
    let main = match map.get("main") {
        Some(value) => checker.string("main", value)?,
        None => return Err(checker.fail("main", "'main' is a required property")),
    };

    let mut definition = CaseDefinition::new(case.clone(), main);
    definition.additional_properties = checker.extras(map, CASE_FIELDS, closed, &format!("[{}]", idx))?;
    definition.parsed_test_data = map.clone();

    if let Some(start) = map.get("start") {
        definition.start = match start {
            Value::String(s) => vec![s.clone()],
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| checker.string(&format!("start[{}]", i), v))
                .collect::<Result<_>>()?,
            other => return Err(checker.not_of_type("start", other, "array")),
        };
    }

    if let Some(files) = map.get("files") {
        definition.files = parse_files(&checker, checker.sequence("files", files)?)?;
    }
    definition.out = checker.opt_string(map, "out", "")?.unwrap_or_default();
    definition.mypy_config = checker.opt_string(map, "mypy_config", "")?.unwrap_or_default();
    definition.skip = checker.skip("skip", map.get("skip"))?;
    definition.regex = checker.opt_bool(map, "regex", "")?.unwrap_or(false);
    definition.expect_fail = checker.opt_bool(map, "expect_fail", "")?.unwrap_or(false);
    definition.disable_cache = checker.opt_bool(map, "disable_cache", "")?.unwrap_or(false);

    if let Some(env) = map.get("env") {
        definition.env = parse_env(&checker, checker.sequence("env", env)?)?;
    }

    if let Some(params) = map.get("parametrized") {
        definition.parametrized = checker
            .sequence("parametrized", params)?
            .iter()
            .enumerate()
            .map(|(i, v)| checker.mapping(&format!("parametrized[{}]", i), v).cloned())
            .collect::<Result<_>>()?;
    }

    if let Some(followups) = map.get("followups") {
        definition.followups = checker
            .sequence("followups", followups)?
            .iter()
            .enumerate()
            .map(|(i, v)| parse_followup(&checker, i, v, closed))
            .collect::<Result<_>>()?;
    }

    Ok(definition)
}

fn parse_files(checker: &Checker<'_>, files: &[Value]) -> Result<Vec<FileEntry>> {
    let mut seen = Vec::with_capacity(files.len());
    files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let prefix = format!("files[{}].", i);
            let map = checker.mapping(&format!("files[{}]", i), file)?;
            let path = match map.get("path") {
                Some(v) => checker.string(&format!("{prefix}path"), v)?,
                None => return Err(checker.fail(format!("files[{}]", i), "'path' is a required property")),
            };
            if seen.contains(&path) {
                return Err(checker.fail(format!("{prefix}path"), format!("duplicate file path '{}'", path)));
            }
            seen.push(path.clone());
            let content = checker.opt_string(map, "content", &prefix)?.unwrap_or_default();
            Ok(FileEntry::new(path, content))
        })
        .collect()
}

/// `NAME=VALUE` strings; a missing `=` gives an empty value.
fn parse_env(checker: &Checker<'_>, entries: &[Value]) -> Result<BTreeMap<String, String>> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let field = format!("env[{}]", i);
            let text = checker.string(&field, entry)?;
            let (name, value) = text.split_once('=').unwrap_or((text.as_str(), ""));
            check_env_var(name, value).map_err(|message| checker.fail(field, message))?;
            Ok((name.to_string(), value.to_string()))
        })
        .collect()
}

fn parse_followup(checker: &Checker<'_>, idx: usize, value: &Value, closed: bool) -> Result<Followup> {
    let field = format!("followups[{}]", idx);
    let prefix = format!("{field}.");
    let map = checker.mapping(&field, value)?;

    let mut followup = Followup {
        main: checker.opt_string(map, "main", &prefix)?,
        description: checker.opt_string(map, "description", &prefix)?.unwrap_or_default(),
        skip: checker.skip(&format!("{prefix}skip"), map.get("skip"))?,
        out: checker.opt_string(map, "out", &prefix)?,
        expect_fail: checker.opt_bool(map, "expect_fail", &prefix)?,
        additional_properties: checker.extras(map, FOLLOWUP_FIELDS, closed, &field)?,
        files: Vec::new(),
    };

    if let Some(files) = map.get("files") {
        let files = checker.sequence(&format!("{prefix}files"), files)?;
        for (i, file) in files.iter().enumerate() {
            let file_field = format!("{prefix}files[{}]", i);
            let file_map = checker.mapping(&file_field, file)?;
            let path = match file_map.get("path") {
                Some(v) => checker.string(&format!("{file_field}.path"), v)?,
                None => return Err(checker.fail(file_field, "'path' is a required property")),
            };
            let content = match file_map.get("content") {
                Some(Value::Null) => None,
                Some(v) => Some(checker.string(&format!("{file_field}.content"), v)?),
                None => Some(String::new()),
            };
            followup.files.push(FollowupFile { path, content });
        }
    }

    Ok(followup)
}
