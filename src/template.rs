//! Parametrization: `{{ key }}` rendering and case expansion.
//!
//! Rendering is purely textual and happens once, before anything runs. The
//! runner never sees a template.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_yaml::{Mapping, Value};

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};
use crate::matcher;
use crate::scenario::{CaseDefinition, FileEntry, Followup, Scenario};

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Renders a YAML scalar the way the document's authors expect to read it.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Tagged(tagged) => value_to_text(&tagged.value),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Substitutes `{{ key }}` placeholders. Unknown keys render as empty text.
pub fn render(template: &str, params: &[(String, String)]) -> String {
    if params.is_empty() && !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            params
                .iter()
                .find(|(key, _)| key == &caps[1])
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        })
        .into_owned()
}

fn key_set(entry: &Mapping) -> Vec<String> {
    let mut keys: Vec<String> = entry
        .keys()
        .map(value_to_text)
        .filter(|k| !k.starts_with("__"))
        .collect();
    keys.sort();
    keys
}

/// Turns raw `parametrized` entries into rendered bindings, one list per entry.
///
/// Every entry must carry the same key set.
pub fn parse_parametrized(case: &str, entries: &[Mapping]) -> Result<Vec<Vec<(String, String)>>> {
    let Some(first) = entries.first() else {
        return Ok(vec![Vec::new()]);
    };
    let expected_keys = key_set(first);
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let keys = key_set(entry);
            if keys != expected_keys {
                return Err(HarnessError::validation(
                    Some(case),
                    format!("parametrized[{}]", idx),
                    format!(
                        "all parametrized entries must have the same keys; first entry has {} but {} was spotted at position {}",
                        expected_keys.join(", "),
                        keys.join(", "),
                        idx
                    ),
                ));
            }
            Ok(entry
                .iter()
                .map(|(k, v)| (value_to_text(k), value_to_text(v)))
                .filter(|(k, _)| !k.starts_with("__"))
                .collect())
        })
        .collect()
}

/// The unique scenario name for a set of bindings.
pub fn scenario_name(case: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return case.to_string();
    }
    let suffix: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}[{}]", case, suffix.join(","))
}

/// Expands a case definition into concrete scenarios, one per parameter entry.
pub fn expand(definition: &CaseDefinition, config: &HarnessConfig) -> Result<Vec<Scenario>> {
    let bindings = parse_parametrized(&definition.case, &definition.parametrized)?;
    Ok(bindings
        .into_iter()
        .map(|params| instantiate(definition, params, config))
        .collect())
}

fn instantiate(definition: &CaseDefinition, params: Vec<(String, String)>, config: &HarnessConfig) -> Scenario {
    // A declared file at the entry path is written last, so its content is what gets checked.
    let main = match definition.files.iter().find(|f| f.path == config.entry_file) {
        Some(declared) => declared.clone(),
        None => FileEntry::new(config.entry_file.clone(), render(&definition.main, &params)),
    };
    let mut files = Vec::with_capacity(definition.files.len() + 1);
    files.push(main);
    files.extend(
        definition
            .files
            .iter()
            .filter(|f| f.path != config.entry_file)
            .cloned(),
    );

    let out = render(&definition.out, &params);
    let expected_output = matcher::build_expected(
        files.iter().map(|f| (f.path.as_str(), f.content.as_str())),
        &out,
        &config.source_suffix,
        definition.regex,
    );

    let followups = definition
        .followups
        .iter()
        .map(|followup| Followup {
            main: followup.main.as_deref().map(|m| render(m, &params)),
            out: followup.out.as_deref().map(|o| render(o, &params)),
            ..followup.clone()
        })
        .collect();

    let start = if definition.start.is_empty() {
        vec![config.entry_file.clone()]
    } else {
        definition.start.clone()
    };

    Scenario {
        name: scenario_name(&definition.case, &params),
        case: definition.case.clone(),
        mypy_config: render(&definition.mypy_config, &params),
        start,
        files,
        env: definition.env.clone(),
        out,
        regex: definition.regex,
        expect_fail: definition.expect_fail,
        disable_cache: definition.disable_cache,
        skip: definition.skip.clone(),
        followups,
        expected_output,
        starting_lineno: definition.starting_lineno,
        additional_properties: definition.additional_properties.clone(),
        parsed_test_data: definition.parsed_test_data.clone(),
        params,
    }
}
