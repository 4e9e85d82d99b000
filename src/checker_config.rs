//! Effective checker configuration for one workspace.
//!
//! The session may name a base ini file or a base `pyproject.toml`. A case's
//! inline `mypy_config` text is merged on top of it, key by key, and the result
//! is written into the workspace.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};

pub const INI_FILE_NAME: &str = "mypy.ini";
pub const TOML_FILE_NAME: &str = "pyproject.toml";

const INI_SECTION: &str = "[mypy]";
const TOML_SECTION: &str = "[tool.mypy]";

fn config_error(message: impl Into<String>) -> HarnessError {
    HarnessError::CheckerConfig {
        message: message.into(),
    }
}

// =============================================================================
// INI
// =============================================================================

/// An order-preserving ini document: sections of `key = value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = IniDocument::default();
        let mut current: Option<usize> = None;
        let mut last_key: Option<usize> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            // Indented lines continue the previous value.
            if raw.starts_with(char::is_whitespace) {
                if let (Some(section), Some(key)) = (current, last_key) {
                    let value = &mut doc.sections[section].1[key].1;
                    value.push('\n');
                    value.push_str(trimmed);
                    continue;
                }
            }
            if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                current = Some(doc.section_index(name.trim()));
                last_key = None;
                continue;
            }
            let Some(section) = current else {
                return Err(config_error(format!(
                    "line {}: key outside of any section: {}",
                    lineno + 1,
                    trimmed
                )));
            };
            let Some(split) = trimmed.find(['=', ':']) else {
                return Err(config_error(format!("line {}: expected 'key = value': {}", lineno + 1, trimmed)));
            };
            let key = trimmed[..split].trim().to_string();
            let value = trimmed[split + 1..].trim().to_string();
            last_key = Some(doc.set(section, key, value));
        }
        Ok(doc)
    }

    fn section_index(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.sections.push((name.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        }
    }

    fn set(&mut self, section: usize, key: String, value: String) -> usize {
        let entries = &mut self.sections[section].1;
        match entries.iter().position(|(k, _)| *k == key) {
            Some(idx) => {
                entries[idx].1 = value;
                idx
            }
            None => {
                entries.push((key, value));
                entries.len() - 1
            }
        }
    }

    /// Overlays `other`: its keys win, section by section.
    pub fn merge(&mut self, other: IniDocument) {
        for (name, entries) in other.sections {
            let section = self.section_index(&name);
            for (key, value) in entries {
                self.set(section, key, value);
            }
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(n, _)| n == section)?
            .1
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, entries) in &self.sections {
            out.push_str(&format!("[{}]\n", name));
            for (key, value) in entries {
                out.push_str(&format!("{} = {}\n", key, value.replace('\n', "\n\t")));
            }
            out.push('\n');
        }
        out
    }
}

fn has_header_line(text: &str, header: &str) -> bool {
    text.lines().any(|line| line.trim() == header)
}

/// Merges a base ini file and inline text; `None` when there is nothing to write.
pub fn join_ini_configs(base: Option<&Path>, inline: &str) -> Result<Option<String>> {
    let mut doc = match base {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| config_error(format!("cannot read {}: {}", path.display(), e)))?;
            IniDocument::parse(&text)?
        }
        None => IniDocument::default(),
    };

    if !inline.trim().is_empty() {
        let inline = if has_header_line(inline, INI_SECTION) {
            inline.to_string()
        } else {
            format!("{}\n{}", INI_SECTION, inline)
        };
        doc.merge(IniDocument::parse(&inline)?);
    }

    if doc.is_empty() {
        return Ok(None);
    }
    Ok(Some(doc.render()))
}

// =============================================================================
// TOML
// =============================================================================

fn mypy_table(doc: toml::Table, origin: &str) -> Result<toml::Table> {
    match doc.get("tool").and_then(|tool| tool.get("mypy")) {
        None => Ok(toml::Table::new()),
        Some(toml::Value::Table(table)) => Ok(table.clone()),
        Some(_) => Err(config_error(format!("[tool.mypy] in {} is not a table", origin))),
    }
}

/// Merges the `[tool.mypy]` table of a base `pyproject.toml` with inline text.
///
/// Only `[tool.mypy]` survives; everything else in the base file is dropped.
pub fn join_toml_configs(base: &Path, inline: &str) -> Result<String> {
    let text = fs::read_to_string(base)
        .map_err(|e| config_error(format!("cannot read {}: {}", base.display(), e)))?;
    let base_doc: toml::Table = toml::from_str(&text)
        .map_err(|e| config_error(format!("{} is not valid toml: {}", base.display(), e)))?;
    let mut mypy = mypy_table(base_doc, &base.display().to_string())?;

    if !inline.trim().is_empty() {
        let inline = if has_header_line(inline, TOML_SECTION) {
            inline.to_string()
        } else {
            format!("{}\n{}", TOML_SECTION, inline)
        };
        let inline_doc: toml::Table = toml::from_str(&inline)
            .map_err(|e| config_error(format!("inline config is not valid toml: {}", e)))?;
        mypy.extend(mypy_table(inline_doc, "inline config")?);
    }

    let mut tool = toml::Table::new();
    tool.insert("mypy".to_string(), toml::Value::Table(mypy));
    let mut root = toml::Table::new();
    root.insert("tool".to_string(), toml::Value::Table(tool));
    toml::to_string(&root).map_err(|e| config_error(format!("cannot serialize config: {}", e)))
}

// =============================================================================
// WORKSPACE CONFIG FILE
// =============================================================================

/// Writes the effective config into `dir` and returns its path.
pub fn prepare_config_file(dir: &Path, config: &HarnessConfig, inline: &str) -> Result<PathBuf> {
    let (location, content) = match &config.base_toml {
        Some(base) => (dir.join(TOML_FILE_NAME), join_toml_configs(base, inline)?),
        None => {
            let content = join_ini_configs(config.base_ini.as_deref(), inline)?;
            (dir.join(INI_FILE_NAME), content.unwrap_or_else(|| INI_SECTION.to_string()))
        }
    };
    fs::write(&location, content).map_err(|e| HarnessError::workspace(&location, e))?;
    Ok(location)
}
