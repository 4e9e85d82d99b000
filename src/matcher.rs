//! Expected-output matchers and the comparison against actual checker output.
//!
//! Expectations come from two places and end up in one list:
//!
//! - trailing comments in source files: `x = 1  # E: message`, `# N:4: message`,
//!   `# NR: pattern` (the `R` forces regex matching for that one matcher);
//! - an `out:` block of full diagnostic lines: `main:3: error: message`.
//!
//! Both sides are sorted by (file, line), then compared pairwise. A mismatch is
//! returned as a [`MatchFailure`] value carrying the aligned lines.

use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static COMMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<sev>[ENW])(?P<regex>R)?:((?P<col>\d+):)? (?P<message>.*)$").unwrap()
});

static OUT_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<file>.+?):(?P<line>\d+)(?::(?P<col>\d+))?: (?P<sev>[A-Za-z]+): (?P<message>.*)$")
        .unwrap()
});

static LOCATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<file>[^:]+):(?P<line>\d+):").unwrap());

/// Diagnostic severity as printed by the checker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    Note,
    Error,
    Warning,
    Other(String),
}

impl Severity {
    /// Accepts both the one-letter annotation markers and full words.
    pub fn parse(marker: &str) -> Self {
        match marker {
            "E" | "error" => Severity::Error,
            "N" | "note" => Severity::Note,
            "W" | "warning" => Severity::Warning,
            other => Severity::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Severity::Note => "note",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Other(word) => word,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a matcher was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatcherSource {
    /// A trailing `# E:`/`# N:`/`# W:` annotation, anchored to its source line.
    Comment,
    /// A line of an explicit `out:` block.
    OutBlock,
}

/// One expected diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputMatcher {
    pub file: String,
    pub line: usize,
    pub column: Option<usize>,
    pub severity: Severity,
    pub message: String,
    pub regex: bool,
    pub source: MatcherSource,
}

impl OutputMatcher {
    /// The location and severity part, e.g. `main:3: error: `.
    pub fn prefix(&self) -> String {
        match self.column {
            Some(col) => format!("{}:{}:{}: {}: ", self.file, self.line, col, self.severity),
            None => format!("{}:{}: {}: ", self.file, self.line, self.severity),
        }
    }

    /// Literal matchers compare the whole line; regex matchers match the escaped
    /// prefix followed by the pattern, anchored at the start only.
    pub fn matches(&self, actual: &str) -> bool {
        if !self.regex {
            return self.to_string() == actual;
        }
        let pattern = format!("^{}(?:{})", regex::escape(&self.prefix()), self.message);
        match Regex::new(&pattern) {
            Ok(re) => re.is_match(actual),
            Err(err) => {
                tracing::warn!(pattern = %self.message, error = %err, "invalid regex matcher");
                false
            }
        }
    }
}

impl fmt::Display for OutputMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix(), self.message)
    }
}

/// Strips the source suffix from a file path (`pkg/mod.py` -> `pkg/mod`).
pub fn module_path<'a>(path: &'a str, source_suffix: &str) -> &'a str {
    path.strip_suffix(source_suffix).unwrap_or(path)
}

/// Collects `# E:`-style annotations from one file's source lines.
pub fn extract_from_comments(
    path: &str,
    content: &str,
    source_suffix: &str,
    regex: bool,
) -> Vec<OutputMatcher> {
    let file = module_path(path, source_suffix);
    let mut matchers = Vec::new();
    for (index, line) in content.split('\n').enumerate() {
        // The first piece is code, never a comment.
        for comment in line.split(" # ").skip(1) {
            let Some(caps) = COMMENT_RE.captures(comment.trim()) else {
                continue;
            };
            matchers.push(OutputMatcher {
                file: file.to_string(),
                line: index + 1,
                column: caps.name("col").and_then(|c| c.as_str().parse().ok()),
                severity: Severity::parse(&caps["sev"]),
                message: caps["message"].to_string(),
                regex: regex || caps.name("regex").is_some(),
                source: MatcherSource::Comment,
            });
        }
    }
    matchers
}

/// Parses an already-rendered `out:` block. Lines that are not diagnostics are ignored.
pub fn extract_from_out(out: &str, regex: bool) -> Vec<OutputMatcher> {
    out.split('\n')
        .filter_map(|line| OUT_LINE_RE.captures(line.trim()))
        .map(|caps| OutputMatcher {
            file: caps["file"].to_string(),
            line: caps["line"].parse().unwrap_or(0),
            column: caps.name("col").and_then(|c| c.as_str().parse().ok()),
            severity: Severity::parse(&caps["sev"]),
            message: caps["message"].to_string(),
            regex,
            source: MatcherSource::OutBlock,
        })
        .collect()
}

/// Builds the full expectation list for a set of files plus an `out:` block.
pub fn build_expected<'a>(
    files: impl IntoIterator<Item = (&'a str, &'a str)>,
    out: &str,
    source_suffix: &str,
    regex: bool,
) -> Vec<OutputMatcher> {
    let mut expected: Vec<OutputMatcher> = files
        .into_iter()
        .flat_map(|(path, content)| extract_from_comments(path, content, source_suffix, regex))
        .collect();
    expected.extend(extract_from_out(out, regex));
    expected
}

/// Rewrites raw checker output into comparable lines: workspace prefix removed,
/// source suffix dropped before the location colon, blank lines discarded.
pub fn normalize_output(raw: &str, workspace: &Path, source_suffix: &str) -> Vec<String> {
    let mut prefix = workspace.display().to_string();
    if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
        prefix.push(std::path::MAIN_SEPARATOR);
    }
    let suffix_colon = format!("{}:", source_suffix);
    raw.lines()
        .map(|line| {
            if !line.contains(':') {
                return line.trim().to_string();
            }
            line.trim()
                .replace(&prefix, "")
                .replace(&suffix_colon, ":")
        })
        .filter(|line| !line.is_empty())
        .collect()
}

fn location_key(line: &str) -> (String, usize) {
    LOCATION_RE
        .captures(line)
        .and_then(|caps| Some((caps["file"].to_string(), caps["line"].parse().ok()?)))
        .unwrap_or_default()
}

/// Why the expected and actual output disagreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MismatchKind {
    /// Same number of lines, at least one differs.
    Lines,
    /// The checker emitted more or fewer lines than expected.
    Count,
}

/// A structured diff of expected vs actual output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchFailure {
    pub kind: MismatchKind,
    pub expected: Vec<String>,
    pub actual: Vec<String>,
    /// Index into the aligned lists of the first disagreement.
    pub first_mismatch: usize,
    /// Source line of the first mismatching expectation (0 when none applies).
    pub lineno: usize,
}

impl MatchFailure {
    /// The pair of lines at the first disagreement, either side possibly missing.
    pub fn first_pair(&self) -> (Option<&str>, Option<&str>) {
        (
            self.expected.get(self.first_mismatch).map(String::as_str),
            self.actual.get(self.first_mismatch).map(String::as_str),
        )
    }
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MismatchKind::Lines => writeln!(f, "Invalid output:")?,
            MismatchKind::Count if self.actual.len() > self.expected.len() => {
                writeln!(f, "Output is not expected:")?
            }
            MismatchKind::Count => writeln!(f, "Expected output is missing:")?,
        }
        writeln!(f, "Expected:")?;
        for line in &self.expected {
            writeln!(f, "  {}", line)?;
        }
        writeln!(f, "Actual:")?;
        for line in &self.actual {
            writeln!(f, "  {}", line)?;
        }
        let (expected, actual) = self.first_pair();
        let expected = expected.unwrap_or("");
        let actual = actual.unwrap_or("");
        let column = expected
            .chars()
            .zip(actual.chars())
            .take_while(|(a, b)| a == b)
            .count();
        writeln!(f, "Alignment of first line difference:")?;
        writeln!(f, "  E: {}", expected)?;
        writeln!(f, "  A: {}", actual)?;
        write!(f, "     {}^", " ".repeat(column))
    }
}

/// Compares normalized actual lines against the expectation list.
pub fn check(expected: &[OutputMatcher], actual: &[String]) -> Result<(), MatchFailure> {
    let mut expected: Vec<&OutputMatcher> = expected.iter().collect();
    expected.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));

    let mut actual: Vec<&String> = actual.iter().filter(|l| !l.trim().is_empty()).collect();
    actual.sort_by_cached_key(|line| location_key(line));

    let first_mismatch = expected
        .iter()
        .zip(actual.iter())
        .position(|(matcher, line)| !matcher.matches(line));

    let kind = match first_mismatch {
        None if expected.len() == actual.len() => return Ok(()),
        Some(_) if expected.len() == actual.len() => MismatchKind::Lines,
        _ => MismatchKind::Count,
    };
    let first_mismatch = first_mismatch.unwrap_or_else(|| expected.len().min(actual.len()));
    let lineno = expected
        .get(first_mismatch)
        .map(|m| m.line)
        .or_else(|| expected.last().map(|m| m.line))
        .unwrap_or(0);

    Err(MatchFailure {
        kind,
        expected: expected.iter().map(|m| m.to_string()).collect(),
        actual: actual.into_iter().cloned().collect(),
        first_mismatch,
        lineno,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn comment_markers_map_to_severities() {
        let source = "a = 1  # E: bad thing\nreveal_type(a)  # N: Revealed type is \"builtins.int\"\nb = 2 # W:5: careful";
        let matchers = extract_from_comments("main.py", source, ".py", false);
        assert_eq!(matchers.len(), 3);
        assert_eq!(matchers[0].to_string(), "main:1: error: bad thing");
        assert_eq!(matchers[1].severity, Severity::Note);
        assert_eq!(matchers[1].line, 2);
        assert_eq!(matchers[2].column, Some(5));
        assert_eq!(matchers[2].to_string(), "main:3:5: warning: careful");
    }

    #[test]
    fn regex_marker_applies_to_one_line_only() {
        let source = "x  # NR: .*int.*\ny  # N: literal";
        let matchers = extract_from_comments("main.py", source, ".py", false);
        assert!(matchers[0].regex);
        assert!(!matchers[1].regex);
    }

    #[test]
    fn out_block_understands_shorthand_and_columns() {
        let matchers = extract_from_out("main:1: E: boom\n\nmain:2:7: note: hi\nnot a diagnostic", false);
        assert_eq!(matchers.len(), 2);
        assert_eq!(matchers[0].severity, Severity::Error);
        assert_eq!(matchers[1].column, Some(7));
        assert_eq!(matchers[1].source, MatcherSource::OutBlock);
    }

    #[test]
    fn normalize_strips_workspace_and_suffix() {
        let ws = Path::new("/tmp/typecase-abc");
        let out = "/tmp/typecase-abc/pkg/mod.py:3: error: x\n\n  main.py:1: note: y  \n";
        assert_eq!(
            normalize_output(out, ws, ".py"),
            lines(&["pkg/mod:3: error: x", "main:1: note: y"])
        );
    }

    #[test]
    fn check_passes_regardless_of_cross_line_order() {
        let expected = extract_from_out("main:2: error: second\nmain:1: note: first", false);
        let actual = lines(&["main:1: note: first", "main:2: error: second"]);
        assert!(check(&expected, &actual).is_ok());
    }

    #[test]
    fn check_reports_first_mismatch_line() {
        let expected = extract_from_out("main:1: note: a\nmain:4: error: b", false);
        let actual = lines(&["main:1: note: a", "main:4: error: c"]);
        let failure = check(&expected, &actual).unwrap_err();
        assert_eq!(failure.kind, MismatchKind::Lines);
        assert_eq!(failure.first_mismatch, 1);
        assert_eq!(failure.lineno, 4);
        assert!(failure.to_string().contains("  A: main:4: error: c"));
    }

    #[test]
    fn check_reports_unexpected_extra_output() {
        let failure = check(&[], &lines(&["main:1: error: surprise"])).unwrap_err();
        assert_eq!(failure.kind, MismatchKind::Count);
        assert!(failure.to_string().starts_with("Output is not expected:"));
    }

    #[test]
    fn regex_requires_prefix_to_match_literally() {
        let expected = extract_from_out("main:1: note: .*str.*", true);
        assert!(check(&expected, &lines(&["main:1: note: Revealed type is \"builtins.str\""])).is_ok());
        assert!(check(&expected, &lines(&["main:2: note: Revealed type is \"builtins.str\""])).is_err());
    }
}
