//! Handles all user-facing output for the CLI.
//!
//! This module is responsible for colorizing verdict lines, printing failure
//! details with diffs, the summary, and the JSON report. By centralizing output
//! logic here, we ensure a consistent user experience.

use std::io;

use difference::{Changeset, Difference};
use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::cli::args::ColorMode;
use crate::runner::{FailureKind, Outcome, ScenarioReport, StepFailure};

/// Pass/fail/skip counts for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn from_reports(reports: &[ScenarioReport]) -> Self {
        let count = |pred: fn(&Outcome) -> bool| reports.iter().filter(|r| pred(&r.outcome)).count();
        Self {
            total: reports.len(),
            passed: count(Outcome::is_passed),
            failed: count(Outcome::is_failed),
            skipped: count(Outcome::is_skipped),
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

pub fn color_choice(mode: ColorMode) -> ColorChoice {
    match mode {
        ColorMode::Always => ColorChoice::Always,
        ColorMode::Never => ColorChoice::Never,
        ColorMode::Auto if atty::is(atty::Stream::Stdout) => ColorChoice::Auto,
        ColorMode::Auto => ColorChoice::Never,
    }
}

// ============================================================================
// TEXT REPORT
// ============================================================================

/// Writes colored text reports.
pub struct Reporter<W: WriteColor> {
    out: W,
}

impl Reporter<StandardStream> {
    pub fn stdout(mode: ColorMode) -> Self {
        Self::new(StandardStream::stdout(color_choice(mode)))
    }
}

impl<W: WriteColor> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn colored(&mut self, text: &str, color: Color, bold: bool) -> io::Result<()> {
        self.out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(bold))?;
        write!(self.out, "{}", text)?;
        self.out.reset()
    }

    fn location(report: &ScenarioReport) -> String {
        let document = report
            .document
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<inline>".to_string());
        match report.failure_line() {
            Some(line) => format!("{}:{}", document, line),
            None => document,
        }
    }

    pub fn report(&mut self, report: &ScenarioReport) -> io::Result<()> {
        match &report.outcome {
            Outcome::Passed => {
                self.colored("PASS", Color::Green, true)?;
                writeln!(self.out, ": {} [{}]", report.name, Self::location(report))
            }
            Outcome::Skipped { reason } => {
                self.colored("SKIP", Color::Yellow, true)?;
                writeln!(self.out, ": {} [{}] ({})", report.name, Self::location(report), reason)
            }
            Outcome::Failed(failure) => self.failure(report, failure),
        }
    }

    fn failure(&mut self, report: &ScenarioReport, failure: &StepFailure) -> io::Result<()> {
        self.colored("FAIL", Color::Red, true)?;
        writeln!(self.out, ": {} [{}] in {}", report.name, Self::location(report), failure.step)?;

        match &failure.failure {
            FailureKind::Mismatch(mismatch) => {
                for line in mismatch.to_string().lines() {
                    writeln!(self.out, "  {}", line)?;
                }
                writeln!(self.out, "  Diff:")?;
                self.diff(&mismatch.expected.join("\n"), &mismatch.actual.join("\n"))?;
            }
            other => {
                for line in other.to_string().lines() {
                    writeln!(self.out, "  {}", line)?;
                }
            }
        }

        if !report.run_log.lines().is_empty() {
            writeln!(self.out, "  Run log:")?;
            for line in report.run_log.lines() {
                writeln!(self.out, "    {}", line)?;
            }
        }
        Ok(())
    }

    fn diff(&mut self, expected: &str, actual: &str) -> io::Result<()> {
        let changeset = Changeset::new(expected, actual, "\n");
        for diff in &changeset.diffs {
            match diff {
                Difference::Same(x) => {
                    for line in x.lines() {
                        writeln!(self.out, "     {}", line)?;
                    }
                }
                Difference::Rem(x) => {
                    for line in x.lines() {
                        self.colored(&format!("   - {}", line), Color::Green, false)?;
                        writeln!(self.out)?;
                    }
                }
                Difference::Add(x) => {
                    for line in x.lines() {
                        self.colored(&format!("   + {}", line), Color::Red, false)?;
                        writeln!(self.out)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn summary(&mut self, reports: &[ScenarioReport]) -> io::Result<Summary> {
        let summary = Summary::from_reports(reports);
        write!(self.out, "\nTest summary: total {}, ", summary.total)?;
        self.colored("passed", Color::Green, false)?;
        write!(self.out, " {}, ", summary.passed)?;
        self.colored("failed", Color::Red, false)?;
        write!(self.out, " {}, ", summary.failed)?;
        self.colored("skipped", Color::Yellow, false)?;
        writeln!(self.out, " {}", summary.skipped)?;

        if summary.failed > 0 {
            writeln!(self.out, "\nFailed scenarios:")?;
            for report in reports.iter().filter(|r| r.outcome.is_failed()) {
                writeln!(self.out, "  - {} [{}]", report.name, Self::location(report))?;
            }
        }
        Ok(summary)
    }
}

// ============================================================================
// JSON REPORT
// ============================================================================

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: Summary,
    reports: &'a [ScenarioReport],
}

/// Renders every report plus the summary as one JSON document.
pub fn render_json(reports: &[ScenarioReport]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        summary: Summary::from_reports(reports),
        reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{check, extract_from_out};
    use crate::runner::Step;
    use crate::workspace::RunLog;
    use termcolor::NoColor;

    fn report(name: &str, outcome: Outcome) -> ScenarioReport {
        ScenarioReport {
            name: name.to_string(),
            case: name.to_string(),
            document: Some("tests/test-basics.yml".into()),
            starting_lineno: 3,
            outcome,
            run_log: RunLog::default(),
            duration_ms: 0,
        }
    }

    fn mismatch_report() -> ScenarioReport {
        let expected = extract_from_out("main:1: note: a\nmain:2: error: b", false);
        let failure = check(&expected, &["main:1: note: a".to_string(), "main:2: error: c".to_string()]).unwrap_err();
        report(
            "broken",
            Outcome::Failed(StepFailure {
                step: Step::Initial,
                failure: FailureKind::Mismatch(failure),
            }),
        )
    }

    #[test]
    fn failure_points_at_document_line() {
        let mut reporter = Reporter::new(NoColor::new(Vec::new()));
        reporter.report(&mismatch_report()).unwrap();
        let text = String::from_utf8(reporter.into_inner().into_inner()).unwrap();
        assert!(text.starts_with("FAIL: broken [tests/test-basics.yml:5] in initial run"));
        assert!(text.contains("   - main:2: error: b"));
        assert!(text.contains("   + main:2: error: c"));
    }

    #[test]
    fn summary_counts_outcomes() {
        let reports = vec![
            report("a", Outcome::Passed),
            report(
                "b",
                Outcome::Skipped {
                    reason: "Marked 'skip'".into(),
                },
            ),
            mismatch_report(),
        ];
        let mut reporter = Reporter::new(NoColor::new(Vec::new()));
        let summary = reporter.summary(&reports).unwrap();
        assert_eq!(
            summary,
            Summary {
                total: 3,
                passed: 1,
                failed: 1,
                skipped: 1
            }
        );
        assert!(!summary.success());
    }

    #[test]
    fn json_report_tags_outcomes() {
        let json = render_json(&[report("a", Outcome::Passed), mismatch_report()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["failed"], 1);
        assert_eq!(value["reports"][0]["outcome"]["status"], "passed");
        assert_eq!(value["reports"][1]["outcome"]["failure"]["kind"], "mismatch");
        assert_eq!(value["reports"][1]["outcome"]["step"], "initial");
    }
}
