// End-to-end scenario runs against the in-process fake checker.

mod common;

use std::sync::Arc;

use common::{assert_passed, Fixture};
use typecase::hooks::HookContext;
use typecase::matcher::extract_from_out;
use typecase::runner::Step;
use typecase::{CaseDefinition, FailureKind, Outcome, RunOptions, ScenarioHooks};

#[test]
fn reveal_type_annotation_passes() {
    let fixture = Fixture::shared();
    let report = fixture.run_one(&CaseDefinition::new(
        "reveal_int",
        "reveal_type(1)  # N: Revealed type is \"builtins.int\"",
    ));
    assert_passed(&report);
    let log = report.run_log.to_string();
    assert!(log.starts_with("Ran mypy the following times from "));
    assert!(log.contains("  > Created "));
    assert!(log.contains("  % mypy "));
}

#[test]
fn wrong_expectation_reports_mismatch_at_source_line() {
    let fixture = Fixture::shared();
    let mut definition = CaseDefinition::new(
        "wrong",
        "a = 1\nreveal_type(a)  # N: Revealed type is \"builtins.str\"",
    );
    definition.starting_lineno = 10;
    let report = fixture.run_one(&definition);

    let Outcome::Failed(failure) = &report.outcome else {
        panic!("expected a failure, got {:?}", report.outcome);
    };
    assert_eq!(failure.step, Step::Initial);
    let FailureKind::Mismatch(mismatch) = &failure.failure else {
        panic!("expected a mismatch, got {:?}", failure.failure);
    };
    assert_eq!(mismatch.expected, vec!["main:2: note: Revealed type is \"builtins.str\""]);
    assert_eq!(mismatch.actual, vec!["main:2: note: Revealed type is \"builtins.int\""]);
    assert_eq!(report.failure_line(), Some(12));
}

#[test]
fn unexpected_output_is_a_count_mismatch() {
    let fixture = Fixture::shared();
    let report = fixture.run_one(&CaseDefinition::new("silent", "reveal_type(1)"));
    let Outcome::Failed(failure) = &report.outcome else {
        panic!("expected a failure");
    };
    assert!(failure.failure.to_string().starts_with("Output is not expected:"));
}

#[test]
fn out_block_and_comments_combine() {
    let fixture = Fixture::shared();
    let reports = fixture.run_yaml(
        r#"
- case: combined
  main: |
    import missing
    reveal_type(True)  # N: Revealed type is "builtins.bool"
  out: |
    main:1: error: Cannot find implementation or library stub for module named "missing"
"#,
    );
    assert_eq!(reports.len(), 1);
    assert_passed(&reports[0]);
}

#[test]
fn parametrized_cases_run_once_per_entry() {
    let fixture = Fixture::shared();
    let reports = fixture.run_yaml(
        r#"
- case: reveal_literal
  parametrized:
    - val: 1
      rt: int
    - val: "'a'"
      rt: str
    - val: "True"
      rt: bool
  main: |
    reveal_type({{ val }})  # N: Revealed type is "builtins.{{ rt }}"
"#,
    );
    let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "reveal_literal[val=1,rt=int]",
            "reveal_literal[val='a',rt=str]",
            "reveal_literal[val=True,rt=bool]",
        ]
    );
    reports.iter().for_each(assert_passed);
}

#[test]
fn regex_matching_per_line_and_per_case() {
    let fixture = Fixture::shared();
    let reports = fixture.run_yaml(
        r#"
- case: one_line_regex
  main: |
    reveal_type(1)  # NR: Revealed type is "builtins\.(int|str)"
- case: case_regex
  regex: true
  main: |
    reveal_type('x')  # N: .*"builtins\.s.r"
- case: literal_parens_need_regex_off
  main: |
    reveal_type(1)  # N: Revealed type is "builtins\.(int|str)"
"#,
    );
    assert_passed(&reports[0]);
    assert_passed(&reports[1]);
    assert!(reports[2].outcome.is_failed());
}

#[test]
fn expect_fail_inverts_the_verdict() {
    let fixture = Fixture::shared();

    let mut wrong = CaseDefinition::new("expected_wrong", "reveal_type(1)  # N: Revealed type is \"builtins.str\"");
    wrong.expect_fail = true;
    assert_passed(&fixture.run_one(&wrong));

    let mut right = CaseDefinition::new("expected_right", "reveal_type(1)  # N: Revealed type is \"builtins.int\"");
    right.expect_fail = true;
    let report = fixture.run_one(&right);
    let Outcome::Failed(failure) = &report.outcome else {
        panic!("expected a failure");
    };
    assert_eq!(failure.failure, FailureKind::UnexpectedPass);
}

#[test]
fn crashes_are_never_masked_by_expect_fail() {
    let fixture = Fixture::shared();
    let mut definition = CaseDefinition::new("crashing", "crash()");
    definition.expect_fail = true;
    let report = fixture.run_one(&definition);
    let Outcome::Failed(failure) = &report.outcome else {
        panic!("expected a failure");
    };
    match &failure.failure {
        FailureKind::Invocation { exit_code, output, .. } => {
            assert_eq!(*exit_code, Some(2));
            assert!(output.contains("crash requested"));
        }
        other => panic!("expected an invocation failure, got {:?}", other),
    }
}

#[test]
fn skipped_scenarios_never_touch_the_checker() {
    let fixture = Fixture::shared();
    let reports = fixture.run_yaml(
        r#"
- case: always_skipped
  skip: True
  main: crash()
- case: skipped_elsewhere
  skip: platform == "plan9"
  main: |
    reveal_type(1)  # N: Revealed type is "builtins.int"
"#,
    );
    assert_eq!(
        reports[0].outcome,
        Outcome::Skipped {
            reason: "Marked 'skip'".into()
        }
    );
    assert!(reports[0].run_log.lines().is_empty());
    assert_passed(&reports[1]);
}

#[test]
fn extra_files_and_start_list() {
    let fixture = Fixture::shared();
    let reports = fixture.run_yaml(
        r#"
- case: start_from_helper
  start: [helper.py]
  main: crash()
  files:
    - path: helper.py
      content: |
        reveal_type("s")  # N: Revealed type is "builtins.str"
"#,
    );
    assert_passed(&reports[0]);
}

#[test]
fn nested_package_paths_normalize_to_module_paths() {
    let fixture = Fixture::shared();
    let reports = fixture.run_yaml(
        r#"
- case: nested
  main: |
    import pkg.mod
  files:
    - path: pkg/__init__.py
      content: ""
    - path: pkg/mod.py
      content: |
        reveal_type(1)  # N: Revealed type is "builtins.int"
"#,
    );
    assert_passed(&reports[0]);
}

#[test]
fn workspaces_are_removed_after_each_scenario() {
    let fixture = Fixture::shared();
    let report = fixture.run_one(&CaseDefinition::new("cleanup", "a = 1"));
    assert_passed(&report);
    let leftovers: Vec<_> = std::fs::read_dir(fixture.base.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(typecase::workspace::WORKSPACE_PREFIX))
        .collect();
    assert!(leftovers.is_empty(), "leftover workspaces: {:?}", leftovers);
}

#[test]
fn out_block_regex_depends_on_the_regex_flag() {
    let fixture = Fixture::shared();
    let document = |regex: bool| {
        format!(
            "- case: out_regex\n  regex: {}\n  main: |\n    reveal_type('x')\n  out: |\n    main:1: note: .*str.*\n",
            regex
        )
    };
    assert_passed(&fixture.run_yaml(&document(true))[0]);
    assert!(fixture.run_yaml(&document(false))[0].outcome.is_failed());
}

#[test]
fn unusable_env_names_fail_the_scenario_without_aborting() {
    let fixture = Fixture::shared();
    let mut definition = CaseDefinition::new("bad_env", "x = 1");
    definition.env.insert(String::new(), "x".into());
    let report = fixture.run_one(&definition);
    let Outcome::Failed(failure) = &report.outcome else {
        panic!("expected a failure, got {:?}", report.outcome);
    };
    assert!(matches!(failure.failure, FailureKind::Invocation { exit_code: None, .. }));

    assert_passed(&fixture.run_one(&CaseDefinition::new(
        "after_bad_env",
        "reveal_type(1)  # N: Revealed type is \"builtins.int\"",
    )));

    let err = typecase::document::parse_document("- case: a\n  main: x\n  env:\n    - '=oops'\n", false).unwrap_err();
    assert!(err.to_string().contains("env[0]"));
}

#[test]
fn declared_entry_file_is_what_gets_checked() {
    let fixture = Fixture::shared();
    let document = |annotated: &str| {
        format!(
            r#"
- case: entry_collision
  main: |
    reveal_type(1)  # N: Revealed type is "builtins.int"
  files:
    - path: main.py
      content: |
        reveal_type('a')  # N: Revealed type is "builtins.{}"
"#,
            annotated
        )
    };
    assert_passed(&fixture.run_yaml(&document("str"))[0]);

    let reports = fixture.run_yaml(&document("bool"));
    let Outcome::Failed(failure) = &reports[0].outcome else {
        panic!("expected a failure, got {:?}", reports[0].outcome);
    };
    let FailureKind::Mismatch(mismatch) = &failure.failure else {
        panic!("expected a mismatch, got {:?}", failure.failure);
    };
    assert_eq!(mismatch.actual, vec!["main:1: note: Revealed type is \"builtins.str\""]);
}

#[test]
fn parametrized_values_render_inside_followups() {
    let fixture = Fixture::shared();
    let reports = fixture.run_yaml(
        r#"
- case: followup_params
  parametrized:
    - val: 1
      rt: int
    - val: "'a'"
      rt: str
  main: |
    x = 1
  followups:
    - description: reveal the parameter
      main: |
        reveal_type({{ val }})
      out: |
        main:1: note: Revealed type is "builtins.{{ rt }}"
"#,
    );
    assert_eq!(reports.len(), 2);
    reports.iter().for_each(assert_passed);
}

/// Starts from `helper.py`, expects its reveal, and inverts the verdict when
/// the case carries `invert`.
struct Redirect;

impl ScenarioHooks for Redirect {
    fn before_run(&self, ctx: &mut HookContext<'_>, options: RunOptions) -> typecase::Result<RunOptions> {
        Ok(RunOptions {
            start: vec!["helper.py".to_string()],
            expect_fail: ctx.property("invert").is_some(),
            expected_output: extract_from_out("helper:1: note: Revealed type is \"builtins.int\"", false),
        })
    }
}

#[test]
fn options_returned_by_scenario_hooks_take_effect() {
    let fixture = Fixture::shared().with_hooks(Arc::new(Redirect));
    let reports = fixture.run_yaml(
        r#"
- case: redirected
  main: crash()
  files:
    - path: helper.py
      content: reveal_type(1)
- case: redirected_and_inverted
  invert: true
  main: crash()
  files:
    - path: helper.py
      content: reveal_type(1)
"#,
    );
    assert_passed(&reports[0]);
    let Outcome::Failed(failure) = &reports[1].outcome else {
        panic!("expected a failure, got {:?}", reports[1].outcome);
    };
    assert_eq!(failure.failure, FailureKind::UnexpectedPass);
}
