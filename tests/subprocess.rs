// Subprocess execution against small shell-script checkers.
#![cfg(unix)]

mod common;

use std::path::Path;

use common::{assert_passed, write_script, REVEAL_INT_SCRIPT};
use tempfile::TempDir;
use typecase::{CaseDefinition, FailureKind, Harness, HarnessConfig, Outcome};

fn harness(base: &TempDir, checker: &Path) -> Harness {
    let config = HarnessConfig::builder()
        .base_dir(base.path())
        .checker_executable(checker)
        .build()
        .unwrap();
    Harness::new(config)
}

fn run(harness: &Harness, definition: CaseDefinition) -> typecase::ScenarioReport {
    harness.run_case(&definition).unwrap().remove(0)
}

#[test]
fn script_checker_output_is_matched() {
    let base = tempfile::tempdir().unwrap();
    let checker = write_script(base.path(), "checker.sh", REVEAL_INT_SCRIPT);
    let report = run(
        &harness(&base, &checker),
        CaseDefinition::new("reveal", "a = 1\nreveal_type(1)  # N: Revealed type is \"builtins.int\""),
    );
    assert_passed(&report);
    let log = report.run_log.to_string();
    assert!(log.contains("  | returncode: 0"));
    assert!(log.contains("  | stdout: main.py:2: note: Revealed type is \"builtins.int\""));
}

#[test]
fn exit_code_two_is_a_critical_error() {
    let base = tempfile::tempdir().unwrap();
    let checker = write_script(base.path(), "crash.sh", "echo 'Traceback (most recent call last):' >&2\nexit 2\n");
    let mut definition = CaseDefinition::new("crash", "x = 1");
    definition.expect_fail = true;
    let report = run(&harness(&base, &checker), definition);

    let Outcome::Failed(failure) = &report.outcome else {
        panic!("expected a failure");
    };
    match &failure.failure {
        FailureKind::Invocation { message, exit_code, output } => {
            assert_eq!(message, "Critical error occurred");
            assert_eq!(*exit_code, Some(2));
            assert!(output.contains("Traceback"));
        }
        other => panic!("expected an invocation failure, got {:?}", other),
    }
}

#[test]
fn missing_executable_is_an_invocation_failure() {
    let base = tempfile::tempdir().unwrap();
    let report = run(
        &harness(&base, &base.path().join("no-such-checker")),
        CaseDefinition::new("unreachable", "x = 1"),
    );
    let Outcome::Failed(failure) = &report.outcome else {
        panic!("expected a failure");
    };
    assert!(matches!(failure.failure, FailureKind::Invocation { exit_code: None, .. }));
}

#[test]
fn env_overrides_reach_the_checker() {
    let base = tempfile::tempdir().unwrap();
    let checker = write_script(base.path(), "env.sh", "echo \"main.py:1: note: GREETING=$GREETING\"\n");
    let mut definition = CaseDefinition::new("env", "x = 1");
    definition.env.insert("GREETING".into(), "hello".into());
    definition.out = "main:1: note: GREETING=hello".into();
    assert_passed(&run(&harness(&base, &checker), definition));
}

#[test]
fn inline_config_is_written_for_the_checker() {
    let base = tempfile::tempdir().unwrap();
    let checker = write_script(
        base.path(),
        "config.sh",
        r#"for arg in "$@"; do
  case "$arg" in
    --config-file=*) cfg="${arg#--config-file=}" ;;
  esac
done
if grep -q '^strict = True$' "$cfg"; then
  echo "main.py:1: note: strict"
fi
"#,
    );
    let mut definition = CaseDefinition::new("configured", "x = 1  # N: strict");
    definition.mypy_config = "strict = True".into();
    assert_passed(&run(&harness(&base, &checker), definition.clone()));

    definition.mypy_config = String::new();
    assert!(run(&harness(&base, &checker), definition).outcome.is_failed());
}
