//! End-to-end tests for the `build` command.
//!
//! These run the real binary against a local plan tree. The registry and the
//! build executor are small shell scripts, so the tests are unix only.

#![cfg(unix)]

mod common;
use common::prelude::*;

const PUBLISHED_EVERYWHERE: &str = r#"[ "$1" = latest ] || exit 0
shift
for query in "$@"; do
  echo "${query%%=*}=/build.example.com@corp:main/1.0:1.0.3abc-1-1"
done"#;

fn fixture() -> TestFixture {
    TestFixture::new()
        .with_plan("projects/widget.bob", plans::WIDGET)
        .with_plan("projects/gadget.bob", plans::GADGET)
}

#[test]
fn test_build_help() {
    let mut cmd = cargo_bin_cmd!("buildtide");
    cmd.arg("build")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--repo"))
        .stdout(predicate::str::contains("--force-build"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_build_requires_repo() {
    let mut cmd = cargo_bin_cmd!("buildtide");
    cmd.arg("build")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--repo"));
}

#[test]
fn test_dry_run_builds_each_plan_once() {
    let fixture = fixture();

    fixture
        .build(&["--branch", "main", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[BUILT] gadget"))
        .stdout(predicate::str::contains("[BUILT] widget"))
        .stdout(predicate::str::contains("[SKIPPED] widget-docs"))
        .stdout(predicate::str::contains("Built: 2  Failed: 0  Skipped: 1  (dry run)"));
}

#[test]
fn test_dry_run_does_not_call_executor() {
    let fixture = fixture().with_executor("touch \"$(dirname \"$0\")/called\"");

    fixture.build(&["--dry-run"]).assert().success();

    fixture.child("called").assert(predicate::path::missing());
}

#[test]
fn test_build_calls_executor_once_per_plan() {
    let fixture = fixture().with_executor("echo \"$@\" >> \"$(dirname \"$0\")/invocations\"");

    fixture.build(&["--branch", "main"]).assert().success();

    let log = std::fs::read_to_string(fixture.path().join("invocations")).unwrap();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 2, "one call per plan: {:?}", lines);
    assert!(lines.iter().any(|l| l.ends_with("projects/gadget.bob")));
    assert!(lines.iter().any(|l| l.ends_with("projects/widget.bob")));
}

#[test]
fn test_all_builds_failing_exits_non_zero() {
    let fixture = fixture().with_executor("exit 1");

    fixture
        .build(&[])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[FAILED] widget"))
        .stderr(predicate::str::contains("build run failed"));
}

#[test]
fn test_partial_failure_still_succeeds() {
    let fixture = fixture().with_executor(
        r#"case "$1" in
  *gadget.bob) exit 1 ;;
esac"#,
    );

    fixture
        .build(&[])
        .assert()
        .success()
        .stdout(predicate::str::contains("[FAILED] gadget"))
        .stdout(predicate::str::contains("[BUILT] widget"))
        .stdout(predicate::str::contains("Built: 1  Failed: 1"));
}

#[test]
fn test_unchanged_targets_are_not_built() {
    let fixture = fixture()
        .with_registry(PUBLISHED_EVERYWHERE)
        .with_executor("touch \"$(dirname \"$0\")/called\"");

    fixture
        .build(&[])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to build"));

    fixture.child("called").assert(predicate::path::missing());
}

#[test]
fn test_force_build_rebuilds_unchanged_target() {
    let fixture = fixture().with_registry(PUBLISHED_EVERYWHERE);

    fixture
        .build(&["--force-build", "gadget", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[BUILT] gadget"))
        .stdout(predicate::str::contains("[BUILT] widget").not());
}

#[test]
fn test_branch_mismatch_is_reported() {
    let fixture = fixture().with_plan("projects/legacy.bob", plans::LEGACY);

    fixture
        .build(&["--branch", "main", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("legacy.bob"))
        .stdout(predicate::str::contains("release-4"));
}

#[test]
fn test_branch_mismatch_fails_with_strict() {
    let fixture = fixture().with_plan("projects/legacy.bob", plans::LEGACY);

    fixture
        .build(&["--branch", "main", "--dry-run", "--strict"])
        .assert()
        .code(1);
}

#[test]
fn test_plan_selection() {
    let fixture = fixture();

    fixture
        .build(&["--dry-run", "projects/gadget.bob"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[BUILT] gadget"))
        .stdout(predicate::str::contains("widget").not());
}

#[test]
fn test_json_report() {
    let fixture = fixture();

    let output = fixture.build(&["--dry-run", "--json"]).output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let targets = report["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 3);
    assert!(targets.iter().all(|t| t["change"] == true));
    assert_eq!(report["build"]["built"].as_array().unwrap().len(), 2);
}

#[test]
fn test_test_only_config_forces_dry_run() {
    let fixture = fixture()
        .with_executor("touch \"$(dirname \"$0\")/called\"")
        .with_config_line("test_only: true");

    fixture
        .build(&[])
        .assert()
        .success()
        .stdout(predicate::str::contains("(dry run)"));

    fixture.child("called").assert(predicate::path::missing());
}

#[test]
fn test_registry_failure_drops_target() {
    let fixture = fixture().with_registry("echo 'registry offline' >&2; exit 1");

    fixture
        .build(&["--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("registry offline"))
        .stdout(predicate::str::contains("Nothing to build"));
}

#[test]
fn test_group_is_published_after_build() {
    let fixture = fixture().with_registry(
        r#"echo "$@" >> "$(dirname "$0")/registry.log"
[ "$1" = latest ] || exit 0
shift
for query in "$@"; do
  echo "${query%%=*}=/build.example.com@corp:main/1.0:1.0.3abc-1-1"
done"#,
    );

    fixture
        .build(&[
            "--force-build",
            "gadget",
            "--group",
            "group-widget",
            "--group-label",
            "build.example.com@corp:main",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[BUILT] gadget"))
        .stdout(predicate::str::contains("Group group-widget published at"));

    let log = std::fs::read_to_string(fixture.path().join("registry.log")).unwrap();
    assert!(log.lines().any(|l| l.starts_with("members group-widget=")));
    assert!(log.lines().any(|l| l.starts_with("commit ")));
    assert!(log.lines().any(|l| l == "cook group-widget=build.example.com@corp:main"));
}

#[test]
fn test_group_is_left_alone_in_dry_run() {
    let fixture = fixture().with_registry(r#"echo "$@" >> "$(dirname "$0")/registry.log""#);

    fixture
        .build(&[
            "--dry-run",
            "--group",
            "group-widget",
            "--group-label",
            "build.example.com@corp:main",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Group group-widget"));

    let log = std::fs::read_to_string(fixture.path().join("registry.log")).unwrap();
    assert!(!log.lines().any(|l| l.starts_with("commit") || l.starts_with("cook")));
}

#[test]
fn test_missing_repo_directory_fails() {
    let fixture = TestFixture::new();

    fixture
        .command()
        .arg("build")
        .arg("--repo")
        .arg("/nonexistent/plans")
        .assert()
        .failure();
}
