//! Exit code conventions: 0 on success, 1 on a failed run, 2 on usage errors.

mod common;
use common::prelude::*;

#[test]
fn test_help_exits_zero() {
    let mut cmd = cargo_bin_cmd!("buildtide");
    cmd.arg("--help")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_version_exits_zero() {
    let mut cmd = cargo_bin_cmd!("buildtide");
    cmd.arg("--version")
        .assert()
        .code(0)
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_subcommand_exits_two() {
    let mut cmd = cargo_bin_cmd!("buildtide");
    cmd.arg("rebuild-everything").assert().code(2);
}

#[test]
fn test_no_subcommand_exits_two() {
    let mut cmd = cargo_bin_cmd!("buildtide");
    cmd.assert().code(2);
}

#[test]
fn test_group_without_label_exits_two() {
    let mut cmd = cargo_bin_cmd!("buildtide");
    cmd.args(["build", "--repo", ".", "--group", "group-widget"])
        .assert()
        .code(2);
}

#[test]
fn test_runtime_error_exits_one() {
    let fixture = TestFixture::new();

    fixture
        .command()
        .arg("config")
        .arg("--config")
        .arg("/nonexistent/buildtide.yaml")
        .assert()
        .code(1);
}
