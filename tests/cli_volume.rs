//! Behavioural tests for the `volctl volume` CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use predicates::str::contains;
use rstest::rstest;
use tempfile::TempDir;

/// Runs `volctl` from an empty directory with only the memory driver
/// available.
fn volctl(workdir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("volctl");
    cmd.current_dir(workdir.path())
        .env_remove("SCW_SECRET_KEY")
        .env_remove("VOLCTL_DEFAULT_DRIVER")
        .env_remove("VOLCTL_CONFIG_PATH")
        .env("RUST_LOG", "warn");
    cmd
}

fn workdir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[rstest]
#[case::map(&["volume", "map"])]
#[case::get(&["volume", "get"])]
#[case::list_alias(&["volume", "ls", "--volumename", "absent"])]
#[case::bare_volume(&["volume"])]
#[case::bare_volume_filtered(&["volume", "--volumename", "absent"])]
#[case::yaml_get(&["volume", "get", "--format", "yaml"])]
fn empty_results_print_nothing(#[case] args: &[&str]) {
    let tmp = workdir();
    volctl(&tmp).args(args).assert().success().stdout("");
}

#[test]
fn create_without_source_reports_missing_size() {
    let tmp = workdir();
    volctl(&tmp)
        .args(["volume", "create", "--volumename", "data"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr("missing --size\n");
}

#[test]
fn create_prints_the_available_volume() {
    let tmp = workdir();
    volctl(&tmp)
        .args(["volume", "new", "--volumename", "data", "--size", "3"])
        .assert()
        .success()
        .stdout(contains(r#""name": "data""#).and(contains(r#""status": "available""#)));
}

#[test]
fn create_renders_yaml_on_request() {
    let tmp = workdir();
    volctl(&tmp)
        .args(["--format", "yaml", "volume", "create", "--volumename", "data"])
        .args(["--size", "3"])
        .assert()
        .success()
        .stdout(contains("name: data").and(contains("status: available")));
}

#[test]
fn unknown_format_is_rejected_by_the_parser() {
    let tmp = workdir();
    volctl(&tmp)
        .args(["volume", "map", "--format", "xml"])
        .assert()
        .failure()
        .code(2)
        .stdout("");
}

#[test]
fn unknown_driver_is_rejected() {
    let tmp = workdir();
    volctl(&tmp)
        .args(["--driver", "ebs", "volume", "map"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(contains("unknown storage driver: ebs"));
}

#[rstest]
#[case::attach(&["volume", "attach", "--volumeid", "vol-missing"])]
#[case::path(&["volume", "path", "--volumename", "missing"])]
#[case::remove(&["volume", "rm", "--volumeid", "vol-missing"])]
fn unknown_volumes_fail_without_output(#[case] args: &[&str]) {
    let tmp = workdir();
    volctl(&tmp)
        .args(args)
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(contains("not found"));
}

#[test]
fn attach_requires_a_volume_id() {
    let tmp = workdir();
    volctl(&tmp)
        .args(["volume", "attach"])
        .assert()
        .failure()
        .stderr(contains("--volumeid"));
}
