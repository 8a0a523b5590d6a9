//! Behavioural smoke tests for the CLI entrypoints.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn loadctl_displays_help() {
    let mut cmd = cargo_bin_cmd!("loadctl");
    cmd.arg("--help");
    cmd.assert().success().stdout(contains("--url"));
}

#[test]
fn loadctl_reports_missing_url() {
    let mut cmd = cargo_bin_cmd!("loadctl");
    cmd.env_clear();
    cmd.args(["--loadLevels", "1,2", "--noReset"]);
    cmd.assert().failure().code(1).stderr(contains("url"));
}

#[test]
fn janitor_displays_help() {
    let mut cmd = cargo_bin_cmd!("loadctl-janitor");
    cmd.arg("--help");
    cmd.assert().success().stdout(contains("--doApiKey"));
}

#[test]
fn janitor_rejects_blank_tag() {
    let mut cmd = cargo_bin_cmd!("loadctl-janitor");
    cmd.env_clear();
    cmd.args(["--doApiKey", "token", "--tag", ""]);
    cmd.assert().failure();
}
