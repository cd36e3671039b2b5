//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("vmlease");
    cmd.assert()
        .failure()
        .stderr(contains("Usage"))
        .stderr(contains("up"))
        .stderr(contains("sweep"));
}

#[test]
fn cli_up_help_lists_overrides() {
    let mut cmd = cargo_bin_cmd!("vmlease");
    cmd.args(["up", "--help"]);
    cmd.assert()
        .success()
        .stdout(contains("--flavor"))
        .stdout(contains("--hold"))
        .stdout(contains("--cloud-init-file"));
}

#[test]
fn cli_rejects_conflicting_user_data_flags() {
    let mut cmd = cargo_bin_cmd!("vmlease");
    cmd.args([
        "up",
        "--cloud-init",
        "#cloud-config",
        "--cloud-init-file",
        "/tmp/user-data.yml",
    ]);
    cmd.assert().failure().code(2);
}

#[test]
fn cli_up_without_credentials_exits_with_configuration_error() {
    let tmp = tempfile::TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("vmlease");
    cmd.current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path())
        .env_remove("VMLEASE_CONFIG_PATH")
        .env("HYPERSTACK_API_KEY", "")
        .env("HYPERSTACK_ENVIRONMENT_NAME", "default-CANADA-1")
        .env("HYPERSTACK_KEY_NAME", "ci-key")
        .env("HYPERSTACK_IMAGE_NAME", "Ubuntu Server 22.04 LTS")
        .env("HYPERSTACK_FLAVOR_NAME", "n3-A100x1")
        .args(["up"]);

    cmd.assert()
        .code(1)
        .stdout("")
        .stderr(contains("configuration error"));
}
