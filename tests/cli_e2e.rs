//! End-to-end CLI tests for the tagscrape binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tagscrape() -> Command {
    let mut cmd = Command::cargo_bin("tagscrape").unwrap();
    // Keep the user's config file out of the tests.
    cmd.arg("--no-config").env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    tagscrape()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Download every image for a tag"))
        .stdout(predicate::str::contains("--progress-file"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    tagscrape()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tagscrape"));
}

/// Test that missing required arguments cause a usage error.
#[test]
fn test_binary_missing_required_args_fails() {
    tagscrape()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--site"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    tagscrape()
        .args(["--site", "zerochan", "--tag", "cat", "-n", "1", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Test that an unknown site is rejected with the accepted values listed.
#[test]
fn test_binary_unknown_site_lists_choices() {
    tagscrape()
        .args(["--site", "gelbooru", "--tag", "cat", "-n", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("zerochan"));
}

/// Test that a corrupt progress file stops the run before any request.
#[test]
fn test_binary_corrupt_progress_file_fails() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");
    std::fs::write(&progress, "{not json").unwrap();

    tagscrape()
        .args(["--site", "zerochan", "--tag", "cat", "-n", "1", "-q"])
        .arg("--progress-file")
        .arg(&progress)
        .arg("--output-dir")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to resume"));
}

/// Test that pixiv without cookies or a browser fails authentication and
/// reports where it stopped.
#[test]
fn test_binary_pixiv_without_session_reports_stop_point() {
    let dir = TempDir::new().unwrap();
    let cookies = dir.path().join("missing-cookies.txt");

    tagscrape()
        .args(["--site", "pixiv", "--tag", "cat", "-n", "2", "--start-page", "4", "-q"])
        .arg("--cookies")
        .arg(&cookies)
        .arg("--output-dir")
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("authentication failed"))
        .stderr(predicate::str::contains("Stopped at page 4, slot 0"));
}
