//! End-to-end tests driving the `aprel` binary.

use std::path::Path;
use std::process::{Command, Output};

const RELEASES: &str = r#"[
    {"tag_name": "v2.9", "name": "Async-profiler 2.9", "assets": []},
    {"tag_name": "v2.8.3", "name": "Async-profiler 2.8.3", "assets": []},
    {"tag_name": "v1.8.8", "assets": []}
]"#;

fn aprel(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_aprel"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("APREL_RUNTIME_VERSIONS")
        .env_remove("APREL_CACHE_TTL_SECS")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

/// A project root whose release list is already cached, so no network is
/// needed. The configured endpoint is unroutable on purpose.
fn offline_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("aprel.toml"),
        "[upstream]\nreleases_url = \"http://127.0.0.1:9/releases\"\n",
    )
    .unwrap();
    std::fs::create_dir_all(dir.path().join(".cache")).unwrap();
    std::fs::write(dir.path().join(".cache/releases.json"), RELEASES).unwrap();
    dir
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    let output = aprel(dir.path(), &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("current_version"));
    assert!(stdout.contains("deploy_release"));
}

#[test]
fn test_no_command_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    let output = aprel(dir.path(), &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Commands:"));
}

#[test]
fn test_unknown_command_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = aprel(dir.path(), &["publish"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown command: publish"));
}

#[test]
fn test_clear_twice() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("releases")).unwrap();
    std::fs::create_dir_all(dir.path().join(".tests/sub")).unwrap();

    let first = aprel(dir.path(), &["clear"]);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(!dir.path().join("releases").exists());
    assert!(!dir.path().join(".tests").exists());

    let second = aprel(dir.path(), &["clear"]);
    assert!(second.status.success());
}

#[test]
fn test_versions_from_cache() {
    let dir = offline_root();

    let output = aprel(dir.path(), &["versions", "current_version"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "2.9 2.8.3\n2.9\n");
}

#[test]
fn test_unknown_version_fails() {
    let dir = offline_root();

    let output = aprel(dir.path(), &["download", "3.1"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Release 3.1 not found, available releases are: 2.9, 2.8.3"));
}

#[test]
fn test_version_is_only_resolved_when_needed() {
    let dir = offline_root();

    let clear = aprel(dir.path(), &["clear", "3.1"]);
    assert!(clear.status.success(), "{}", String::from_utf8_lossy(&clear.stderr));

    std::fs::create_dir_all(dir.path().join(".tests")).unwrap();
    let test = aprel(dir.path(), &["clear", "test", "3.1"]);
    assert_eq!(test.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&test.stderr).contains("Release 3.1 not found"));
    // clear ran before the release was needed
    assert!(!dir.path().join(".tests").exists());
}
