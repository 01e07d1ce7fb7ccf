//! Smoke tests for the covpipe CLI
//!
//! These tests drive the real binary. The unix-only tests stand in a shell
//! script for the coverage tool.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin until assert_cmd is updated
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a command for the covpipe binary, isolated from the caller's settings
fn covpipe(settings: &Path) -> Command {
    let mut cmd = Command::cargo_bin("covpipe").expect("covpipe binary should exist");
    cmd.env_remove("COVPIPE_COVERAGE_TOOL")
        .env_remove("COVPIPE_TEST_RUNNER")
        .env_remove("RUST_LOG")
        .env("COVPIPE_SETTINGS", settings)
        .arg("--color")
        .arg("never");
    cmd
}

fn settings_in(dir: &TempDir) -> PathBuf {
    dir.path().join("settings.yaml")
}

// ============================================================================
// Basic CLI Tests
// ============================================================================

#[test]
fn test_version_flag() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.4.0"));
}

#[test]
fn test_help_flag() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config-doc"))
        .stdout(predicate::str::contains("relax"));
}

#[test]
fn test_no_args_fails() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir)).assert().failure();
}

#[test]
fn test_run_help_lists_report_flag() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--report"))
        .stdout(predicate::str::contains("--timeout-secs"));
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn test_settings_show_defaults() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .args(["settings", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dotcover.exe"))
        .stdout(predicate::str::contains("vstest.console.exe"));
}

#[test]
fn test_settings_set_excludes_persists() {
    let dir = TempDir::new().unwrap();
    let settings = settings_in(&dir);
    covpipe(&settings)
        .args(["settings", "set-excludes", "*.Generated;*.Fakes"])
        .assert()
        .success();

    let yaml = fs::read_to_string(&settings).unwrap();
    assert!(yaml.contains("*.Generated;*.Fakes"));

    covpipe(&settings)
        .args(["settings", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("*.Generated;*.Fakes"));
}

#[test]
fn test_malformed_settings_file_fails() {
    let dir = TempDir::new().unwrap();
    let settings = settings_in(&dir);
    fs::write(&settings, "unknown_key: [1, 2\n").unwrap();
    covpipe(&settings)
        .args(["settings", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

// ============================================================================
// Config document and relax
// ============================================================================

#[test]
fn test_config_doc_prints_analyse_params() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .args(["config-doc", "bin/App.Tests.dll", "--platform", "x64", "-w"])
        .arg(dir.path())
        .args(["--include", "App.*", "--test-case-filter", "Category=Unit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<AnalyseParams>"))
        .stdout(predicate::str::contains("/platform:X64 /logger:trx"))
        .stdout(predicate::str::contains("/testCaseFilter:Category=Unit"))
        .stdout(predicate::str::contains("<ModuleMask>App.*</ModuleMask>"));
    assert!(!dir.path().join("coverage").exists());
}

#[test]
fn test_relax_rewrites_report() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("index.html");
    fs::write(&report, r#"<html><iframe id="sourceCode"></iframe></html>"#).unwrap();

    covpipe(&settings_in(&dir))
        .arg("relax")
        .arg(&report)
        .assert()
        .success();

    let html = fs::read_to_string(&report).unwrap();
    assert!(html.contains("allow-scripts"));
}

#[test]
fn test_relax_missing_report_fails() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .arg("relax")
        .arg(dir.path().join("absent.html"))
        .assert()
        .failure();
}

// ============================================================================
// Run
// ============================================================================

#[test]
fn test_run_with_no_targets_succeeds() {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("ws");
    fs::create_dir_all(&workspace).unwrap();

    covpipe(&settings_in(&dir))
        .args(["run", "--format", "json", "-g", "**/*Tests.dll", "-p", "x64", "-w"])
        .arg(&workspace)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""result": "completed""#));

    assert!(workspace.join("coverage").is_dir());
    assert!(workspace.join("temp").is_dir());
    assert!(workspace.join("coverage/summary.json").is_file());
}

#[test]
fn test_run_rejects_zero_timeout() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .args(["run", "-g", "**/*Tests.dll", "-p", "x64", "--timeout-secs", "0", "-w"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout"));
}

#[test]
fn test_run_reads_run_file() {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("ws");
    fs::create_dir_all(&workspace).unwrap();
    fs::write(
        workspace.join("covpipe.yaml"),
        "test_assembly_glob: \"**/*Tests.dll\"\nplatform: X64\noutput_dir: cov-out\n",
    )
    .unwrap();

    covpipe(&settings_in(&dir))
        .args(["run", "-q", "-w"])
        .arg(&workspace)
        .assert()
        .success();

    assert!(workspace.join("cov-out").is_dir());
}

#[test]
fn test_run_without_platform_fails() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .args(["run", "-g", "**/*Tests.dll", "-w"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("platform is required"));
    assert!(!dir.path().join("coverage").exists());
}

#[test]
fn test_run_without_glob_fails() {
    let dir = TempDir::new().unwrap();
    covpipe(&settings_in(&dir))
        .args(["run", "-p", "x86", "-w"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("glob is required"));
}

#[cfg(unix)]
mod fake_tool {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const FAKE_TOOL: &str = r#"#!/bin/sh
case "$1" in
  Cover)
    out=$(sed -n 's:.*<Output>\(.*\)</Output>.*:\1:p' "$2")
    mkdir -p "$(dirname "$out")"
    echo snapshot > "$out"
    ;;
  Merge|Report)
    for arg in "$@"; do
      case "$arg" in
        /Output=*) out="${arg#/Output=}" ;;
      esac
    done
    mkdir -p "$(dirname "$out")"
    echo '<html><iframe id="sourceCode"></iframe></html>' > "$out"
    ;;
esac
echo "fake tool: $1"
exit ${FAKE_EXIT:-0}
"#;

    const TARGET_FLAGS: [&str; 4] = ["-g", "**/*Tests.dll", "-p", "x64"];

    fn install_fake_tool(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("fake-dotcover.sh");
        fs::write(&path, FAKE_TOOL).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn workspace_with_targets(dir: &TempDir) -> PathBuf {
        let workspace = dir.path().join("ws");
        fs::create_dir_all(workspace.join("a/bin")).unwrap();
        fs::create_dir_all(workspace.join("b/bin")).unwrap();
        fs::write(workspace.join("a/bin/A.Tests.dll"), b"").unwrap();
        fs::write(workspace.join("b/bin/B.Tests.dll"), b"").unwrap();
        workspace
    }

    #[test]
    fn test_end_to_end_with_fake_tool() {
        let dir = TempDir::new().unwrap();
        let tool = install_fake_tool(&dir);
        let workspace = workspace_with_targets(&dir);

        covpipe(&settings_in(&dir))
            .args(["run", "--format", "json", "-r", "HTML", "-r", "DetailedXML"])
            .args(TARGET_FLAGS)
            .arg("-w")
            .arg(&workspace)
            .arg("--coverage-tool")
            .arg(&tool)
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""result": "completed""#))
            .stderr(predicate::str::contains("fake tool: Merge"));

        let coverage = workspace.join("coverage");
        assert!(coverage.join("snapshot.cov").is_file());
        assert!(coverage.join("DetailedCoverage.xml").is_file());
        assert!(coverage.join("A.Tests.dll.DotCoverConfig.xml").is_file());

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(coverage.join("summary.json")).unwrap())
                .unwrap();
        let run_dir = workspace
            .join("temp")
            .join(summary["run_id"].as_str().unwrap());
        assert!(run_dir.join("B.Tests.dll.merge.cov").is_file());

        let html = fs::read_to_string(coverage.join("index.html")).unwrap();
        assert!(html.contains("allow-scripts"));
        let xml = fs::read_to_string(coverage.join("DetailedCoverage.xml")).unwrap();
        assert!(!xml.contains("allow-scripts"));
    }

    #[test]
    fn test_second_run_uses_fresh_temp_dir() {
        let dir = TempDir::new().unwrap();
        let tool = install_fake_tool(&dir);
        let workspace = workspace_with_targets(&dir);

        let run_id = || {
            covpipe(&settings_in(&dir))
                .args(["run", "-q"])
                .args(TARGET_FLAGS)
                .arg("-w")
                .arg(&workspace)
                .arg("--coverage-tool")
                .arg(&tool)
                .assert()
                .success();
            let summary: serde_json::Value = serde_json::from_str(
                &fs::read_to_string(workspace.join("coverage/summary.json")).unwrap(),
            )
            .unwrap();
            summary["run_id"].as_str().unwrap().to_string()
        };

        let first = run_id();
        let second = run_id();
        assert_ne!(first, second);
        assert!(workspace.join("temp").join(&first).is_dir());
        assert!(workspace
            .join("temp")
            .join(&second)
            .join("A.Tests.dll.merge.cov")
            .is_file());
    }

    #[test]
    fn test_tool_failure_fails_run() {
        let dir = TempDir::new().unwrap();
        let tool = install_fake_tool(&dir);
        let workspace = workspace_with_targets(&dir);

        covpipe(&settings_in(&dir))
            .env("FAKE_EXIT", "4")
            .arg("run")
            .args(TARGET_FLAGS)
            .arg("-w")
            .arg(&workspace)
            .arg("--coverage-tool")
            .arg(&tool)
            .assert()
            .failure()
            .stderr(predicate::str::contains("cover stage failed"))
            .stderr(predicate::str::contains("Exit code: 4"));

        let summary = fs::read_to_string(workspace.join("coverage/summary.json")).unwrap();
        assert!(summary.contains(r#""result": "failed""#));
        assert!(!workspace.join("coverage/snapshot.cov").exists());
    }

    #[test]
    fn test_coverage_tool_from_environment() {
        let dir = TempDir::new().unwrap();
        let tool = install_fake_tool(&dir);
        let workspace = workspace_with_targets(&dir);

        covpipe(&settings_in(&dir))
            .env("COVPIPE_COVERAGE_TOOL", &tool)
            .args(["run", "-q"])
            .args(TARGET_FLAGS)
            .arg("-w")
            .arg(&workspace)
            .assert()
            .success();

        assert!(workspace.join("coverage/snapshot.cov").is_file());
    }
}
