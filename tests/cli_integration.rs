//! Tests for the hdlcheck binary: exit codes and output formats.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use hdlcheck::facts::{Delta, Tables};
use hdlcheck::report::JsonReport;

fn testdata(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(rel)
}

fn hdlcheck(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hdlcheck"))
        .args(args)
        .env_remove("HDLCHECK_CHECK_REGISTRY")
        .output()
        .expect("should run hdlcheck")
}

fn facts_dir() -> String {
    testdata("project/facts").to_string_lossy().into_owned()
}

fn config_path() -> String {
    testdata("project/hdlcheck.yaml").to_string_lossy().into_owned()
}

#[test]
fn test_lint_json_fails_on_errors() {
    let output = hdlcheck(&["lint", &facts_dir(), "--config", &config_path(), "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));

    let report: JsonReport = serde_json::from_slice(&output.stdout).expect("stdout should be a JSON report");
    assert!(!report.passed);
    assert_eq!(report.files_analyzed, 4);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.violations[0].file, "rtl/top.vhd");
}

#[test]
fn test_lint_passes_with_downgraded_rule() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("hdlcheck.yaml");
    let base = fs::read_to_string(config_path()).unwrap();
    fs::write(&config, base + "rules:\n  unresolved_dependency: warning\n").unwrap();

    let output = hdlcheck(&["lint", &facts_dir(), "--config", &config.to_string_lossy(), "--format", "sarif"]);
    assert_eq!(output.status.code(), Some(0));

    let sarif: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = sarif["runs"][0]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["level"], "warning");
    assert_eq!(results[0]["ruleId"], "unresolved_dependency");
}

#[test]
fn test_invalid_config_exits_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("hdlcheck.yaml");
    fs::write(&config, "rules:\n  no_such_rule: error\n").unwrap();

    let output = hdlcheck(&["lint", &facts_dir(), "--config", &config.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no_such_rule"));
}

#[test]
fn test_invalid_format_exits_with_error() {
    let output = hdlcheck(&["lint", &facts_dir(), "--config", &config_path(), "--format", "xml"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_tables_then_delta() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("tables.json");
    let output = hdlcheck(&["tables", &facts_dir(), "--config", &config_path(), "-o", &out.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(0));

    let tables: Tables = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(tables.files.len(), 4);

    let mut trimmed = tables.clone();
    trimmed.signals.clear();
    let trimmed_path = dir.path().join("trimmed.json");
    fs::write(&trimmed_path, serde_json::to_string(&trimmed).unwrap()).unwrap();

    let output = hdlcheck(&["delta", &out.to_string_lossy(), &trimmed_path.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(0));
    let delta: Delta = serde_json::from_slice(&output.stdout).unwrap();
    assert!(delta.added.is_empty());
    assert_eq!(delta.removed.signals, tables.signals);
}

#[test]
fn test_impact_json() {
    let output = hdlcheck(&["impact", "rtl/pkg.vhd", &facts_dir(), "--config", &config_path(), "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let levels: Vec<Vec<String>> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(levels, vec![vec!["rtl/alu.vhd".to_string(), "rtl/top.vhd".to_string()]]);

    let output = hdlcheck(&["impact", "rtl/nowhere.vhd", &facts_dir(), "--config", &config_path()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_init_writes_starter_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hdlcheck.yaml");
    let output = hdlcheck(&["init", "--output", &path.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(0));
    assert!(path.is_file());

    let output = hdlcheck(&["init", "--output", &path.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(2));
}
