//! Daemon protocol tests, both in-process and over a real subprocess.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use hdlcheck::daemon::{serve, DaemonClient, DaemonError, Evaluator};
use hdlcheck::facts::{collect_fact_files, load_all, Delta, Tables};
use hdlcheck::policy::{CheckRegistry, Engine, Rule, RuleConfig};
use hdlcheck::resolve::{Indexer, LibraryMap};
use hdlcheck::Config;

fn testdata(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(rel)
}

fn tables_without(skip: &str) -> Tables {
    let config = Config::parse_file(testdata("project/hdlcheck.yaml")).unwrap();
    let files = collect_fact_files(&[testdata("project/facts")]).unwrap();
    let facts: Vec<_> = load_all(&files)
        .unwrap()
        .into_iter()
        .filter(|f| f.path != skip)
        .collect();
    Indexer::new(LibraryMap::from_config(&config).unwrap()).build(&facts)
}

fn full_tables() -> Tables {
    tables_without("")
}

fn evaluator() -> Evaluator {
    Evaluator::new(Engine::new(CheckRegistry::builtin().unwrap()), RuleConfig::default())
}

fn run_session(lines: &[String]) -> Vec<Value> {
    let input = lines.join("\n") + "\n";
    let mut output = Vec::new();
    serve(&mut evaluator(), Cursor::new(input), &mut output).unwrap();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_delta_without_removed_is_rejected() {
    let init = json!({"kind": "init", "tables": full_tables()}).to_string();
    let bad = json!({"kind": "delta", "added": {}}).to_string();
    let snapshot = json!({"kind": "snapshot"}).to_string();

    let replies = run_session(&[init, bad, snapshot]);
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["kind"], "result");
    assert_eq!(replies[1]["kind"], "error");
    assert!(replies[1]["message"].as_str().unwrap().contains("removed"));

    let mut before = replies[0].clone();
    let mut after = replies[2].clone();
    before.as_object_mut().unwrap().remove("kind");
    after.as_object_mut().unwrap().remove("kind");
    assert_eq!(before, after);
}

#[test]
fn test_snapshot_before_init_is_an_error() {
    let replies = run_session(&[json!({"kind": "snapshot"}).to_string()]);
    assert_eq!(replies[0]["kind"], "error");
}

#[test]
fn test_delta_result_equals_fresh_init() {
    let full = full_tables();
    let reduced = tables_without("rtl/pkg.vhd");
    let delta = Delta::compute(&full, &reduced);

    let mut incremental = evaluator();
    incremental.init(full);
    let via_delta = incremental.delta(&delta).unwrap();

    let via_init = evaluator().init(reduced);
    assert_eq!(via_delta, via_init);
    assert!(via_init.violations.iter().any(|v| v.rule == Rule::UnresolvedUse));
}

#[test]
fn test_unknown_field_names_the_side() {
    let init = json!({"kind": "init", "tables": full_tables()}).to_string();
    let bad = json!({
        "kind": "delta",
        "added": {},
        "removed": {"entities": [{"name": "x", "library": "mylib", "file": "a.vhd", "line": 1, "colour": "red"}]}
    })
    .to_string();
    let replies = run_session(&[init, bad]);
    assert_eq!(replies[1]["kind"], "error");
    assert!(replies[1]["message"].as_str().unwrap().contains("removed"));
}

#[test]
fn test_subprocess_round_trip() {
    let program = Path::new(env!("CARGO_BIN_EXE_hdlcheck"));
    let mut client = DaemonClient::spawn_program(program, &["--no-cache"]).unwrap();

    let full = full_tables();
    let reduced = tables_without("rtl/pkg.vhd");

    let first = client.init(full.clone()).unwrap();
    assert_eq!(first.violations.len(), 1);
    assert_eq!(first.violations[0].rule, Rule::UnresolvedDependency);

    let second = client.delta(Delta::compute(&full, &reduced)).unwrap();
    assert_eq!(second, evaluator().init(reduced));
    assert_eq!(client.snapshot().unwrap(), second);

    let err = client
        .send_line(r#"{"kind": "delta", "added": {}}"#)
        .unwrap_err();
    assert!(matches!(err, DaemonError::Remote(_)), "{}", err);
    assert_eq!(client.snapshot().unwrap(), second);
}
