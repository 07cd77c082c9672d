//! Construct detection and verification checks over testdata/verification.

use std::path::{Path, PathBuf};

use hdlcheck::facts::{collect_fact_files, load_all};
use hdlcheck::policy::{CheckRegistry, Engine, EvalResult, Rule, RuleConfig, RuleSetting};
use hdlcheck::resolve::{Indexer, LibraryMap};

fn testdata(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(rel)
}

fn evaluate(file: &str, config: &RuleConfig) -> EvalResult {
    let files = collect_fact_files(&[testdata(file)]).unwrap();
    let facts = load_all(&files).unwrap();
    let tables = Indexer::new(LibraryMap::single("mylib")).build(&facts);
    Engine::new(CheckRegistry::builtin().unwrap()).evaluate(&tables, config)
}

#[test]
fn test_rtl_tags_do_not_cover_gate() {
    let result = evaluate("verification/ctrl.json", &RuleConfig::default());

    assert_eq!(result.missing_checks.len(), 1);
    let task = &result.missing_checks[0];
    assert_eq!(task.scope, "arch:gate");
    assert_eq!(task.file, "rtl/ctrl.vhd");
    assert_eq!(task.missing_ids.len(), 3);
    assert!(!task.anchor.exists);
    assert_eq!(task.anchor.line_start, 50);

    let block: Vec<_> = result
        .violations
        .iter()
        .filter(|v| v.rule == Rule::MissingVerificationBlock)
        .collect();
    assert_eq!(block.len(), 1);
    assert!(result
        .violations
        .iter()
        .filter(|v| v.rule == Rule::MissingVerificationCheck)
        .all(|v| v.message.contains("arch:gate")));
}

#[test]
fn test_disabling_missing_checks_drops_tasks() {
    let config = RuleConfig::default().set(Rule::MissingVerificationCheck, RuleSetting::Off);
    let result = evaluate("verification/ctrl.json", &config);
    assert!(result.missing_checks.is_empty());
    assert!(result
        .violations
        .iter()
        .all(|v| v.rule != Rule::MissingVerificationCheck));
}

#[test]
fn test_ambiguous_handshake_is_surfaced() {
    let result = evaluate("verification/sink.json", &RuleConfig::default());

    assert_eq!(result.ambiguous_constructs.len(), 1);
    let amb = &result.ambiguous_constructs[0];
    assert_eq!(amb.kind, "ready_valid");
    assert_eq!(amb.file, "rtl/sink.vhd");
    assert_eq!(amb.candidates["valid"], vec!["a_sig", "b_sig"]);
    assert!(result.missing_checks.is_empty());

    let rules: Vec<Rule> = result.violations.iter().map(|v| v.rule).collect();
    assert_eq!(rules, vec![Rule::AmbiguousConstruct]);
}
