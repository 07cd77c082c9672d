//! Process-level rules.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::{base_name, DesignIndex, RuleContext};
use crate::facts::{ProcessRow, Tables};
use crate::policy::types::{Rule, Violation};

/// Processes assigning more signals than this are reported as complex.
const MAX_ASSIGNED_SIGNALS: usize = 20;

fn label(process: &ProcessRow) -> &str {
    if process.label.is_empty() {
        "<unlabeled>"
    } else {
        &process.label
    }
}

/// Incomplete and superfluous sensitivity lists of combinational processes.
pub fn sensitivity(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    let index = DesignIndex::new(tables);

    // (file, arch) -> names that are real signals or ports there.
    let mut visible: HashMap<(&str, String), HashSet<String>> = HashMap::new();
    for signal in &tables.signals {
        visible
            .entry((signal.file.as_str(), signal.arch.to_ascii_lowercase()))
            .or_default()
            .insert(signal.name.to_ascii_lowercase());
    }

    let mut violations = Vec::new();
    for process in tables.processes.iter().filter(|p| p.is_combinational) {
        if process.sensitivity_list.is_empty() {
            continue;
        }
        let listed: BTreeSet<String> = process.sensitivity_list.iter().map(|s| base_name(s)).collect();
        if listed.contains("all") {
            continue;
        }

        let arch_key = (process.file.as_str(), process.arch.to_ascii_lowercase());
        let mut known: HashSet<String> = visible.get(&arch_key).cloned().unwrap_or_default();
        known.extend(
            index
                .ports_of(&process.file, &process.arch)
                .iter()
                .filter(|p| p.direction != "out")
                .map(|p| p.name.to_ascii_lowercase()),
        );

        let read: BTreeSet<String> = process.read_signals.iter().map(|s| base_name(s)).collect();
        let missing: Vec<&str> = read
            .iter()
            .filter(|name| known.contains(*name) && !listed.contains(*name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            violations.push(Violation::new(
                Rule::SensitivityListIncomplete,
                &process.file,
                process.line,
                format!(
                    "process '{}' reads {} but does not list {} in its sensitivity list",
                    label(process),
                    missing.join(", "),
                    if missing.len() == 1 { "it" } else { "them" }
                ),
            ));
        }

        let superfluous: Vec<&str> = listed
            .iter()
            .filter(|name| !read.contains(*name))
            .map(String::as_str)
            .collect();
        if !superfluous.is_empty() {
            violations.push(Violation::new(
                Rule::SensitivityListSuperfluous,
                &process.file,
                process.line,
                format!(
                    "process '{}' lists {} but never reads {}",
                    label(process),
                    superfluous.join(", "),
                    if superfluous.len() == 1 { "it" } else { "them" }
                ),
            ));
        }
    }
    violations
}

pub fn complex_process(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    tables
        .processes
        .iter()
        .filter_map(|process| {
            let assigned: HashSet<String> =
                process.assigned_signals.iter().map(|s| base_name(s)).collect();
            (assigned.len() > MAX_ASSIGNED_SIGNALS).then(|| {
                Violation::new(
                    Rule::ComplexProcess,
                    &process.file,
                    process.line,
                    format!(
                        "process '{}' assigns {} signals (more than {})",
                        label(process),
                        assigned.len(),
                        MAX_ASSIGNED_SIGNALS
                    ),
                )
            })
        })
        .collect()
}

/// Case statements without `others` in combinational processes infer
/// latches when a choice is left out.
pub fn comb_process_no_default(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    let combinational: HashSet<(&str, String, String)> = tables
        .processes
        .iter()
        .filter(|p| p.is_combinational && !p.label.is_empty())
        .map(|p| {
            (
                p.file.as_str(),
                p.arch.to_ascii_lowercase(),
                p.label.to_ascii_lowercase(),
            )
        })
        .collect();

    tables
        .case_statements
        .iter()
        .filter(|c| !c.has_others && !c.process.is_empty())
        .filter(|c| {
            combinational.contains(&(
                c.file.as_str(),
                c.arch.to_ascii_lowercase(),
                c.process.to_ascii_lowercase(),
            ))
        })
        .map(|c| {
            Violation::new(
                Rule::CombProcessNoDefault,
                &c.file,
                c.line,
                format!(
                    "case on '{}' in combinational process '{}' has no others branch",
                    c.expression, c.process
                ),
            )
        })
        .collect()
}
