//! Signal driver and usage rules.
//!
//! Signals are keyed by file, scope path and lowercase name, so two
//! same-named signals in sibling generates stay apart. A reference binds to
//! the innermost enclosing scope that declares the name. Drivers in mutually
//! exclusive branches (for example two arms of an if-generate) are still
//! counted separately.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{base_name, is_unresolved_scalar, RuleContext};
use crate::facts::{SignalRow, Tables};
use crate::policy::types::{Rule, Violation};
use crate::scope;

#[derive(Debug, Default)]
struct Usage {
    drivers: usize,
    port_mapped: bool,
    read: bool,
}

type SignalKey<'a> = (&'a str, String, String);

/// Declared signals by (file, lowercase scope path, lowercase name).
struct Declarations<'a> {
    rows: BTreeMap<SignalKey<'a>, &'a SignalRow>,
}

impl<'a> Declarations<'a> {
    fn new(tables: &'a Tables) -> Self {
        let mut rows = BTreeMap::new();
        for signal in &tables.signals {
            let path = scope_of(&signal.scope, &signal.arch).to_ascii_lowercase();
            rows.entry((signal.file.as_str(), path, base_name(&signal.name)))
                .or_insert(signal);
        }
        Self { rows }
    }

    /// Key of the declaration `name` refers to from `scope`, if any.
    fn resolve(&self, file: &'a str, scope: &str, arch: &str, name: &str) -> Option<SignalKey<'a>> {
        let name = base_name(name);
        let path = scope_of(scope, arch).to_ascii_lowercase();
        let found = scope::ancestors(&path)
            .map(|p| (file, p.to_string(), name.clone()))
            .find(|key| self.rows.contains_key(key));
        found
    }
}

fn scope_of<'s>(scope: &'s str, arch: &'s str) -> &'s str {
    if scope.is_empty() {
        arch
    } else {
        scope
    }
}

pub fn drivers(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    let declared = Declarations::new(tables);

    let mut usage: HashMap<SignalKey<'_>, Usage> = HashMap::new();
    for process in &tables.processes {
        let resolve = |name: &str| declared.resolve(&process.file, &process.scope, &process.arch, name);
        // One process is one driver however often it assigns.
        let assigned: BTreeSet<SignalKey<'_>> =
            process.assigned_signals.iter().filter_map(|s| resolve(s.as_str())).collect();
        for key in assigned {
            usage.entry(key).or_default().drivers += 1;
        }
        for key in process.read_signals.iter().filter_map(|s| resolve(s.as_str())) {
            usage.entry(key).or_default().read = true;
        }
    }
    for assignment in &tables.assignments {
        let resolve =
            |name: &str| declared.resolve(&assignment.file, &assignment.scope, &assignment.arch, name);
        if let Some(key) = resolve(assignment.target.as_str()) {
            usage.entry(key).or_default().drivers += 1;
        }
        for key in assignment.read_signals.iter().filter_map(|s| resolve(s.as_str())) {
            usage.entry(key).or_default().read = true;
        }
    }
    // Port maps may drive or read; the direction of the formal is not known
    // here, so an actual counts as both.
    for instance in &tables.instances {
        for actual in instance.port_map.values() {
            let Some(key) = declared.resolve(&instance.file, &instance.scope, &instance.arch, actual) else {
                continue;
            };
            let entry = usage.entry(key).or_default();
            entry.port_mapped = true;
            entry.read = true;
        }
    }

    let mut violations = Vec::new();
    let idle = Usage::default();
    for (signal_key, signal) in &declared.rows {
        let used = usage.get(signal_key).unwrap_or(&idle);
        // Resolved and composite types may legally have several drivers.
        if used.drivers > 1 && is_unresolved_scalar(&signal.ty) {
            violations.push(Violation::new(
                Rule::MultiDrivenSignal,
                &signal.file,
                signal.line,
                format!(
                    "signal '{}' in {} has {} drivers",
                    signal.name, signal.scope, used.drivers
                ),
            ));
        }
        if used.read && used.drivers == 0 && !used.port_mapped {
            violations.push(Violation::new(
                Rule::UndrivenSignal,
                &signal.file,
                signal.line,
                format!("signal '{}' in {} is read but never assigned", signal.name, signal.scope),
            ));
        }
        if !used.read && used.drivers == 0 && !used.port_mapped {
            violations.push(Violation::new(
                Rule::UnusedSignal,
                &signal.file,
                signal.line,
                format!("signal '{}' in {} is never used", signal.name, signal.scope),
            ));
        }
    }
    violations
}
