//! Rules over resolved dependencies and library contents.

use std::collections::HashMap;

use super::RuleContext;
use crate::facts::Tables;
use crate::policy::types::{Rule, Violation};
use crate::resolve::{KIND_CONTEXT, KIND_INSTANTIATION, KIND_LIBRARY, KIND_USE};

pub fn unresolved_dependencies(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for dep in tables.dependencies.iter().filter(|d| !d.resolved) {
        let violation = match dep.kind.as_str() {
            KIND_INSTANTIATION if dep.candidates.len() > 1 => Violation::new(
                Rule::AmbiguousInstantiation,
                &dep.source,
                dep.line,
                format!(
                    "instance of '{}' matches several units: {}",
                    dep.target,
                    dep.candidates.join(", ")
                ),
            ),
            KIND_INSTANTIATION => Violation::new(
                Rule::UnresolvedDependency,
                &dep.source,
                dep.line,
                format!("instantiated unit '{}' is not declared in any library", dep.target),
            ),
            KIND_USE | KIND_CONTEXT => Violation::new(
                Rule::UnresolvedUse,
                &dep.source,
                dep.line,
                format!("{} clause '{}' does not resolve", dep.kind, dep.target),
            ),
            KIND_LIBRARY => Violation::new(
                Rule::UnknownLibrary,
                &dep.source,
                dep.line,
                format!("library '{}' has no design files and is not a standard library", dep.target),
            ),
            other => {
                tracing::debug!(kind = other, "skipping dependency of unknown kind");
                continue;
            }
        };
        violations.push(violation);
    }
    violations
}

pub fn duplicate_units(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();

    let entities = tables
        .entities
        .iter()
        .map(|e| (e.library.as_str(), e.name.as_str(), e.file.as_str(), e.line));
    report_duplicates(entities, Rule::DuplicateEntityInLibrary, "entity", &mut violations);

    let packages = tables
        .packages
        .iter()
        .map(|p| (p.library.as_str(), p.name.as_str(), p.file.as_str(), p.line));
    report_duplicates(packages, Rule::DuplicatePackageInLibrary, "package", &mut violations);

    violations
}

fn report_duplicates<'a>(
    units: impl Iterator<Item = (&'a str, &'a str, &'a str, usize)>,
    rule: Rule,
    what: &str,
    out: &mut Vec<Violation>,
) {
    let mut units: Vec<_> = units.collect();
    units.sort_by(|a, b| (a.2, a.3).cmp(&(b.2, b.3)));

    let mut first_seen: HashMap<(String, String), (&str, usize)> = HashMap::new();
    for (library, name, file, line) in units {
        let key = (library.to_ascii_lowercase(), name.to_ascii_lowercase());
        match first_seen.get(&key) {
            Some((first_file, first_line)) => out.push(Violation::new(
                rule,
                file,
                line,
                format!(
                    "{} '{}' is already declared in library '{}' (first seen at {}:{})",
                    what, name, library, first_file, first_line
                ),
            )),
            None => {
                first_seen.insert(key, (file, line));
            }
        }
    }
}
