//! Dependency resolution and the reverse impact graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use super::library::is_standard_library;
use super::symbols::SymbolTable;
use crate::facts::{DependencyRow, Tables};

pub const KIND_LIBRARY: &str = "library";
pub const KIND_USE: &str = "use";
pub const KIND_CONTEXT: &str = "context";
pub const KIND_INSTANTIATION: &str = "instantiation";

/// Resolves the references of every file against a finished symbol table.
pub struct DependencyResolver<'a> {
    symbols: &'a SymbolTable,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self { symbols }
    }

    pub fn resolve(&self, tables: &Tables) -> Vec<DependencyRow> {
        let mut deps = Vec::new();

        for clause in &tables.library_clauses {
            let library = clause.library.trim();
            let own = self.symbols.file_library(&clause.file);
            let resolved_to = if library.eq_ignore_ascii_case("work") {
                own.map(str::to_string)
            } else if is_standard_library(library) || self.symbols.has_library(library) {
                Some(library.to_ascii_lowercase())
            } else {
                None
            };
            deps.push(DependencyRow {
                source: clause.file.clone(),
                target: library.to_string(),
                kind: KIND_LIBRARY.to_string(),
                line: clause.line,
                resolved: resolved_to.is_some(),
                resolved_to,
                candidates: Vec::new(),
            });
        }

        for clause in &tables.use_clauses {
            let target = substitute_work(strip_all(&clause.item), self.symbols.file_library(&clause.file));
            let resolved_to = self.resolve_selected(&target);
            deps.push(DependencyRow {
                source: clause.file.clone(),
                target,
                kind: KIND_USE.to_string(),
                line: clause.line,
                resolved: resolved_to.is_some(),
                resolved_to,
                candidates: Vec::new(),
            });
        }

        for clause in &tables.context_clauses {
            let target = substitute_work(clause.name.trim(), self.symbols.file_library(&clause.file));
            let resolved_to = self.resolve_selected(&target);
            deps.push(DependencyRow {
                source: clause.file.clone(),
                target,
                kind: KIND_CONTEXT.to_string(),
                line: clause.line,
                resolved: resolved_to.is_some(),
                resolved_to,
                candidates: Vec::new(),
            });
        }

        for instance in &tables.instances {
            let own = self.symbols.file_library(&instance.file);
            let target = substitute_work(&instance_unit(&instance.target), own);
            let (resolved_to, candidates) = self.resolve_unit(&target, own);
            deps.push(DependencyRow {
                source: instance.file.clone(),
                target,
                kind: KIND_INSTANTIATION.to_string(),
                line: instance.line,
                resolved: resolved_to.is_some(),
                resolved_to,
                candidates,
            });
        }

        let unresolved = deps.iter().filter(|d| !d.resolved).count();
        tracing::debug!(total = deps.len(), unresolved, "resolved dependencies");
        deps
    }

    /// Longest prefix of a selected name (at least `lib.unit`) that is a
    /// symbol, or the name itself when it lives in a standard library.
    fn resolve_selected(&self, target: &str) -> Option<String> {
        let lower = target.to_ascii_lowercase();
        let segments: Vec<&str> = lower.split('.').collect();
        if segments.len() < 2 {
            return None;
        }
        if is_standard_library(segments[0]) {
            return Some(lower);
        }
        (2..=segments.len())
            .rev()
            .map(|n| segments[..n].join("."))
            .find(|prefix| self.symbols.contains(prefix))
    }

    /// A qualified unit must exist. A bare unit prefers the file's own
    /// library, then any single match. Several matches leave it unresolved
    /// with the candidates listed.
    fn resolve_unit(&self, target: &str, own: Option<&str>) -> (Option<String>, Vec<String>) {
        if target.contains('.') {
            let lower = target.to_ascii_lowercase();
            let found = self.symbols.is_unit(&lower);
            return (found.then_some(lower), Vec::new());
        }

        let candidates = self.symbols.candidates_for_unit(target);
        if let Some(own) = own {
            let local = format!("{}.{}", own, target.to_ascii_lowercase());
            if candidates.contains(&local) {
                return (Some(local), Vec::new());
            }
        }
        match candidates.len() {
            0 => (None, Vec::new()),
            1 => (candidates.into_iter().next(), Vec::new()),
            _ => (None, candidates),
        }
    }
}

fn strip_all(item: &str) -> &str {
    let item = item.trim();
    let split = item.len().saturating_sub(4);
    match (item.get(..split), item.get(split..)) {
        (Some(head), Some(tail)) if !head.is_empty() && tail.eq_ignore_ascii_case(".all") => head,
        _ => item,
    }
}

/// Replace a leading `work` segment with the file's own library.
fn substitute_work(name: &str, own: Option<&str>) -> String {
    match (name.split_once('.'), own) {
        (Some((first, rest)), Some(own)) if first.eq_ignore_ascii_case("work") => {
            format!("{}.{}", own, rest)
        }
        _ => name.to_string(),
    }
}

/// `entity work.cpu(rtl)` -> `work.cpu`, `component fifo` -> `fifo`.
fn instance_unit(target: &str) -> String {
    let mut unit = target.trim();
    for keyword in ["entity ", "component ", "configuration "] {
        let head = unit.get(..keyword.len());
        if unit.len() > keyword.len() && head.is_some_and(|h| h.eq_ignore_ascii_case(keyword)) {
            unit = unit[keyword.len()..].trim_start();
            break;
        }
    }
    if let Some(open) = unit.find('(') {
        unit = &unit[..open];
    }
    unit.trim().to_string()
}

/// Reverse dependency graph: which files are affected when a file changes.
#[derive(Debug, Default)]
pub struct DependentsGraph {
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependentsGraph {
    pub fn build(tables: &Tables) -> Self {
        let mut declared_in: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for symbol in &tables.symbols {
            declared_in
                .entry(symbol.name.as_str())
                .or_default()
                .insert(symbol.file.as_str());
        }

        let mut graph = DependentsGraph::default();
        for dep in &tables.dependencies {
            let Some(target) = dep.resolved_to.as_deref() else {
                continue;
            };
            let Some(files) = declared_in.get(target) else {
                continue;
            };
            for &file in files {
                if file != dep.source {
                    graph
                        .dependents
                        .entry(file.to_string())
                        .or_default()
                        .insert(dep.source.clone());
                }
            }
        }
        graph
    }

    /// Files that directly depend on `file`.
    pub fn dependents(&self, file: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(file)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Transitive dependents of `file`, grouped by distance. `file` itself
    /// is not included.
    pub fn impact(&self, file: &str) -> Vec<Vec<String>> {
        let mut levels = Vec::new();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        visited.insert(file);
        let mut frontier: VecDeque<&str> = VecDeque::from([file]);

        while !frontier.is_empty() {
            let mut next = BTreeSet::new();
            for current in frontier.drain(..) {
                for dependent in self.dependents(current) {
                    if visited.insert(dependent) {
                        next.insert(dependent);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier.extend(next.iter().copied());
            levels.push(next.into_iter().map(str::to_string).collect());
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{
        EntityRow, FileRow, InstanceRow, LibraryClauseRow, PackageRow, UseClauseRow,
    };

    fn file(path: &str, library: &str) -> FileRow {
        FileRow {
            path: path.into(),
            library: library.into(),
            is_third_party: false,
        }
    }

    fn entity(name: &str, library: &str, file: &str) -> EntityRow {
        EntityRow {
            name: name.into(),
            library: library.into(),
            file: file.into(),
            line: 1,
        }
    }

    fn instance(target: &str, file: &str, line: usize) -> InstanceRow {
        InstanceRow {
            name: format!("u{}", line),
            target: target.into(),
            arch: "rtl".into(),
            scope: "rtl".into(),
            port_map: Default::default(),
            generic_map: Default::default(),
            file: file.into(),
            line,
        }
    }

    fn use_clause(item: &str, file: &str) -> UseClauseRow {
        UseClauseRow {
            item: item.into(),
            file: file.into(),
            line: 2,
        }
    }

    fn design() -> Tables {
        Tables {
            files: vec![
                file("pkg.vhd", "mylib"),
                file("cpu.vhd", "mylib"),
                file("top.vhd", "mylib"),
                file("alt.vhd", "other"),
                file("third.vhd", "third"),
            ],
            entities: vec![
                entity("cpu", "mylib", "cpu.vhd"),
                entity("top", "mylib", "top.vhd"),
                entity("fifo", "other", "alt.vhd"),
                entity("fifo", "third", "third.vhd"),
            ],
            packages: vec![PackageRow {
                name: "types_pkg".into(),
                library: "mylib".into(),
                file: "pkg.vhd".into(),
                line: 1,
            }],
            ..Default::default()
        }
    }

    fn resolve(tables: &Tables) -> Vec<DependencyRow> {
        let symbols = SymbolTable::register(tables);
        DependencyResolver::new(&symbols).resolve(tables)
    }

    #[test]
    fn test_work_is_the_files_own_library() {
        let mut tables = design();
        tables.use_clauses = vec![use_clause("work.types_pkg.all", "cpu.vhd"), use_clause("WORK.Types_Pkg.ALL", "alt.vhd")];
        let deps = resolve(&tables);

        let mine = deps.iter().find(|d| d.source == "cpu.vhd").unwrap();
        assert!(mine.resolved);
        assert_eq!(mine.target, "mylib.types_pkg");
        assert_eq!(mine.resolved_to.as_deref(), Some("mylib.types_pkg"));

        let theirs = deps.iter().find(|d| d.source == "alt.vhd").unwrap();
        assert!(!theirs.resolved);
        assert_eq!(theirs.target, "other.Types_Pkg");
    }

    #[test]
    fn test_use_resolves_longest_prefix_and_standard_libraries() {
        let mut tables = design();
        tables.use_clauses = vec![
            use_clause("mylib.types_pkg.state_t", "top.vhd"),
            use_clause("ieee.std_logic_1164.all", "top.vhd"),
            use_clause("mylib.missing_pkg.all", "top.vhd"),
        ];
        let deps = resolve(&tables);
        let by_target = |t: &str| deps.iter().find(|d| d.target == t).unwrap();
        assert_eq!(by_target("mylib.types_pkg.state_t").resolved_to.as_deref(), Some("mylib.types_pkg"));
        assert!(by_target("ieee.std_logic_1164").resolved);
        assert!(!by_target("mylib.missing_pkg").resolved);
    }

    #[test]
    fn test_library_clauses() {
        let mut tables = design();
        tables.library_clauses = ["ieee", "work", "other", "nowhere"]
            .iter()
            .map(|lib| LibraryClauseRow {
                library: lib.to_string(),
                file: "top.vhd".into(),
                line: 1,
            })
            .collect();
        let deps = resolve(&tables);
        let resolved: Vec<(&str, bool)> = deps.iter().map(|d| (d.target.as_str(), d.resolved)).collect();
        assert_eq!(
            resolved,
            vec![("ieee", true), ("work", true), ("other", true), ("nowhere", false)]
        );
        assert_eq!(deps[1].resolved_to.as_deref(), Some("mylib"));
    }

    #[test]
    fn test_instantiation_resolution() {
        let mut tables = design();
        tables.instances = vec![
            instance("entity work.cpu(rtl)", "top.vhd", 10),
            instance("CPU", "top.vhd", 11),
            instance("fifo", "top.vhd", 12),
            instance("fifo", "alt.vhd", 13),
            instance("other.fifo", "top.vhd", 14),
            instance("ghost", "top.vhd", 15),
        ];
        let deps = resolve(&tables);
        let at = |line: usize| deps.iter().find(|d| d.line == line).unwrap();

        assert_eq!(at(10).target, "mylib.cpu");
        assert_eq!(at(10).resolved_to.as_deref(), Some("mylib.cpu"));
        assert_eq!(at(11).resolved_to.as_deref(), Some("mylib.cpu"));

        // Two libraries declare fifo and top.vhd owns neither.
        assert!(!at(12).resolved);
        assert_eq!(at(12).candidates, vec!["other.fifo", "third.fifo"]);

        // The own library wins.
        assert_eq!(at(13).resolved_to.as_deref(), Some("other.fifo"));
        assert!(at(14).resolved);
        assert!(!at(15).resolved);
        assert!(at(15).candidates.is_empty());
    }

    #[test]
    fn test_instance_unit_parsing() {
        assert_eq!(instance_unit("entity work.cpu(rtl)"), "work.cpu");
        assert_eq!(instance_unit("ENTITY lib.x"), "lib.x");
        assert_eq!(instance_unit("component fifo"), "fifo");
        assert_eq!(instance_unit("alu"), "alu");
        assert_eq!(strip_all("ieee.numeric_std.ALL"), "ieee.numeric_std");
    }

    #[test]
    fn test_impact_levels() {
        let mut tables = design();
        tables.use_clauses = vec![use_clause("work.types_pkg.all", "cpu.vhd")];
        tables.instances = vec![instance("cpu", "top.vhd", 5)];
        let symbols = SymbolTable::register(&tables);
        tables.dependencies = DependencyResolver::new(&symbols).resolve(&tables);
        tables.symbols = symbols.into_rows();

        let graph = DependentsGraph::build(&tables);
        assert_eq!(
            graph.impact("pkg.vhd"),
            vec![vec!["cpu.vhd".to_string()], vec!["top.vhd".to_string()]]
        );
        assert!(graph.impact("top.vhd").is_empty());
    }
}
