//! Unified relational tables.
//!
//! Every relation is a sorted `Vec` of rows. Each row type knows its identity
//! key `(kind, file, line, name)`; whole-row equality is what the delta
//! computer compares, the key only fixes the canonical order.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of a row within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey<'a> {
    pub kind: TableKind,
    pub file: &'a str,
    pub line: usize,
    pub name: &'a str,
}

impl fmt::Display for RowKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' at {}:{}", self.kind, self.name, self.file, self.line)
    }
}

/// A row of one relation.
pub trait FactRow: Clone + Ord + Serialize + DeserializeOwned {
    const KIND: TableKind;

    fn file(&self) -> &str;
    fn line(&self) -> usize;
    fn name(&self) -> &str;

    fn key(&self) -> RowKey<'_> {
        RowKey {
            kind: Self::KIND,
            file: self.file(),
            line: self.line(),
            name: self.name(),
        }
    }
}

macro_rules! fact_row {
    ($row:ident, $kind:ident, file: $file:ident, name: $name:ident) => {
        impl FactRow for $row {
            const KIND: TableKind = TableKind::$kind;

            fn file(&self) -> &str {
                &self.$file
            }

            fn line(&self) -> usize {
                self.line
            }

            fn name(&self) -> &str {
                &self.$name
            }
        }
    };
}

macro_rules! tables {
    ($($field:ident: $row:ident => $kind:ident),* $(,)?) => {
        /// The relation a row belongs to.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum TableKind {
            $($kind,)*
        }

        impl TableKind {
            pub const ALL: &'static [TableKind] = &[$(TableKind::$kind,)*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(TableKind::$kind => stringify!($field),)*
                }
            }
        }

        /// A full or sparse snapshot of the design model.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct Tables {
            $(
                #[serde(default)]
                pub $field: Vec<$row>,
            )*
        }

        impl Tables {
            /// Sort every relation into canonical order.
            pub fn normalize(&mut self) {
                $(normalize_rows(&mut self.$field);)*
            }

            pub fn row_count(&self) -> usize {
                0 $(+ self.$field.len())*
            }

            pub fn is_empty(&self) -> bool {
                self.row_count() == 0
            }

            /// Relations that hold at least one row.
            pub fn kinds_touched(&self) -> BTreeSet<TableKind> {
                let mut kinds = BTreeSet::new();
                $(
                    if !self.$field.is_empty() {
                        kinds.insert(TableKind::$kind);
                    }
                )*
                kinds
            }

            /// Files referenced by any row.
            pub fn files_touched(&self) -> BTreeSet<String> {
                let mut files = BTreeSet::new();
                $(files.extend(self.$field.iter().map(|row| row.file().to_string()));)*
                files
            }

            /// Keep only rows whose file is in `files`.
            pub fn filter_by_files(&self, files: &BTreeSet<String>) -> Tables {
                Tables {
                    $(
                        $field: self
                            .$field
                            .iter()
                            .filter(|row| files.contains(row.file()))
                            .cloned()
                            .collect(),
                    )*
                }
            }

            /// Visit the identity key of every row.
            pub fn for_each_key(&self, mut visit: impl FnMut(RowKey<'_>)) {
                $(
                    for row in &self.$field {
                        visit(row.key());
                    }
                )*
            }

            /// Rows of `to` that are not matched by a row of `from`, counting
            /// duplicates.
            pub(crate) fn difference(from: &Tables, to: &Tables) -> Tables {
                Tables {
                    $($field: multiset_difference(&from.$field, &to.$field),)*
                }
            }

            /// Remove one occurrence of every row in `rows`. Fails on the first
            /// row that is not present.
            pub(crate) fn remove_rows(&mut self, rows: &Tables) -> Result<(), String> {
                $(remove_each(&mut self.$field, &rows.$field)?;)*
                Ok(())
            }

            pub(crate) fn extend_rows(&mut self, rows: &Tables) {
                $(self.$field.extend(rows.$field.iter().cloned());)*
            }
        }
    };
}

tables! {
    files: FileRow => Files,
    entities: EntityRow => Entities,
    architectures: ArchitectureRow => Architectures,
    packages: PackageRow => Packages,
    configurations: ConfigurationRow => Configurations,
    ports: PortRow => Ports,
    signals: SignalRow => Signals,
    processes: ProcessRow => Processes,
    assignments: AssignmentRow => Assignments,
    instances: InstanceRow => Instances,
    generates: GenerateRow => Generates,
    case_statements: CaseRow => CaseStatements,
    types: TypeRow => Types,
    constants: ConstantRow => Constants,
    subprograms: SubprogramRow => Subprograms,
    use_clauses: UseClauseRow => UseClauses,
    library_clauses: LibraryClauseRow => LibraryClauses,
    context_clauses: ContextClauseRow => ContextClauses,
    verification_blocks: VerificationBlockRow => VerificationBlocks,
    verification_tags: VerificationTagRow => VerificationTags,
    tag_errors: TagErrorRow => TagErrors,
    symbols: SymbolRow => Symbols,
    scopes: ScopeRow => Scopes,
    dependencies: DependencyRow => Dependencies,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize_rows<T: FactRow>(rows: &mut [T]) {
    rows.sort_by(|a, b| a.key().cmp(&b.key()).then_with(|| a.cmp(b)));
}

fn multiset_difference<T: FactRow>(from: &[T], to: &[T]) -> Vec<T> {
    let mut available: BTreeMap<&T, usize> = BTreeMap::new();
    for row in from {
        *available.entry(row).or_default() += 1;
    }
    let mut out = Vec::new();
    for row in to {
        match available.get_mut(row) {
            Some(count) if *count > 0 => *count -= 1,
            _ => out.push(row.clone()),
        }
    }
    normalize_rows(&mut out);
    out
}

fn remove_each<T: FactRow>(rows: &mut Vec<T>, remove: &[T]) -> Result<(), String> {
    for target in remove {
        match rows.iter().position(|row| row == target) {
            Some(index) => {
                rows.swap_remove(index);
            }
            None => return Err(target.key().to_string()),
        }
    }
    Ok(())
}

/// A design file and the library it was compiled into.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRow {
    pub path: String,
    pub library: String,
    #[serde(default)]
    pub is_third_party: bool,
}

impl FactRow for FileRow {
    const KIND: TableKind = TableKind::Files;

    fn file(&self) -> &str {
        &self.path
    }

    fn line(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityRow {
    pub name: String,
    pub library: String,
    pub file: String,
    pub line: usize,
}
fact_row!(EntityRow, Entities, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchitectureRow {
    pub name: String,
    pub entity: String,
    pub file: String,
    pub line: usize,
}
fact_row!(ArchitectureRow, Architectures, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageRow {
    pub name: String,
    pub library: String,
    pub file: String,
    pub line: usize,
}
fact_row!(PackageRow, Packages, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationRow {
    pub name: String,
    pub entity: String,
    pub file: String,
    pub line: usize,
}
fact_row!(ConfigurationRow, Configurations, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortRow {
    pub entity: String,
    pub name: String,
    pub direction: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub file: String,
    pub line: usize,
}
fact_row!(PortRow, Ports, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalRow {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub arch: String,
    /// Dotted scope path, `arch[.generate...]`.
    pub scope: String,
    pub file: String,
    pub line: usize,
}
fact_row!(SignalRow, Signals, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessRow {
    pub label: String,
    pub arch: String,
    pub scope: String,
    #[serde(default)]
    pub sensitivity_list: Vec<String>,
    #[serde(default)]
    pub is_sequential: bool,
    #[serde(default)]
    pub is_combinational: bool,
    #[serde(default)]
    pub clock_signal: String,
    #[serde(default)]
    pub reset_signal: String,
    #[serde(default)]
    pub has_reset: bool,
    #[serde(default)]
    pub read_signals: Vec<String>,
    #[serde(default)]
    pub assigned_signals: Vec<String>,
    pub file: String,
    pub line: usize,
}
fact_row!(ProcessRow, Processes, file: file, name: label);

/// A concurrent signal assignment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentRow {
    pub target: String,
    #[serde(default)]
    pub read_signals: Vec<String>,
    pub arch: String,
    pub scope: String,
    pub file: String,
    pub line: usize,
}
fact_row!(AssignmentRow, Assignments, file: file, name: target);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceRow {
    pub name: String,
    pub target: String,
    pub arch: String,
    pub scope: String,
    #[serde(default)]
    pub port_map: BTreeMap<String, String>,
    #[serde(default)]
    pub generic_map: BTreeMap<String, String>,
    pub file: String,
    pub line: usize,
}
fact_row!(InstanceRow, Instances, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateRow {
    pub label: String,
    /// "for", "if" or "case".
    pub kind: String,
    pub arch: String,
    pub scope: String,
    #[serde(default)]
    pub loop_var: String,
    #[serde(default)]
    pub range_low: String,
    #[serde(default)]
    pub range_high: String,
    #[serde(default)]
    pub range_dir: String,
    #[serde(default)]
    pub condition: String,
    pub can_elaborate: bool,
    /// Concrete iteration count, or -1 when the range is not static.
    pub iteration_count: i64,
    pub file: String,
    pub line: usize,
}
fact_row!(GenerateRow, Generates, file: file, name: label);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseRow {
    pub expression: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub has_others: bool,
    pub arch: String,
    #[serde(default)]
    pub process: String,
    pub file: String,
    pub line: usize,
}
fact_row!(CaseRow, CaseStatements, file: file, name: expression);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeRow {
    pub name: String,
    /// "enum", "array", "record", "subtype", ...
    pub kind: String,
    #[serde(default)]
    pub base_type: String,
    #[serde(default)]
    pub enum_literals: Vec<String>,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub arch: String,
    pub file: String,
    pub line: usize,
}
fact_row!(TypeRow, Types, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantRow {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub arch: String,
    pub file: String,
    pub line: usize,
}
fact_row!(ConstantRow, Constants, file: file, name: name);

/// A function or procedure declaration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubprogramRow {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub package: String,
    pub file: String,
    pub line: usize,
}
fact_row!(SubprogramRow, Subprograms, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UseClauseRow {
    pub item: String,
    pub file: String,
    pub line: usize,
}
fact_row!(UseClauseRow, UseClauses, file: file, name: item);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryClauseRow {
    pub library: String,
    pub file: String,
    pub line: usize,
}
fact_row!(LibraryClauseRow, LibraryClauses, file: file, name: library);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextClauseRow {
    pub name: String,
    pub file: String,
    pub line: usize,
}
fact_row!(ContextClauseRow, ContextClauses, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationBlockRow {
    pub label: String,
    pub arch: String,
    pub line_end: usize,
    pub file: String,
    pub line: usize,
}
fact_row!(VerificationBlockRow, VerificationBlocks, file: file, name: label);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationTagRow {
    pub id: String,
    /// `arch:<name>` or `entity:<name>`.
    pub scope: String,
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
    pub arch: String,
    #[serde(default)]
    pub raw: String,
    pub file: String,
    pub line: usize,
}
fact_row!(VerificationTagRow, VerificationTags, file: file, name: id);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagErrorRow {
    pub message: String,
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub arch: String,
    pub file: String,
    pub line: usize,
}
fact_row!(TagErrorRow, TagErrors, file: file, name: message);

/// A library-qualified declaration, `<library>.<unit>[.<item>]`, lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolRow {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub line: usize,
}
fact_row!(SymbolRow, Symbols, file: file, name: name);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeRow {
    pub name: String,
    /// "architecture" or "generate".
    pub kind: String,
    #[serde(default)]
    pub parent: String,
    pub path: String,
    pub file: String,
    pub line: usize,
}
fact_row!(ScopeRow, Scopes, file: file, name: path);

/// A reference from one file to a library, package or design unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyRow {
    /// Referencing file.
    pub source: String,
    pub target: String,
    /// "library", "use", "context" or "instantiation".
    pub kind: String,
    pub line: usize,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_to: Option<String>,
    /// Equally plausible matches when a bare name could not be resolved
    /// uniquely.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}
fact_row!(DependencyRow, Dependencies, file: source, name: target);

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, file: &str, line: usize) -> EntityRow {
        EntityRow {
            name: name.into(),
            library: "lib".into(),
            file: file.into(),
            line,
        }
    }

    #[test]
    fn test_normalize_orders_by_key() {
        let mut tables = Tables {
            entities: vec![entity("b", "x.vhd", 1), entity("a", "x.vhd", 1), entity("z", "a.vhd", 9)],
            ..Default::default()
        };
        tables.normalize();
        let names: Vec<&str> = tables.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_difference_counts_duplicates() {
        let from = Tables {
            entities: vec![entity("a", "x.vhd", 1)],
            ..Default::default()
        };
        let to = Tables {
            entities: vec![entity("a", "x.vhd", 1), entity("a", "x.vhd", 1)],
            ..Default::default()
        };
        let added = Tables::difference(&from, &to);
        assert_eq!(added.entities.len(), 1);
        assert!(Tables::difference(&to, &to).is_empty());
    }

    #[test]
    fn test_remove_rows_reports_missing() {
        let mut tables = Tables {
            entities: vec![entity("a", "x.vhd", 1)],
            ..Default::default()
        };
        let missing = Tables {
            entities: vec![entity("b", "x.vhd", 2)],
            ..Default::default()
        };
        let err = tables.remove_rows(&missing).unwrap_err();
        assert!(err.contains("'b'"));
        assert_eq!(tables.entities.len(), 1);
    }

    #[test]
    fn test_touched_and_filter() {
        let tables = Tables {
            files: vec![FileRow {
                path: "x.vhd".into(),
                library: "lib".into(),
                is_third_party: false,
            }],
            entities: vec![entity("a", "x.vhd", 1), entity("b", "y.vhd", 1)],
            ..Default::default()
        };
        assert_eq!(tables.row_count(), 3);
        assert_eq!(
            tables.kinds_touched().into_iter().collect::<Vec<_>>(),
            vec![TableKind::Files, TableKind::Entities]
        );
        let keep: BTreeSet<String> = ["y.vhd".to_string()].into_iter().collect();
        let filtered = tables.filter_by_files(&keep);
        assert!(filtered.files.is_empty());
        assert_eq!(filtered.entities.len(), 1);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = serde_json::from_str::<Tables>(
            r#"{"entities": [{"name": "a", "library": "l", "file": "f", "line": 1, "extra": 1}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("extra"));
        assert!(serde_json::from_str::<Tables>(r#"{"bogus": []}"#).is_err());
    }

    #[test]
    fn test_row_key_display() {
        let row = entity("cpu", "rtl/cpu.vhd", 4);
        assert_eq!(row.key().to_string(), "entities 'cpu' at rtl/cpu.vhd:4");
    }
}
