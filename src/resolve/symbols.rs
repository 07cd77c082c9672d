//! Library-qualified symbol registration.
//!
//! Registration sees every file of a batch before anything is resolved. The
//! resulting [`SymbolTable`] is immutable; resolution only reads it.

use std::collections::{BTreeSet, HashMap};

use crate::facts::{SymbolRow, Tables};

/// Kinds of design units an instance may name.
const UNIT_KINDS: &[&str] = &["entity", "configuration"];

#[derive(Debug, Default)]
pub struct SymbolTable {
    rows: Vec<SymbolRow>,
    /// Lowercase qualified name -> indices into `rows`.
    by_name: HashMap<String, Vec<usize>>,
    /// Lowercase unit name -> qualified names of instantiable units.
    units: HashMap<String, BTreeSet<String>>,
    /// Lowercase file path -> library.
    file_libraries: HashMap<String, String>,
    libraries: BTreeSet<String>,
}

impl SymbolTable {
    /// Register every declaration of `tables`.
    pub fn register(tables: &Tables) -> Self {
        let mut table = SymbolTable::default();

        for file in &tables.files {
            let library = file.library.to_ascii_lowercase();
            table.libraries.insert(library.clone());
            table.file_libraries.insert(file.path.clone(), library);
        }

        for entity in &tables.entities {
            table.add(&[&entity.library, &entity.name], "entity", &entity.file, entity.line);
        }
        for package in &tables.packages {
            table.add(&[&package.library, &package.name], "package", &package.file, package.line);
        }
        for config in &tables.configurations {
            if let Some(library) = table.library_for(&config.file) {
                table.add(&[&library, &config.name], "configuration", &config.file, config.line);
            }
        }

        let package_items = tables
            .types
            .iter()
            .map(|t| (&t.package, &t.name, "type", &t.file, t.line))
            .chain(
                tables
                    .constants
                    .iter()
                    .map(|c| (&c.package, &c.name, "constant", &c.file, c.line)),
            )
            .chain(
                tables
                    .subprograms
                    .iter()
                    .map(|s| (&s.package, &s.name, s.kind.as_str(), &s.file, s.line)),
            );
        for (package, name, kind, file, line) in package_items {
            if package.is_empty() {
                continue;
            }
            if let Some(library) = table.library_for(file) {
                table.add(&[&library, package, name], kind, file, line);
            }
        }

        tracing::debug!(
            symbols = table.rows.len(),
            libraries = table.libraries.len(),
            "registered symbols"
        );
        table
    }

    fn library_for(&self, file: &str) -> Option<String> {
        let library = self.file_libraries.get(file).cloned();
        if library.is_none() {
            tracing::warn!(file, "declaration in a file with no files row, not registered");
        }
        library
    }

    fn add(&mut self, segments: &[&str], kind: &str, file: &str, line: usize) {
        let name = segments
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(".");
        if UNIT_KINDS.contains(&kind) {
            if let Some(unit) = segments.last() {
                self.units
                    .entry(unit.trim().to_ascii_lowercase())
                    .or_default()
                    .insert(name.clone());
            }
        }
        self.by_name
            .entry(name.clone())
            .or_default()
            .push(self.rows.len());
        self.rows.push(SymbolRow {
            name,
            kind: kind.to_string(),
            file: file.to_string(),
            line,
        });
    }

    /// Every registration of a qualified name, ignoring case.
    pub fn lookup(&self, qualified: &str) -> Vec<&SymbolRow> {
        self.by_name
            .get(&qualified.to_ascii_lowercase())
            .map(|indices| indices.iter().map(|&i| &self.rows[i]).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, qualified: &str) -> bool {
        self.by_name.contains_key(&qualified.to_ascii_lowercase())
    }

    /// True when `qualified` names an entity or configuration.
    pub fn is_unit(&self, qualified: &str) -> bool {
        self.lookup(qualified)
            .iter()
            .any(|row| UNIT_KINDS.contains(&row.kind.as_str()))
    }

    /// Qualified names of the instantiable units called `unit` in any library.
    pub fn candidates_for_unit(&self, unit: &str) -> Vec<String> {
        self.units
            .get(&unit.to_ascii_lowercase())
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Library of a file, lowercase.
    pub fn file_library(&self, file: &str) -> Option<&str> {
        self.file_libraries.get(file).map(String::as_str)
    }

    /// True when at least one file compiles into `library`.
    pub fn has_library(&self, library: &str) -> bool {
        self.libraries.contains(&library.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[SymbolRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<SymbolRow> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{EntityRow, FileRow, PackageRow, SubprogramRow, TypeRow};

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

    fn tables() -> Tables {
        Tables {
            files: vec![file("cpu.vhd", "mylib"), file("alu.vhd", "other"), file("pkg.vhd", "mylib")],
            entities: vec![entity("CPU", "mylib", "cpu.vhd"), entity("alu", "other", "alu.vhd"), entity("Cpu", "other", "alu.vhd")],
            packages: vec![PackageRow {
                name: "Types_Pkg".into(),
                library: "mylib".into(),
                file: "pkg.vhd".into(),
                line: 1,
            }],
            types: vec![TypeRow {
                name: "state_t".into(),
                kind: "enum".into(),
                base_type: String::new(),
                enum_literals: vec!["IDLE".into()],
                package: "Types_Pkg".into(),
                arch: String::new(),
                file: "pkg.vhd".into(),
                line: 2,
            }],
            subprograms: vec![SubprogramRow {
                name: "to_state".into(),
                kind: "function".into(),
                package: "types_pkg".into(),
                file: "pkg.vhd".into(),
                line: 3,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_registers_qualified_lowercase_names() {
        let symbols = SymbolTable::register(&tables());
        assert!(symbols.contains("mylib.cpu"));
        assert!(symbols.contains("MYLIB.CPU"));
        assert!(symbols.contains("mylib.types_pkg"));
        assert!(symbols.contains("mylib.types_pkg.state_t"));
        assert_eq!(symbols.lookup("mylib.types_pkg.to_state")[0].kind, "function");
        assert!(!symbols.contains("work.cpu"));
        assert!(symbols.rows().iter().all(|row| row.name == row.name.to_ascii_lowercase()));
    }

    #[test]
    fn test_unit_candidates_span_libraries() {
        let symbols = SymbolTable::register(&tables());
        assert_eq!(symbols.candidates_for_unit("cpu"), vec!["mylib.cpu", "other.cpu"]);
        assert_eq!(symbols.candidates_for_unit("ALU"), vec!["other.alu"]);
        assert!(symbols.candidates_for_unit("types_pkg").is_empty());
        assert!(symbols.is_unit("other.alu"));
        assert!(!symbols.is_unit("mylib.types_pkg"));
    }

    #[test]
    fn test_libraries_come_from_files() {
        let symbols = SymbolTable::register(&tables());
        assert!(symbols.has_library("MyLib"));
        assert!(!symbols.has_library("vendor"));
        assert_eq!(symbols.file_library("alu.vhd"), Some("other"));
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut t = tables();
        t.entities.push(entity("cpu", "mylib", "cpu2.vhd"));
        let symbols = SymbolTable::register(&t);
        assert_eq!(symbols.lookup("mylib.cpu").len(), 2);
    }
}
