//! Library assignment, symbol registration and dependency resolution.
//!
//! Resolution runs in two passes separated by a hard barrier: every file of
//! the batch is registered into the [`SymbolTable`] first, and only then are
//! references resolved against it. No reference is ever resolved against a
//! partially built table.

mod deps;
mod library;
mod symbols;

pub use deps::{
    DependencyResolver, DependentsGraph, KIND_CONTEXT, KIND_INSTANTIATION, KIND_LIBRARY, KIND_USE,
};
pub use library::{is_standard_library, FileAssignment, LibraryMap, STANDARD_LIBRARIES};
pub use symbols::SymbolTable;

use crate::facts::{FileFacts, TableBuilder, Tables};

/// Builds fully resolved tables from a batch of extractor facts.
pub struct Indexer {
    libraries: LibraryMap,
}

impl Indexer {
    pub fn new(libraries: LibraryMap) -> Self {
        Self { libraries }
    }

    pub fn build(&self, facts: &[FileFacts]) -> Tables {
        let mut builder = TableBuilder::new();
        for file in facts {
            let assignment = self.libraries.assign(&file.path);
            builder.add_file(file, &assignment.library, assignment.is_third_party);
        }
        let mut tables = builder.finish();
        resolve(&mut tables);
        tracing::info!(
            files = tables.files.len(),
            rows = tables.row_count(),
            "built design tables"
        );
        tables
    }
}

/// Recompute the `symbols` and `dependencies` relations of `tables`.
pub fn resolve(tables: &mut Tables) {
    let symbols = SymbolTable::register(tables);
    let dependencies = DependencyResolver::new(&symbols).resolve(tables);
    tables.symbols = symbols.into_rows();
    tables.dependencies = dependencies;
    tables.normalize();
}
