//! Fact model: extractor input, relational tables and deltas.

mod builder;
mod delta;
pub mod input;
pub mod lenient;
mod tables;

pub use builder::TableBuilder;
pub use delta::{Delta, DeltaError};
pub use input::{collect_fact_files, load_all, load_file, FactsError, FileFacts};
pub use tables::*;
