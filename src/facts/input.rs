//! Per-file facts as produced by the extractor.
//!
//! One `FileFacts` document describes one design file. Every collection is
//! parsed leniently (see [`super::lenient`]); only the file path is mandatory.

use rayon::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use super::lenient;

/// Errors raised while loading extractor output.
#[derive(Debug, Error)]
pub enum FactsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: fact document #{index} has no file path")]
    MissingPath { path: PathBuf, index: usize },
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// All facts extracted from one design file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileFacts {
    #[serde(default, deserialize_with = "lenient::string")]
    pub path: String,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub entities: Vec<EntityFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub architectures: Vec<ArchitectureFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub packages: Vec<PackageFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub configurations: Vec<ConfigurationFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub signals: Vec<SignalFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub processes: Vec<ProcessFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub concurrent_assignments: Vec<AssignmentFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub instances: Vec<InstanceFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub generates: Vec<GenerateFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub case_statements: Vec<CaseFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub types: Vec<TypeFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub constants: Vec<ConstantFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub subprograms: Vec<SubprogramFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub use_clauses: Vec<UseClauseFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub library_clauses: Vec<LibraryClauseFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub context_clauses: Vec<ContextClauseFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub verification_blocks: Vec<VerificationBlockFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub verification_tags: Vec<VerificationTagFact>,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub verification_tag_errors: Vec<TagErrorFact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityFact {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub ports: Vec<PortFact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortFact {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub direction: String,
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub ty: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectureFact {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub entity: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageFact {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationFact {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub entity: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalFact {
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub ty: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
    /// Innermost enclosing generate label, if any.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub generate: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessFact {
    #[serde(default, deserialize_with = "lenient::string")]
    pub label: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub generate: Option<String>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub sensitivity_list: Vec<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_sequential: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_combinational: bool,
    #[serde(default, deserialize_with = "lenient::string")]
    pub clock_signal: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub reset_signal: String,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub has_reset: bool,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub read_signals: Vec<String>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub assigned_signals: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentFact {
    #[serde(default, deserialize_with = "lenient::string")]
    pub target: String,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub read_signals: Vec<String>,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub generate: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceFact {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub target: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub generate: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub port_map: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub generic_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateFact {
    pub label: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
    /// Label of the enclosing generate, if nested.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub parent: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub loop_var: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub range_low: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub range_high: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub range_dir: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub condition: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaseFact {
    pub expression: String,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub choices: Vec<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub has_others: bool,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub process: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeFact {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub base_type: String,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub enum_literals: Vec<String>,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub package: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConstantFact {
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub ty: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub value: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub package: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubprogramFact {
    pub name: String,
    /// "function" or "procedure".
    #[serde(default, deserialize_with = "lenient::string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub package: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UseClauseFact {
    #[serde(default, deserialize_with = "lenient::strings")]
    pub items: Vec<String>,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryClauseFact {
    #[serde(default, deserialize_with = "lenient::strings")]
    pub libraries: Vec<String>,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextClauseFact {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationBlockFact {
    #[serde(default, deserialize_with = "lenient::string")]
    pub label: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line_start: usize,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line_end: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationTagFact {
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub scope: String,
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub bindings: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub raw: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagErrorFact {
    #[serde(default, deserialize_with = "lenient::string")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub raw: String,
    #[serde(default, deserialize_with = "lenient::line")]
    pub line: usize,
    #[serde(default, deserialize_with = "lenient::string")]
    pub arch: String,
}

impl FileFacts {
    /// Parse a single fact document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Load every fact document stored in `path`.
///
/// A `.ndjson` file holds one document per line; any other file holds either
/// one document or an array of them.
pub fn load_file(path: &Path) -> Result<Vec<FileFacts>, FactsError> {
    let content = fs::read_to_string(path).map_err(|source| FactsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |source| FactsError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let documents: Vec<FileFacts> = if path.extension().and_then(|e| e.to_str()) == Some("ndjson")
    {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(FileFacts::from_json)
            .collect::<Result<_, _>>()
            .map_err(parse_err)?
    } else {
        match serde_json::from_str::<Value>(&content).map_err(parse_err)? {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()
                .map_err(parse_err)?,
            single => vec![serde_json::from_value(single).map_err(parse_err)?],
        }
    };

    for (index, doc) in documents.iter().enumerate() {
        if doc.path.trim().is_empty() {
            return Err(FactsError::MissingPath {
                path: path.to_path_buf(),
                index,
            });
        }
    }
    Ok(documents)
}

/// Expand the given paths into fact files, walking directories for
/// `*.json` and `*.ndjson`.
pub fn collect_fact_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, FactsError> {
    let mut files = Vec::new();
    for root in paths {
        if !root.is_dir() {
            files.push(root.clone());
            continue;
        }
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|source| FactsError::Walk {
                path: root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext == "json" || ext == "ndjson" {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    Ok(files)
}

/// Load all fact files in parallel. The result is only returned once every
/// file has been read, which is the barrier symbol registration relies on.
pub fn load_all(files: &[PathBuf]) -> Result<Vec<FileFacts>, FactsError> {
    let per_file: Vec<Vec<FileFacts>> = files
        .par_iter()
        .map(|path| load_file(path))
        .collect::<Result<_, _>>()?;
    let mut all: Vec<FileFacts> = per_file.into_iter().flatten().collect();
    all.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(files = files.len(), documents = all.len(), "loaded fact documents");
    Ok(all)
}
