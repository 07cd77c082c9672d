//! File-to-library assignment.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::Config;

/// Libraries that always resolve without any file of the design.
pub const STANDARD_LIBRARIES: &[&str] = &[
    "ieee",
    "std",
    "ieee_proposed",
    "synopsys",
    "vital2000",
    "mentor",
];

pub fn is_standard_library(name: &str) -> bool {
    STANDARD_LIBRARIES
        .iter()
        .any(|lib| lib.eq_ignore_ascii_case(name))
}

/// Library a file compiles into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAssignment {
    pub library: String,
    pub is_third_party: bool,
}

#[derive(Debug)]
struct LibraryRule {
    name: String,
    include: GlobSet,
    exclude: GlobSet,
    third_party: bool,
}

/// Compiled library membership rules.
#[derive(Debug)]
pub struct LibraryMap {
    default_library: String,
    explicit: Vec<(String, FileAssignment)>,
    rules: Vec<LibraryRule>,
}

impl LibraryMap {
    /// Compile the config's globs. Call [`crate::config::validate`] first
    /// for friendlier messages; this fails on the first bad pattern.
    pub fn from_config(config: &Config) -> Result<Self, globset::Error> {
        let mut rules = Vec::with_capacity(config.libraries.len());
        for library in &config.libraries {
            rules.push(LibraryRule {
                name: library.name.clone(),
                include: compile(&library.files)?,
                exclude: compile(&library.exclude)?,
                third_party: library.third_party,
            });
        }
        let explicit = config
            .files
            .iter()
            .map(|entry| {
                (
                    normalize_path(&entry.file),
                    FileAssignment {
                        library: entry.library.clone(),
                        is_third_party: entry.third_party,
                    },
                )
            })
            .collect();
        Ok(Self {
            default_library: config.default_library.clone(),
            explicit,
            rules,
        })
    }

    /// Everything goes to `default_library`.
    pub fn single(default_library: &str) -> Self {
        Self {
            default_library: default_library.to_string(),
            explicit: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn default_library(&self) -> &str {
        &self.default_library
    }

    /// Explicit entries first, then the first library rule whose globs
    /// match, else the default library.
    pub fn assign(&self, path: &str) -> FileAssignment {
        let path = normalize_path(path);

        if let Some((_, assignment)) = self
            .explicit
            .iter()
            .find(|(file, _)| path_matches_suffix(&path, file))
        {
            return assignment.clone();
        }

        for rule in &self.rules {
            if matches(&rule.include, &path) && !matches(&rule.exclude, &path) {
                return FileAssignment {
                    library: rule.name.clone(),
                    is_third_party: rule.third_party,
                };
            }
        }

        FileAssignment {
            library: self.default_library.clone(),
            is_third_party: false,
        }
    }
}

fn compile(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern.trim_start_matches("./"))?);
    }
    builder.build()
}

/// A relative pattern written against the project root also matches an
/// absolute or deeper path ending in the same components.
fn matches(set: &GlobSet, path: &str) -> bool {
    if set.is_empty() {
        return false;
    }
    if set.is_match(path) {
        return true;
    }
    path.match_indices('/')
        .any(|(idx, _)| set.is_match(&path[idx + 1..]))
}

fn path_matches_suffix(path: &str, file: &str) -> bool {
    path == file || path.ends_with(&format!("/{}", file))
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}
