//! Check registry: verification check ids and what a tag for them must carry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::types::Severity;

/// Environment variable naming a registry file that overrides every other
/// source.
pub const REGISTRY_ENV: &str = "HDLCHECK_CHECK_REGISTRY";

const BUILTIN_REGISTRY: &str = include_str!("check_registry.yaml");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read check registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed check registry {origin}: {message}")]
    Malformed { origin: String, message: String },
    #[error("check registry {origin}: duplicate id {id:?}")]
    DuplicateId { origin: String, id: String },
}

/// Where a tag for a check may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Arch,
    Entity,
    Any,
}

impl ScopeType {
    /// True when a tag scoped with `kind` (`arch` or `entity`) is allowed.
    pub fn allows(&self, kind: &str) -> bool {
        match self {
            ScopeType::Any => true,
            ScopeType::Arch => kind.eq_ignore_ascii_case("arch"),
            ScopeType::Entity => kind.eq_ignore_ascii_case("entity"),
        }
    }
}

impl std::str::FromStr for ScopeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arch" | "architecture" => Ok(ScopeType::Arch),
            "entity" => Ok(ScopeType::Entity),
            "any" => Ok(ScopeType::Any),
            _ => Err(format!("unknown scope_type: {}", s)),
        }
    }
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSpec {
    pub id: String,
    pub scope_type: ScopeType,
    pub required_bindings: Vec<String>,
    pub needs_cover: bool,
    pub requires_bound: bool,
    pub severity: Severity,
}

impl CheckSpec {
    /// `fsm` for `fsm.legal_state`, `fsm` for `cover.fsm.transition_taken`.
    pub fn family(&self) -> &str {
        let id = self.id.strip_prefix("cover.").unwrap_or(&self.id);
        id.split('.').next().unwrap_or(id)
    }

    pub fn is_cover(&self) -> bool {
        self.id.starts_with("cover.")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCheck {
    id: String,
    #[serde(default)]
    scope_type: Option<String>,
    #[serde(default)]
    required_bindings: Vec<String>,
    #[serde(default)]
    needs_cover: bool,
    #[serde(default)]
    requires_bound: bool,
    #[serde(default)]
    severity: Option<String>,
}

/// Registry of verification checks, keyed by lowercase id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRegistry {
    checks: BTreeMap<String, CheckSpec>,
}

impl CheckRegistry {
    /// The registry shipped with hdlcheck.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::parse(BUILTIN_REGISTRY, "<builtin>")
    }

    /// Parse a YAML or JSON list of checks.
    pub fn parse(content: &str, origin: &str) -> Result<Self, RegistryError> {
        let malformed = |message: String| RegistryError::Malformed {
            origin: origin.to_string(),
            message,
        };

        // YAML is a superset of JSON, so one parser covers both formats.
        let raw: Vec<RawCheck> =
            serde_yaml::from_str(content).map_err(|e| malformed(e.to_string()))?;

        let mut checks = BTreeMap::new();
        for entry in raw {
            let id = entry.id.trim().to_lowercase();
            if id.is_empty() {
                return Err(malformed("check with empty id".to_string()));
            }
            let scope_type = match entry.scope_type.as_deref() {
                Some(raw) => raw.parse::<ScopeType>().map_err(|e| malformed(format!("{}: {}", id, e)))?,
                None => ScopeType::Any,
            };
            let severity = match entry.severity.as_deref() {
                Some(raw) => raw.parse::<Severity>().map_err(|e| malformed(format!("{}: {}", id, e)))?,
                None => Severity::Warning,
            };
            let spec = CheckSpec {
                id: id.clone(),
                scope_type,
                required_bindings: entry
                    .required_bindings
                    .iter()
                    .map(|b| b.trim().to_lowercase())
                    .collect(),
                needs_cover: entry.needs_cover,
                requires_bound: entry.requires_bound,
                severity,
            };
            if checks.insert(id.clone(), spec).is_some() {
                return Err(RegistryError::DuplicateId {
                    origin: origin.to_string(),
                    id,
                });
            }
        }
        Ok(Self { checks })
    }

    pub fn load_file(path: &Path) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Load the registry in effect: `HDLCHECK_CHECK_REGISTRY`, then the
    /// configured path, then the built-in registry.
    pub fn resolve(configured: Option<&Path>) -> Result<Self, RegistryError> {
        if let Some(path) = std::env::var_os(REGISTRY_ENV).filter(|v| !v.is_empty()) {
            tracing::debug!(path = ?path, "loading check registry from environment");
            return Self::load_file(Path::new(&path));
        }
        match configured {
            Some(path) => Self::load_file(path),
            None => Self::builtin(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&CheckSpec> {
        self.checks.get(&id.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckSpec> {
        self.checks.values()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
