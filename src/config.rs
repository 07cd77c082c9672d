//! Project configuration for hdlcheck.
//!
//! A config maps design files to VHDL libraries and tunes the policy rules.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::policy::{Rule, RuleConfig, RuleSetting};

/// File names searched by [`Config::discover`], in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["hdlcheck.yaml", ".hdlcheck.yaml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown rule {0:?}")]
    UnknownRule(String),
    #[error("rule {rule}: {message}")]
    InvalidRuleSetting { rule: String, message: String },
}

/// Top-level project configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_library")]
    pub default_library: String,
    /// Library definitions in declaration order. The first library whose
    /// globs match a file wins.
    #[serde(default, deserialize_with = "ordered_libraries")]
    pub libraries: Vec<LibraryConfig>,
    /// Explicit file assignments. These take precedence over any glob.
    #[serde(default)]
    pub files: Vec<FileEntry>,
    /// Paths reported as third-party, matched exactly or by path suffix.
    #[serde(default)]
    pub third_party_files: Vec<String>,
    /// Glob patterns for design files left out of the model entirely.
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    /// Rule name to `off`, `info`, `warning` or `error`.
    #[serde(default)]
    pub rules: BTreeMap<String, String>,
    /// Check registry overriding the built-in one.
    #[serde(default)]
    pub check_registry: Option<PathBuf>,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_library: default_library(),
            libraries: Vec::new(),
            files: Vec::new(),
            third_party_files: Vec::new(),
            excluded_paths: Vec::new(),
            rules: BTreeMap::new(),
            check_registry: None,
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Parse a config from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        // Relative registry paths are relative to the config file.
        if let (Some(registry), Some(dir)) = (config.check_registry.as_mut(), path.parent()) {
            if registry.is_relative() {
                *registry = dir.join(&*registry);
            }
        }
        Ok(config)
    }

    /// Find a config file in `dir`.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// Typed rule configuration for the policy engine.
    pub fn rule_config(&self) -> Result<RuleConfig, ConfigError> {
        let mut rules = BTreeMap::new();
        for (name, setting) in &self.rules {
            let rule = Rule::parse(name).ok_or_else(|| ConfigError::UnknownRule(name.clone()))?;
            let setting = setting.parse::<RuleSetting>().map_err(|message| {
                ConfigError::InvalidRuleSetting {
                    rule: name.clone(),
                    message,
                }
            })?;
            rules.insert(rule, setting);
        }
        Ok(RuleConfig {
            rules,
            third_party_files: self.third_party_files.iter().cloned().collect(),
        })
    }

    /// Check if a design file should be left out based on `excluded_paths`.
    pub fn is_path_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|pattern| {
            globset::Glob::new(pattern)
                .map(|glob| glob.compile_matcher().is_match(path))
                .unwrap_or(false)
        })
    }
}

/// One library and the files compiled into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryConfig {
    pub name: String,
    pub files: Vec<String>,
    pub exclude: Vec<String>,
    pub third_party: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LibraryBody {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    third_party: bool,
}

/// An explicit file-to-library assignment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileEntry {
    pub file: String,
    pub library: String,
    #[serde(default)]
    pub third_party: bool,
}

/// Evaluation cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// On-disk cache directory. Defaults to the user cache directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_library() -> String {
    "lib".to_string()
}

/// Read the `libraries` mapping as a list so declaration order survives.
fn ordered_libraries<'de, D>(deserializer: D) -> Result<Vec<LibraryConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LibrariesVisitor;

    impl<'de> Visitor<'de> for LibrariesVisitor {
        type Value = Vec<LibraryConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping of library names to library definitions")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut libraries = Vec::new();
            while let Some((name, body)) = map.next_entry::<String, Option<LibraryBody>>()? {
                let body = body.unwrap_or_default();
                libraries.push(LibraryConfig {
                    name,
                    files: body.files,
                    exclude: body.exclude,
                    third_party: body.third_party,
                });
            }
            Ok(libraries)
        }
    }

    deserializer.deserialize_any(LibrariesVisitor)
}

/// Validate a config for internal consistency.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    if config.default_library.trim().is_empty() {
        anyhow::bail!("default_library must not be empty");
    }
    if config.default_library.eq_ignore_ascii_case("work") {
        anyhow::bail!("default_library cannot be \"work\"; it is an alias, not a library");
    }

    let mut seen = std::collections::HashSet::new();
    for library in &config.libraries {
        if library.name.trim().is_empty() {
            anyhow::bail!("library names must not be empty");
        }
        if library.name.eq_ignore_ascii_case("work") {
            anyhow::bail!("library cannot be named \"work\"");
        }
        if !seen.insert(library.name.to_ascii_lowercase()) {
            anyhow::bail!("library {:?} is defined twice", library.name);
        }
        for pattern in library.files.iter().chain(&library.exclude) {
            globset::Glob::new(pattern).map_err(|e| {
                anyhow::anyhow!("invalid pattern {:?} in library {:?}: {}", pattern, library.name, e)
            })?;
        }
    }

    for entry in &config.files {
        if entry.file.trim().is_empty() {
            anyhow::bail!("file entries need a non-empty file");
        }
        if entry.library.trim().is_empty() || entry.library.eq_ignore_ascii_case("work") {
            anyhow::bail!("file {:?} needs a real library name, got {:?}", entry.file, entry.library);
        }
    }

    for pattern in &config.excluded_paths {
        globset::Glob::new(pattern)
            .map_err(|e| anyhow::anyhow!("invalid excluded_paths pattern {:?}: {}", pattern, e))?;
    }

    config.rule_config()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Severity;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
default_library: core
libraries:
  vendor:
    files: ["ip/**/*.vhd"]
    third_party: true
  mylib:
    files: ["rtl/**/*.vhd"]
    exclude: ["rtl/sim/**"]
  scratch:
files:
  - file: top.vhd
    library: mylib
rules:
  unused_signal: warning
  multi_driven_signal: off
cache:
  dir: /tmp/hdlcheck-cache
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_library, "core");
        let names: Vec<&str> = config.libraries.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["vendor", "mylib", "scratch"]);
        assert!(config.libraries[0].third_party);
        assert_eq!(config.libraries[1].exclude, vec!["rtl/sim/**"]);
        assert!(config.libraries[2].files.is_empty());
        assert_eq!(config.files[0].library, "mylib");
        assert!(config.cache.enabled);
        assert!(validate(&config).is_ok());

        let rules = config.rule_config().unwrap();
        assert_eq!(
            rules.rules.get(&Rule::UnusedSignal),
            Some(&RuleSetting::Severity(Severity::Warning))
        );
        assert!(rules.is_disabled(Rule::MultiDrivenSignal));
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.default_library, "lib");
        assert!(config.libraries.is_empty());
        assert!(config.cache.enabled);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_work_default() {
        let config: Config = serde_yaml::from_str("default_library: WORK").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("work"));
    }

    #[test]
    fn test_validate_rejects_bad_rules_and_globs() {
        let config: Config = serde_yaml::from_str("rules:\n  no_such_rule: error").unwrap();
        assert!(validate(&config).is_err());

        let config: Config = serde_yaml::from_str("rules:\n  unused_signal: loud").unwrap();
        assert!(validate(&config).is_err());

        let config: Config =
            serde_yaml::from_str("libraries:\n  a:\n    files: [\"rtl/[\"]").unwrap();
        assert!(validate(&config).is_err());

        let config: Config = serde_yaml::from_str(
            "libraries:\n  a:\n    files: []\n  A:\n    files: []",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_excluded_paths() {
        let config: Config = serde_yaml::from_str("excluded_paths: [\"**/sim/**\"]").unwrap();
        assert!(config.is_path_excluded("rtl/sim/tb.vhd"));
        assert!(!config.is_path_excluded("rtl/core/cpu.vhd"));
    }

    #[test]
    fn test_parse_file_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::discover(dir.path()).is_none());

        let path = dir.path().join(".hdlcheck.yaml");
        fs::write(&path, "check_registry: checks.yaml\n").unwrap();
        assert_eq!(Config::discover(dir.path()), Some(path.clone()));

        let config = Config::parse_file(&path).unwrap();
        assert_eq!(config.check_registry, Some(dir.path().join("checks.yaml")));

        fs::write(&path, "libraries: [").unwrap();
        assert!(matches!(
            Config::parse_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
