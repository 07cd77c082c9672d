//! Core types for policy results.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Severity levels for violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// Rule names. Optional rules only report when enabled in the rule config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    // Resolution
    UnresolvedDependency,
    UnresolvedUse,
    UnknownLibrary,
    AmbiguousInstantiation,
    ArchitectureHasEntity,
    DuplicateEntityInLibrary,
    DuplicatePackageInLibrary,
    // Signals and processes
    SensitivityListIncomplete,
    UndrivenSignal,
    MultiDrivenSignal,
    GenerateNotElaborated,
    // Verification
    InvalidVerificationTag,
    MissingLivenessBound,
    MissingCoverCompanion,
    MissingVerificationBlock,
    MissingVerificationCheck,
    AmbiguousConstruct,
    // Optional
    EntityHasPorts,
    EntityWithoutArch,
    UnusedSignal,
    SensitivityListSuperfluous,
    ComplexProcess,
    CombProcessNoDefault,
}

impl Rule {
    pub const ALL: &'static [Rule] = &[
        Rule::UnresolvedDependency,
        Rule::UnresolvedUse,
        Rule::UnknownLibrary,
        Rule::AmbiguousInstantiation,
        Rule::ArchitectureHasEntity,
        Rule::DuplicateEntityInLibrary,
        Rule::DuplicatePackageInLibrary,
        Rule::SensitivityListIncomplete,
        Rule::UndrivenSignal,
        Rule::MultiDrivenSignal,
        Rule::GenerateNotElaborated,
        Rule::InvalidVerificationTag,
        Rule::MissingLivenessBound,
        Rule::MissingCoverCompanion,
        Rule::MissingVerificationBlock,
        Rule::MissingVerificationCheck,
        Rule::AmbiguousConstruct,
        Rule::EntityHasPorts,
        Rule::EntityWithoutArch,
        Rule::UnusedSignal,
        Rule::SensitivityListSuperfluous,
        Rule::ComplexProcess,
        Rule::CombProcessNoDefault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::UnresolvedDependency => "unresolved_dependency",
            Rule::UnresolvedUse => "unresolved_use",
            Rule::UnknownLibrary => "unknown_library",
            Rule::AmbiguousInstantiation => "ambiguous_instantiation",
            Rule::ArchitectureHasEntity => "architecture_has_entity",
            Rule::DuplicateEntityInLibrary => "duplicate_entity_in_library",
            Rule::DuplicatePackageInLibrary => "duplicate_package_in_library",
            Rule::SensitivityListIncomplete => "sensitivity_list_incomplete",
            Rule::UndrivenSignal => "undriven_signal",
            Rule::MultiDrivenSignal => "multi_driven_signal",
            Rule::GenerateNotElaborated => "generate_not_elaborated",
            Rule::InvalidVerificationTag => "invalid_verification_tag",
            Rule::MissingLivenessBound => "missing_liveness_bound",
            Rule::MissingCoverCompanion => "missing_cover_companion",
            Rule::MissingVerificationBlock => "missing_verification_block",
            Rule::MissingVerificationCheck => "missing_verification_check",
            Rule::AmbiguousConstruct => "ambiguous_construct",
            Rule::EntityHasPorts => "entity_has_ports",
            Rule::EntityWithoutArch => "entity_without_arch",
            Rule::UnusedSignal => "unused_signal",
            Rule::SensitivityListSuperfluous => "sensitivity_list_superfluous",
            Rule::ComplexProcess => "complex_process",
            Rule::CombProcessNoDefault => "comb_process_no_default",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Rule::ALL.iter().copied().find(|rule| rule.as_str() == s)
    }

    /// Optional rules must be switched on explicitly.
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Rule::EntityHasPorts
                | Rule::EntityWithoutArch
                | Rule::UnusedSignal
                | Rule::SensitivityListSuperfluous
                | Rule::ComplexProcess
                | Rule::CombProcessNoDefault
        )
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            Rule::UnresolvedDependency
            | Rule::UnknownLibrary
            | Rule::ArchitectureHasEntity
            | Rule::DuplicateEntityInLibrary
            | Rule::DuplicatePackageInLibrary
            | Rule::SensitivityListIncomplete
            | Rule::MultiDrivenSignal
            | Rule::InvalidVerificationTag
            | Rule::MissingLivenessBound => Severity::Error,
            Rule::GenerateNotElaborated
            | Rule::SensitivityListSuperfluous
            | Rule::ComplexProcess => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single policy finding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Violation {
    pub rule: Rule,
    pub severity: Severity,
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl Violation {
    /// A violation at the rule's default severity.
    pub fn new(rule: Rule, file: &str, line: usize, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity: rule.default_severity(),
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Violation counts by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Summary {
    pub total: usize,
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
}

impl Summary {
    pub fn from_violations(violations: &[Violation]) -> Self {
        let mut summary = Summary::default();
        for v in violations {
            summary.total += 1;
            match v.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Info => summary.info += 1,
            }
        }
        summary
    }
}

/// Where a missing verification check should be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationAnchor {
    pub label: String,
    pub line_start: usize,
    pub line_end: usize,
    /// False when no verification block exists yet and the anchor points at
    /// the architecture header.
    pub exists: bool,
}

/// One incomplete construct and the check ids it still needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MissingCheckTask {
    pub file: String,
    pub scope: String,
    pub anchor: VerificationAnchor,
    pub missing_ids: Vec<String>,
    pub bindings: BTreeMap<String, String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// A construct whose role bindings could not be inferred uniquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AmbiguousConstruct {
    pub kind: String,
    pub scope: String,
    pub file: String,
    pub line: usize,
    pub candidates: BTreeMap<String, Vec<String>>,
}

/// Output of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalResult {
    pub violations: Vec<Violation>,
    pub summary: Summary,
    #[serde(default)]
    pub missing_checks: Vec<MissingCheckTask>,
    #[serde(default)]
    pub ambiguous_constructs: Vec<AmbiguousConstruct>,
}

impl EvalResult {
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }
}

/// Per-rule override: either disabled or forced to a severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleSetting {
    Off,
    Severity(Severity),
}

impl std::str::FromStr for RuleSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("off") {
            return Ok(RuleSetting::Off);
        }
        s.parse::<Severity>()
            .map(RuleSetting::Severity)
            .map_err(|_| format!("invalid rule setting {:?}, must be off, info, warning or error", s))
    }
}

impl std::fmt::Display for RuleSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleSetting::Off => write!(f, "off"),
            RuleSetting::Severity(s) => write!(f, "{}", s),
        }
    }
}

impl Serialize for RuleSetting {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RuleSetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Rule configuration for one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub rules: BTreeMap<Rule, RuleSetting>,
    /// Paths treated as third-party on top of the `files` table flags.
    /// Matched exactly or as a path suffix.
    #[serde(default)]
    pub third_party_files: BTreeSet<String>,
}

impl RuleConfig {
    pub fn set(mut self, rule: Rule, setting: RuleSetting) -> Self {
        self.rules.insert(rule, setting);
        self
    }

    /// Disabled rules report nothing. A rule is disabled when set to `off`,
    /// or when it is optional and not configured.
    pub fn is_disabled(&self, rule: Rule) -> bool {
        match self.rules.get(&rule) {
            Some(RuleSetting::Off) => true,
            Some(RuleSetting::Severity(_)) => false,
            None => rule.is_optional(),
        }
    }

    pub fn severity_override(&self, rule: Rule) -> Option<Severity> {
        match self.rules.get(&rule) {
            Some(RuleSetting::Severity(s)) => Some(*s),
            _ => None,
        }
    }

    pub fn is_third_party_path(&self, path: &str) -> bool {
        self.third_party_files
            .iter()
            .any(|tp| path == tp || path.ends_with(&format!("/{}", tp.trim_start_matches("./"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_names_round_trip() {
        for rule in Rule::ALL {
            assert_eq!(Rule::parse(rule.as_str()), Some(*rule));
            let json = serde_json::to_string(rule).unwrap();
            assert_eq!(json, format!("\"{}\"", rule.as_str()));
        }
        assert_eq!(Rule::parse("no_such_rule"), None);
    }

    #[test]
    fn test_rule_setting_parse() {
        assert_eq!("off".parse::<RuleSetting>(), Ok(RuleSetting::Off));
        assert_eq!(
            "Warning".parse::<RuleSetting>(),
            Ok(RuleSetting::Severity(Severity::Warning))
        );
        assert!("loud".parse::<RuleSetting>().is_err());
    }

    #[test]
    fn test_optional_rules_need_enabling() {
        let config = RuleConfig::default();
        assert!(config.is_disabled(Rule::UnusedSignal));
        assert!(!config.is_disabled(Rule::UnresolvedDependency));

        let config = config
            .set(Rule::UnusedSignal, RuleSetting::Severity(Severity::Info))
            .set(Rule::UnresolvedDependency, RuleSetting::Off);
        assert!(!config.is_disabled(Rule::UnusedSignal));
        assert!(config.is_disabled(Rule::UnresolvedDependency));
        assert_eq!(config.severity_override(Rule::UnusedSignal), Some(Severity::Info));
    }

    #[test]
    fn test_rule_config_from_json() {
        let config: RuleConfig = serde_json::from_str(
            r#"{"rules": {"unused_signal": "warning", "multi_driven_signal": "off"}}"#,
        )
        .unwrap();
        assert_eq!(config.rules.len(), 2);
        assert!(config.is_disabled(Rule::MultiDrivenSignal));
        assert!(serde_json::from_str::<RuleConfig>(r#"{"rules": {"unused_signal": "loud"}}"#).is_err());
        assert!(serde_json::from_str::<RuleConfig>(r#"{"rules": {"bogus": "info"}}"#).is_err());
    }

    #[test]
    fn test_third_party_suffix_match() {
        let config = RuleConfig {
            third_party_files: ["vendor/ip.vhd".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(config.is_third_party_path("vendor/ip.vhd"));
        assert!(config.is_third_party_path("/proj/vendor/ip.vhd"));
        assert!(!config.is_third_party_path("/proj/myvendor/ip.vhd"));
    }

    #[test]
    fn test_summary_counts() {
        let violations = vec![
            Violation::new(Rule::UnresolvedDependency, "a.vhd", 1, "x"),
            Violation::new(Rule::UndrivenSignal, "a.vhd", 2, "y"),
            Violation::new(Rule::ComplexProcess, "a.vhd", 3, "z"),
        ];
        let summary = Summary::from_violations(&violations);
        assert_eq!(summary, Summary { total: 3, errors: 1, warnings: 1, info: 1 });
    }
}
