//! Output formatting for evaluation results.
//!
//! Supports three output formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: the evaluation result plus run metadata
//! - SARIF: Static Analysis Results Interchange Format for IDE/CI integration

use colored::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use crate::policy::{AmbiguousConstruct, EvalResult, MissingCheckTask, Rule, Severity, Summary, Violation};

// =============================================================================
// JSON Format
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonReport {
    pub version: String,
    pub path: String,
    pub files_analyzed: usize,
    pub passed: bool,
    pub summary: Summary,
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_checks: Vec<MissingCheckTask>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambiguous_constructs: Vec<AmbiguousConstruct>,
}

pub fn write_json<W: Write>(
    out: &mut W,
    path: &str,
    files_analyzed: usize,
    result: &EvalResult,
) -> anyhow::Result<()> {
    let report = JsonReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        path: path.to_string(),
        files_analyzed,
        passed: !result.has_errors(),
        summary: result.summary.clone(),
        violations: result.violations.clone(),
        missing_checks: result.missing_checks.clone(),
        ambiguous_constructs: result.ambiguous_constructs.clone(),
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}

// =============================================================================
// SARIF Format
// =============================================================================

const SARIF_VERSION: &str = "2.1.0";
const SARIF_SCHEMA: &str = "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json";
const TOOL_NAME: &str = "hdlcheck";
const INFO_URI: &str = "https://github.com/zen-systems/hdlcheck";

#[derive(Serialize, Deserialize)]
struct SarifReport {
    version: String,
    #[serde(rename = "$schema")]
    schema: String,
    runs: Vec<SarifRun>,
}

#[derive(Serialize, Deserialize)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
}

#[derive(Serialize, Deserialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Serialize, Deserialize)]
struct SarifDriver {
    name: String,
    version: String,
    #[serde(rename = "informationUri")]
    information_uri: String,
    rules: Vec<SarifRule>,
}

#[derive(Serialize, Deserialize)]
struct SarifRule {
    id: String,
    name: String,
    #[serde(rename = "shortDescription")]
    short_description: SarifMessage,
    #[serde(rename = "helpUri")]
    help_uri: String,
    #[serde(rename = "defaultConfiguration")]
    default_config: SarifRuleConfig,
}

#[derive(Serialize, Deserialize)]
struct SarifRuleConfig {
    level: String,
}

#[derive(Serialize, Deserialize)]
struct SarifResult {
    #[serde(rename = "ruleId")]
    rule_id: String,
    level: String,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
}

#[derive(Serialize, Deserialize)]
struct SarifMessage {
    text: String,
}

#[derive(Serialize, Deserialize)]
struct SarifLocation {
    #[serde(rename = "physicalLocation")]
    physical_location: SarifPhysicalLocation,
}

#[derive(Serialize, Deserialize)]
struct SarifPhysicalLocation {
    #[serde(rename = "artifactLocation")]
    artifact_location: SarifArtifact,
    region: SarifRegion,
}

#[derive(Serialize, Deserialize)]
struct SarifArtifact {
    uri: String,
}

#[derive(Serialize, Deserialize)]
struct SarifRegion {
    #[serde(rename = "startLine")]
    start_line: usize,
}

/// Rule metadata for SARIF output.
struct RuleInfo {
    name: &'static str,
    short_description: &'static str,
}

fn rule_info(rule: Rule) -> RuleInfo {
    let (name, short_description) = match rule {
        Rule::UnresolvedDependency => ("UnresolvedDependency", "Instantiated unit is not declared in any library"),
        Rule::UnresolvedUse => ("UnresolvedUse", "Use or context clause names nothing that is declared"),
        Rule::UnknownLibrary => ("UnknownLibrary", "Library clause names a library with no design files"),
        Rule::AmbiguousInstantiation => ("AmbiguousInstantiation", "Unqualified instance matches units in several libraries"),
        Rule::ArchitectureHasEntity => ("ArchitectureHasEntity", "Architecture implements an undeclared entity"),
        Rule::DuplicateEntityInLibrary => ("DuplicateEntityInLibrary", "Entity declared twice in one library"),
        Rule::DuplicatePackageInLibrary => ("DuplicatePackageInLibrary", "Package declared twice in one library"),
        Rule::SensitivityListIncomplete => ("SensitivityListIncomplete", "Combinational process reads signals missing from its sensitivity list"),
        Rule::UndrivenSignal => ("UndrivenSignal", "Signal is read but never assigned"),
        Rule::MultiDrivenSignal => ("MultiDrivenSignal", "Signal is assigned from more than one driver"),
        Rule::GenerateNotElaborated => ("GenerateNotElaborated", "For-generate range is not static"),
        Rule::InvalidVerificationTag => ("InvalidVerificationTag", "Verification tag is malformed or does not match the check registry"),
        Rule::MissingLivenessBound => ("MissingLivenessBound", "Liveness check has no bound"),
        Rule::MissingCoverCompanion => ("MissingCoverCompanion", "Safety check has no cover companion in its scope"),
        Rule::MissingVerificationBlock => ("MissingVerificationBlock", "Architecture needs checks but has no verification block"),
        Rule::MissingVerificationCheck => ("MissingVerificationCheck", "Detected construct lacks a required verification check"),
        Rule::AmbiguousConstruct => ("AmbiguousConstruct", "Construct roles cannot be told apart"),
        Rule::EntityHasPorts => ("EntityHasPorts", "Entity declares no ports"),
        Rule::EntityWithoutArch => ("EntityWithoutArch", "Entity has no architecture"),
        Rule::UnusedSignal => ("UnusedSignal", "Signal is never used"),
        Rule::SensitivityListSuperfluous => ("SensitivityListSuperfluous", "Sensitivity list names signals the process never reads"),
        Rule::ComplexProcess => ("ComplexProcess", "Process assigns too many signals"),
        Rule::CombProcessNoDefault => ("CombProcessNoDefault", "Case in a combinational process has no others branch"),
    };
    RuleInfo {
        name,
        short_description,
    }
}

fn map_severity_to_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "note",
    }
}

fn make_relative_path(file_path: &str, base_path: &Path) -> String {
    if base_path.to_string_lossy().is_empty() {
        return file_path.to_string();
    }
    Path::new(file_path)
        .strip_prefix(base_path)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| file_path.replace('\\', "/"))
}

pub fn write_sarif<W: Write>(out: &mut W, base_path: &Path, result: &EvalResult) -> anyhow::Result<()> {
    let rule_set: BTreeSet<Rule> = result.violations.iter().map(|v| v.rule).collect();

    let rules: Vec<SarifRule> = rule_set
        .into_iter()
        .map(|rule| {
            let info = rule_info(rule);
            SarifRule {
                id: rule.as_str().to_string(),
                name: info.name.to_string(),
                short_description: SarifMessage {
                    text: info.short_description.to_string(),
                },
                help_uri: format!("{}#{}", INFO_URI, rule.as_str().replace('_', "-")),
                default_config: SarifRuleConfig {
                    level: map_severity_to_level(rule.default_severity()).to_string(),
                },
            }
        })
        .collect();

    let results: Vec<SarifResult> = result
        .violations
        .iter()
        .map(|v| SarifResult {
            rule_id: v.rule.as_str().to_string(),
            level: map_severity_to_level(v.severity).to_string(),
            message: SarifMessage {
                text: v.message.clone(),
            },
            locations: vec![SarifLocation {
                physical_location: SarifPhysicalLocation {
                    artifact_location: SarifArtifact {
                        uri: make_relative_path(&v.file, base_path),
                    },
                    region: SarifRegion {
                        start_line: v.line.max(1),
                    },
                },
            }],
        })
        .collect();

    let report = SarifReport {
        version: SARIF_VERSION.to_string(),
        schema: SARIF_SCHEMA.to_string(),
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifDriver {
                    name: TOOL_NAME.to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    information_uri: INFO_URI.to_string(),
                    rules,
                },
            },
            results,
        }],
    };

    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}

// =============================================================================
// Pretty Format
// =============================================================================

pub fn write_pretty<W: Write>(
    out: &mut W,
    path: &str,
    files_analyzed: usize,
    result: &EvalResult,
) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "  {} v{}", "hdlcheck".cyan().bold(), env!("CARGO_PKG_VERSION"))?;
    writeln!(out)?;
    writeln!(out, "  {}{} ({} files)", "Facts: ".dimmed(), path, files_analyzed)?;
    writeln!(out)?;

    write_result_summary(out, &result.summary)?;
    writeln!(out)?;

    if !result.violations.is_empty() {
        write_violations(out, &result.violations)?;
    }
    if !result.missing_checks.is_empty() {
        write_missing_checks(out, &result.missing_checks)?;
    }
    if !result.ambiguous_constructs.is_empty() {
        write_ambiguous(out, &result.ambiguous_constructs)?;
    }

    write_final_status(out, result)?;
    writeln!(out)
}

fn write_result_summary<W: Write>(out: &mut W, summary: &Summary) -> std::io::Result<()> {
    if summary.errors == 0 {
        write!(out, "  {}", "✓ PASS".green())?;
    } else {
        write!(out, "  {}", "✗ FAIL".red())?;
    }
    writeln!(
        out,
        "  {} errors, {} warnings, {} info",
        colored_count(summary.errors, Severity::Error),
        colored_count(summary.warnings, Severity::Warning),
        colored_count(summary.info, Severity::Info)
    )
}

fn colored_count(count: usize, severity: Severity) -> ColoredString {
    let text = count.to_string();
    match (count, severity) {
        (0, _) => text.dimmed(),
        (_, Severity::Error) => text.red().bold(),
        (_, Severity::Warning) => text.yellow(),
        (_, Severity::Info) => text.blue(),
    }
}

fn write_violations<W: Write>(out: &mut W, violations: &[Violation]) -> std::io::Result<()> {
    writeln!(out, "  {} ({}):", "Violations".bold(), violations.len())?;
    writeln!(out)?;

    for v in violations {
        write_severity_tag(out, v.severity)?;
        write!(out, "   {:<28}", v.rule.as_str().dimmed())?;
        write!(out, "{}", v.file.blue())?;
        if v.line > 0 {
            write!(out, "{}", format!(":{}", v.line).dimmed())?;
        }
        writeln!(out)?;
        writeln!(out, "            {}", v.message)?;
        writeln!(out)?;
    }
    Ok(())
}

fn write_severity_tag<W: Write>(out: &mut W, severity: Severity) -> std::io::Result<()> {
    match severity {
        Severity::Error => write!(out, "    {} ", "ERROR".red()),
        Severity::Warning => write!(out, "    {} ", "WARN ".yellow()),
        Severity::Info => write!(out, "    {} ", "INFO ".blue()),
    }
}

fn write_missing_checks<W: Write>(out: &mut W, tasks: &[MissingCheckTask]) -> std::io::Result<()> {
    writeln!(out, "  {} ({}):", "Missing checks".bold(), tasks.len())?;
    writeln!(out)?;

    for task in tasks {
        let anchor = if task.anchor.exists {
            format!("block {} at line {}", task.anchor.label, task.anchor.line_start)
        } else {
            format!("no block yet, architecture at line {}", task.anchor.line_start)
        };
        writeln!(out, "    {} {}  {}", task.file.blue(), task.scope, anchor.dimmed())?;
        for id in &task.missing_ids {
            writeln!(out, "        - {}", id)?;
        }
        for note in &task.notes {
            writeln!(out, "          {}", note.dimmed())?;
        }
    }
    writeln!(out)
}

fn write_ambiguous<W: Write>(out: &mut W, constructs: &[AmbiguousConstruct]) -> std::io::Result<()> {
    writeln!(out, "  {} ({}):", "Ambiguous constructs".bold(), constructs.len())?;
    writeln!(out)?;

    for c in constructs {
        writeln!(out, "    {} {}:{} {}", c.kind.yellow(), c.file.blue(), c.line, c.scope)?;
        for (role, candidates) in &c.candidates {
            writeln!(out, "        {} = one of {}", role, candidates.join(", "))?;
        }
    }
    writeln!(out)
}

fn write_final_status<W: Write>(out: &mut W, result: &EvalResult) -> std::io::Result<()> {
    write!(out, "  {}", format!("Total: {}", result.summary.total).dimmed())?;
    write!(out, "  ")?;
    if result.has_errors() {
        writeln!(out, "{}", "FAILED".red())
    } else {
        writeln!(out, "{}", "PASSED".green())
    }
}
