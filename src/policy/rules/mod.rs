//! Rule registry.
//!
//! Every rule is a pure function over [`Tables`]. Rules are grouped into
//! passes; a pass declares the relations it reads so the incremental
//! evaluator can tell which passes a delta invalidates.

mod processes;
mod resolution;
mod signals;
mod structure;

use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};

use super::registry::CheckRegistry;
use super::types::{AmbiguousConstruct, MissingCheckTask, Rule, Violation};
use super::verification;
use crate::facts::{PortRow, TableKind, Tables};

/// Read-only inputs shared by all rules.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub registry: &'a CheckRegistry,
}

/// Unfiltered output of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub violations: Vec<Violation>,
    pub missing_checks: Vec<MissingCheckTask>,
    pub ambiguous_constructs: Vec<AmbiguousConstruct>,
}

impl From<Vec<Violation>> for RawOutput {
    fn from(violations: Vec<Violation>) -> Self {
        Self {
            violations,
            ..Default::default()
        }
    }
}

impl RawOutput {
    pub fn merge(&mut self, other: &RawOutput) {
        self.violations.extend(other.violations.iter().cloned());
        self.missing_checks.extend(other.missing_checks.iter().cloned());
        self.ambiguous_constructs
            .extend(other.ambiguous_constructs.iter().cloned());
    }
}

pub type PassFn = fn(&Tables, &RuleContext<'_>) -> RawOutput;

/// A named group of rules and the relations they depend on.
pub struct RulePass {
    pub name: &'static str,
    pub rules: &'static [Rule],
    pub reads: &'static [TableKind],
    pub run: PassFn,
}

impl RulePass {
    /// True when a change to any of `kinds` can change this pass's output.
    pub fn is_affected_by(&self, kinds: &BTreeSet<TableKind>) -> bool {
        self.reads.iter().any(|kind| kinds.contains(kind))
    }
}

impl std::fmt::Debug for RulePass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulePass")
            .field("name", &self.name)
            .field("rules", &self.rules)
            .field("reads", &self.reads)
            .finish()
    }
}

static PASSES: Lazy<Vec<RulePass>> = Lazy::new(|| {
    use TableKind::*;
    vec![
        RulePass {
            name: "dependencies",
            rules: &[
                Rule::UnresolvedDependency,
                Rule::UnresolvedUse,
                Rule::UnknownLibrary,
                Rule::AmbiguousInstantiation,
            ],
            reads: &[Dependencies],
            run: |tables, ctx| resolution::unresolved_dependencies(tables, ctx).into(),
        },
        RulePass {
            name: "duplicates",
            rules: &[Rule::DuplicateEntityInLibrary, Rule::DuplicatePackageInLibrary],
            reads: &[Entities, Packages],
            run: |tables, ctx| resolution::duplicate_units(tables, ctx).into(),
        },
        RulePass {
            name: "architecture_has_entity",
            rules: &[Rule::ArchitectureHasEntity],
            reads: &[Architectures, Entities],
            run: |tables, ctx| structure::architecture_has_entity(tables, ctx).into(),
        },
        RulePass {
            name: "entity_without_arch",
            rules: &[Rule::EntityWithoutArch],
            reads: &[Architectures, Entities],
            run: |tables, ctx| structure::entity_without_arch(tables, ctx).into(),
        },
        RulePass {
            name: "entity_has_ports",
            rules: &[Rule::EntityHasPorts],
            reads: &[Entities, Ports],
            run: |tables, ctx| structure::entity_has_ports(tables, ctx).into(),
        },
        RulePass {
            name: "generate_not_elaborated",
            rules: &[Rule::GenerateNotElaborated],
            reads: &[Generates],
            run: |tables, ctx| structure::generate_not_elaborated(tables, ctx).into(),
        },
        RulePass {
            name: "sensitivity",
            rules: &[Rule::SensitivityListIncomplete, Rule::SensitivityListSuperfluous],
            reads: &[Processes, Signals, Ports, Architectures],
            run: |tables, ctx| processes::sensitivity(tables, ctx).into(),
        },
        RulePass {
            name: "complex_process",
            rules: &[Rule::ComplexProcess],
            reads: &[Processes],
            run: |tables, ctx| processes::complex_process(tables, ctx).into(),
        },
        RulePass {
            name: "comb_process_no_default",
            rules: &[Rule::CombProcessNoDefault],
            reads: &[Processes, CaseStatements],
            run: |tables, ctx| processes::comb_process_no_default(tables, ctx).into(),
        },
        RulePass {
            name: "drivers",
            rules: &[Rule::UndrivenSignal, Rule::MultiDrivenSignal, Rule::UnusedSignal],
            reads: &[Signals, Processes, Assignments, Instances],
            run: |tables, ctx| signals::drivers(tables, ctx).into(),
        },
        RulePass {
            name: "verification",
            rules: &[
                Rule::InvalidVerificationTag,
                Rule::MissingLivenessBound,
                Rule::MissingCoverCompanion,
                Rule::MissingVerificationBlock,
                Rule::MissingVerificationCheck,
                Rule::AmbiguousConstruct,
            ],
            reads: &[
                Architectures,
                Ports,
                Signals,
                Processes,
                Assignments,
                CaseStatements,
                Types,
                VerificationBlocks,
                VerificationTags,
                TagErrors,
            ],
            run: verification::evaluate,
        },
    ]
});

/// Every registered pass, in evaluation order.
pub fn passes() -> &'static [RulePass] {
    &PASSES
}

/// Lowercase identifier at the start of a name: `data(3)` and `rec.field`
/// both refer to `data` / `rec`.
pub(crate) fn base_name(name: &str) -> String {
    let name = name.trim();
    let end = name.find(['(', '.', ' ', '\'']).unwrap_or(name.len());
    name[..end].to_ascii_lowercase()
}

/// Types whose signals carry a single bit.
pub(crate) fn is_single_bit(ty: &str) -> bool {
    matches!(
        base_name(ty).as_str(),
        "std_logic" | "std_ulogic" | "bit" | "boolean"
    )
}

/// Scalar types without a resolution function. Only these make several
/// drivers an error; `std_logic` and arrays of it resolve.
pub(crate) fn is_unresolved_scalar(ty: &str) -> bool {
    matches!(
        base_name(ty).as_str(),
        "bit"
            | "std_ulogic"
            | "boolean"
            | "integer"
            | "natural"
            | "positive"
            | "time"
            | "character"
            | "real"
    )
}

/// Architecture-to-entity lookup and entity ports.
pub(crate) struct DesignIndex<'a> {
    /// (file, arch lowercase) -> entity lowercase.
    arch_entity: HashMap<(&'a str, String), String>,
    /// entity lowercase -> ports, same-file ports first.
    ports: HashMap<String, Vec<&'a PortRow>>,
}

impl<'a> DesignIndex<'a> {
    pub fn new(tables: &'a Tables) -> Self {
        let arch_entity = tables
            .architectures
            .iter()
            .map(|a| {
                (
                    (a.file.as_str(), a.name.to_ascii_lowercase()),
                    a.entity.to_ascii_lowercase(),
                )
            })
            .collect();
        let mut ports: HashMap<String, Vec<&PortRow>> = HashMap::new();
        for port in &tables.ports {
            ports
                .entry(port.entity.to_ascii_lowercase())
                .or_default()
                .push(port);
        }
        Self { arch_entity, ports }
    }

    pub fn entity_of<'b>(&'b self, file: &'b str, arch: &str) -> Option<&'b str> {
        self.arch_entity
            .get(&(file, arch.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Ports of the entity implemented by `arch`. Ports declared in the
    /// architecture's own file win over same-named entities elsewhere.
    pub fn ports_of(&self, file: &str, arch: &str) -> Vec<&'a PortRow> {
        let Some(entity) = self.entity_of(file, arch) else {
            return Vec::new();
        };
        let all = self.ports.get(entity).cloned().unwrap_or_default();
        let local: Vec<&PortRow> = all.iter().copied().filter(|p| p.file == file).collect();
        if local.is_empty() {
            all
        } else {
            local
        }
    }
}
