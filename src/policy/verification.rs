//! Construct detection and verification tag checks.
//!
//! Constructs (FSMs, counters, ready/valid handshakes and FIFOs) are found
//! from fact patterns only, never from signal names. Each construct needs a
//! set of checks from the [`CheckRegistry`]; checks are satisfied by
//! verification tags written in the construct's architecture or entity
//! scope. An `arch:rtl` tag never satisfies a construct in `arch:gate`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::registry::{CheckRegistry, CheckSpec};
use super::rules::{base_name, is_single_bit, DesignIndex, RawOutput, RuleContext};
use super::types::{
    AmbiguousConstruct, MissingCheckTask, Rule, VerificationAnchor, Violation,
};
use crate::facts::{
    ArchitectureRow, AssignmentRow, CaseRow, PortRow, ProcessRow, SignalRow, Tables, TypeRow,
    VerificationBlockRow, VerificationTagRow,
};
use crate::scope;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());

const NUMERIC_TYPES: &[&str] = &["integer", "natural", "positive", "signed", "unsigned"];
const MAX_SUBTYPE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstructKind {
    Fsm,
    Counter,
    ReadyValid,
    Fifo,
}

impl ConstructKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstructKind::Fsm => "fsm",
            ConstructKind::Counter => "counter",
            ConstructKind::ReadyValid => "ready_valid",
            ConstructKind::Fifo => "fifo",
        }
    }

    pub fn required_checks(&self) -> &'static [&'static str] {
        match self {
            ConstructKind::Fsm => &["fsm.legal_state", "fsm.reset_known", "cover.fsm.transition_taken"],
            ConstructKind::ReadyValid => &["rv.stable_while_stalled", "cover.rv.handshake"],
            ConstructKind::Fifo => &["fifo.no_read_empty", "fifo.no_write_full", "cover.fifo.activity"],
            ConstructKind::Counter => &["ctr.range", "ctr.step_rule", "cover.ctr.moved"],
        }
    }
}

/// A detected construct and its role bindings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Construct {
    pub kind: ConstructKind,
    pub file: String,
    pub arch: String,
    /// Scope path of the construct, possibly inside generates.
    pub scope: String,
    pub line: usize,
    pub bindings: BTreeMap<String, String>,
}

impl Construct {
    fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.kind.as_str(),
            self.file,
            self.arch.to_ascii_lowercase(),
            format_bindings(&self.bindings).to_ascii_lowercase()
        )
    }

    fn arch_scope(&self) -> String {
        format!("arch:{}", self.arch)
    }
}

fn format_bindings(bindings: &BTreeMap<String, String>) -> String {
    bindings
        .iter()
        .map(|(role, signal)| format!("{}={}", role, signal))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeClass {
    Enum,
    Array,
    Numeric,
    Other,
}

struct TypeIndex<'a> {
    by_name: HashMap<String, &'a TypeRow>,
}

impl<'a> TypeIndex<'a> {
    fn new(tables: &'a Tables) -> Self {
        let mut by_name = HashMap::new();
        for ty in &tables.types {
            by_name.entry(ty.name.to_ascii_lowercase()).or_insert(ty);
        }
        Self { by_name }
    }

    /// Follow subtypes to the underlying type class.
    fn classify(&self, ty: &str) -> TypeClass {
        let mut name = base_name(ty);
        for _ in 0..MAX_SUBTYPE_DEPTH {
            if NUMERIC_TYPES.contains(&name.as_str()) {
                return TypeClass::Numeric;
            }
            let Some(row) = self.by_name.get(&name) else {
                return TypeClass::Other;
            };
            match row.kind.as_str() {
                "enum" | "enumeration" => return TypeClass::Enum,
                "array" => return TypeClass::Array,
                "subtype" if !row.base_type.is_empty() => name = base_name(&row.base_type),
                _ => return TypeClass::Other,
            }
        }
        TypeClass::Other
    }
}

/// Everything declared in one architecture.
struct ArchView<'a> {
    row: &'a ArchitectureRow,
    signals: HashMap<String, &'a SignalRow>,
    processes: Vec<&'a ProcessRow>,
    assignments: Vec<&'a AssignmentRow>,
    cases: Vec<&'a CaseRow>,
    ports: HashMap<String, &'a PortRow>,
}

fn lower_set(names: &[String]) -> BTreeSet<String> {
    names.iter().map(|n| base_name(n)).collect()
}

impl<'a> ArchView<'a> {
    fn collect(tables: &'a Tables, index: &DesignIndex<'a>) -> Vec<ArchView<'a>> {
        let mut views: BTreeMap<(&str, String), ArchView<'a>> = BTreeMap::new();
        for arch in &tables.architectures {
            let ports = index
                .ports_of(&arch.file, &arch.name)
                .into_iter()
                .map(|p| (p.name.to_ascii_lowercase(), p))
                .collect();
            views.entry((arch.file.as_str(), arch.name.to_ascii_lowercase())).or_insert(ArchView {
                row: arch,
                signals: HashMap::new(),
                processes: Vec::new(),
                assignments: Vec::new(),
                cases: Vec::new(),
                ports,
            });
        }

        // Rows outside any known architecture have no anchor and are skipped.
        for signal in &tables.signals {
            if let Some(v) = views.get_mut(&(signal.file.as_str(), signal.arch.to_ascii_lowercase())) {
                v.signals.entry(signal.name.to_ascii_lowercase()).or_insert(signal);
            }
        }
        for process in &tables.processes {
            if let Some(v) = views.get_mut(&(process.file.as_str(), process.arch.to_ascii_lowercase())) {
                v.processes.push(process);
            }
        }
        for assignment in &tables.assignments {
            if let Some(v) = views.get_mut(&(assignment.file.as_str(), assignment.arch.to_ascii_lowercase())) {
                v.assignments.push(assignment);
            }
        }
        for case in &tables.case_statements {
            if let Some(v) = views.get_mut(&(case.file.as_str(), case.arch.to_ascii_lowercase())) {
                v.cases.push(case);
            }
        }
        views.into_values().collect()
    }

    fn single_bit_port(&self, name: &str) -> Option<&'a PortRow> {
        self.ports
            .get(&base_name(name))
            .copied()
            .filter(|p| is_single_bit(&p.ty))
    }

    /// Unique single-bit port with one of `directions` among `names`.
    fn unique_port(&self, names: &BTreeSet<String>, directions: &[&str], skip: &[&str]) -> Option<&'a PortRow> {
        let mut found = names
            .iter()
            .filter(|n| !skip.contains(&n.as_str()))
            .filter_map(|n| self.single_bit_port(n))
            .filter(|p| directions.contains(&p.direction.as_str()));
        let first = found.next()?;
        match found.next() {
            Some(_) => None,
            None => Some(first),
        }
    }
}

/// Detect constructs and ambiguous role bindings in every architecture.
pub fn detect_constructs(tables: &Tables) -> (Vec<Construct>, Vec<AmbiguousConstruct>) {
    let index = DesignIndex::new(tables);
    let types = TypeIndex::new(tables);
    let mut constructs: BTreeMap<String, Construct> = BTreeMap::new();
    let mut ambiguous: BTreeMap<(String, String, Vec<String>), AmbiguousConstruct> = BTreeMap::new();

    for view in ArchView::collect(tables, &index) {
        let mut found = Vec::new();
        detect_fsms(&view, &types, &mut found);
        detect_counters(&view, &types, &mut found);
        detect_ready_valid(&view, &mut found, &mut ambiguous);
        detect_fifos(&view, &types, &mut found);
        for construct in found {
            constructs.entry(construct.dedup_key()).or_insert(construct);
        }
    }

    let mut constructs: Vec<Construct> = constructs.into_values().collect();
    constructs.sort_by(|a, b| (&a.file, a.line, a.kind).cmp(&(&b.file, b.line, b.kind)));
    (constructs, ambiguous.into_values().collect())
}

fn construct(view: &ArchView<'_>, kind: ConstructKind, scope: &str, line: usize, bindings: &[(&str, &str)]) -> Construct {
    Construct {
        kind,
        file: view.row.file.clone(),
        arch: view.row.name.clone(),
        scope: scope.to_string(),
        line,
        bindings: bindings
            .iter()
            .map(|(role, signal)| (role.to_string(), signal.to_string()))
            .collect(),
    }
}

fn detect_fsms(view: &ArchView<'_>, types: &TypeIndex<'_>, out: &mut Vec<Construct>) {
    for case in &view.cases {
        let expression = case.expression.trim();
        if !IDENTIFIER.is_match(expression) {
            continue;
        }
        let name = expression.to_ascii_lowercase();
        let Some(signal) = view.signals.get(&name) else {
            continue;
        };
        if types.classify(&signal.ty) != TypeClass::Enum {
            continue;
        }
        let registered = view.processes.iter().any(|p| {
            p.is_sequential
                && lower_set(&p.assigned_signals).contains(&name)
                && lower_set(&p.read_signals).contains(&name)
        });
        if registered {
            out.push(construct(view, ConstructKind::Fsm, &signal.scope, signal.line, &[("state", &signal.name)]));
        }
    }
}

fn detect_counters(view: &ArchView<'_>, types: &TypeIndex<'_>, out: &mut Vec<Construct>) {
    for process in view.processes.iter().filter(|p| p.is_sequential) {
        let read = lower_set(&process.read_signals);
        for name in lower_set(&process.assigned_signals).intersection(&read) {
            let Some(signal) = view.signals.get(name) else {
                continue;
            };
            if types.classify(&signal.ty) == TypeClass::Numeric {
                out.push(construct(view, ConstructKind::Counter, &signal.scope, signal.line, &[("counter", &signal.name)]));
            }
        }
    }
}

fn detect_ready_valid(
    view: &ArchView<'_>,
    out: &mut Vec<Construct>,
    ambiguous: &mut BTreeMap<(String, String, Vec<String>), AmbiguousConstruct>,
) {
    for assignment in &view.assignments {
        let reads: Vec<String> = lower_set(&assignment.read_signals).into_iter().collect();
        if reads.len() != 2 {
            continue;
        }
        let (Some(a), Some(b)) = (view.single_bit_port(&reads[0]), view.single_bit_port(&reads[1])) else {
            continue;
        };
        let is_out = |p: &PortRow| matches!(p.direction.as_str(), "out" | "buffer");
        let roles = match (is_out(a), is_out(b), a.direction.as_str(), b.direction.as_str()) {
            (true, false, _, "in") => Some((a, b)),
            (false, true, "in", _) => Some((b, a)),
            _ => None,
        };
        match roles {
            Some((valid, ready)) => out.push(construct(
                view,
                ConstructKind::ReadyValid,
                &assignment.scope,
                assignment.line,
                &[("valid", &valid.name), ("ready", &ready.name)],
            )),
            None => {
                let names = vec![a.name.clone(), b.name.clone()];
                let key = (
                    view.row.file.clone(),
                    view.row.name.to_ascii_lowercase(),
                    reads.clone(),
                );
                ambiguous.entry(key).or_insert_with(|| AmbiguousConstruct {
                    kind: ConstructKind::ReadyValid.as_str().to_string(),
                    scope: format!("arch:{}", view.row.name),
                    file: view.row.file.clone(),
                    line: assignment.line,
                    candidates: [
                        ("ready".to_string(), names.clone()),
                        ("valid".to_string(), names),
                    ]
                    .into_iter()
                    .collect(),
                });
            }
        }
    }
}

fn detect_fifos(view: &ArchView<'_>, types: &TypeIndex<'_>, out: &mut Vec<Construct>) {
    let mut signals: Vec<&SignalRow> = view.signals.values().copied().collect();
    signals.sort();

    for signal in signals {
        if types.classify(&signal.ty) != TypeClass::Array {
            continue;
        }
        let name = signal.name.to_ascii_lowercase();
        let writers: Vec<&ProcessRow> = view
            .processes
            .iter()
            .copied()
            .filter(|p| lower_set(&p.assigned_signals).contains(&name))
            .collect();
        let [writer] = writers.as_slice() else {
            continue;
        };
        let writer: &ProcessRow = writer;
        let readers: Vec<&ProcessRow> = view
            .processes
            .iter()
            .copied()
            .filter(|p| lower_set(&p.read_signals).contains(&name))
            .collect();
        let others: Vec<&ProcessRow> = readers.iter().copied().filter(|p| !std::ptr::eq(*p, writer)).collect();
        let reader = match (others.as_slice(), readers.is_empty()) {
            ([only], _) => *only,
            ([], false) => writer,
            _ => continue,
        };

        let skip_for = |p: &ProcessRow| [base_name(&p.clock_signal), base_name(&p.reset_signal)];
        let writer_skip = skip_for(writer);
        let reader_skip = skip_for(reader);
        let writer_skip: Vec<&str> = writer_skip.iter().map(String::as_str).collect();
        let reader_skip: Vec<&str> = reader_skip.iter().map(String::as_str).collect();

        let inputs = ["in"];
        let outputs = ["out", "buffer"];
        let roles = (
            view.unique_port(&lower_set(&writer.read_signals), &inputs, &writer_skip),
            view.unique_port(&lower_set(&reader.read_signals), &inputs, &reader_skip),
            view.unique_port(&lower_set(&writer.assigned_signals), &outputs, &[]),
            view.unique_port(&lower_set(&reader.assigned_signals), &outputs, &[]),
        );
        let (Some(wr_en), Some(rd_en), Some(full), Some(empty)) = roles else {
            continue;
        };
        if wr_en.name.eq_ignore_ascii_case(&rd_en.name) || full.name.eq_ignore_ascii_case(&empty.name) {
            continue;
        }
        out.push(construct(
            view,
            ConstructKind::Fifo,
            &signal.scope,
            signal.line,
            &[
                ("wr_en", &wr_en.name),
                ("rd_en", &rd_en.name),
                ("full", &full.name),
                ("empty", &empty.name),
            ],
        ));
    }
}

/// A tag that passed validation.
struct ValidTag<'a> {
    row: &'a VerificationTagRow,
    spec: &'a CheckSpec,
    /// `arch` or `entity`.
    kind: String,
    /// Lowercase unit name.
    target: String,
    bindings: BTreeMap<String, String>,
}

impl ValidTag<'_> {
    fn applies_to(&self, file: &str, arch: &str, index: &DesignIndex<'_>) -> bool {
        if self.row.file != file {
            return false;
        }
        match self.kind.as_str() {
            "arch" => self.target == arch.to_ascii_lowercase(),
            _ => index.entity_of(file, arch) == Some(self.target.as_str()),
        }
    }

    fn satisfies(&self, id: &str, construct: &Construct) -> bool {
        if self.spec.id != id {
            return false;
        }
        self.spec.required_bindings.iter().all(|role| {
            match (self.bindings.get(role), construct.bindings.get(role)) {
                (Some(tagged), Some(actual)) => base_name(tagged) == base_name(actual),
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
    }

    fn scope_key(&self) -> (&str, &str, &str) {
        (self.row.file.as_str(), self.kind.as_str(), self.target.as_str())
    }
}

fn validate_tags<'a>(
    tables: &'a Tables,
    registry: &'a CheckRegistry,
    index: &DesignIndex<'_>,
    out: &mut Vec<Violation>,
) -> Vec<ValidTag<'a>> {
    for error in &tables.tag_errors {
        out.push(Violation::new(
            Rule::InvalidVerificationTag,
            &error.file,
            error.line,
            format!("malformed verification tag: {}", error.message),
        ));
    }

    let mut valid = Vec::new();
    for row in &tables.verification_tags {
        let invalid = |message: String| {
            Violation::new(Rule::InvalidVerificationTag, &row.file, row.line, message)
        };

        let Some((kind, target)) = row
            .scope
            .split_once(':')
            .map(|(k, t)| (k.trim().to_ascii_lowercase(), t.trim().to_ascii_lowercase()))
            .filter(|(k, t)| (k == "arch" || k == "entity") && !t.is_empty())
        else {
            out.push(invalid(format!(
                "tag {} has malformed scope {:?}, expected arch:<name> or entity:<name>",
                row.id, row.scope
            )));
            continue;
        };
        let Some(spec) = registry.get(&row.id) else {
            out.push(invalid(format!("unknown verification check id {:?}", row.id)));
            continue;
        };
        if !spec.scope_type.allows(&kind) {
            out.push(invalid(format!(
                "check {} cannot be scoped to {}:{}",
                spec.id, kind, target
            )));
            continue;
        }

        let bindings: BTreeMap<String, String> = row
            .bindings
            .iter()
            .map(|(role, signal)| (role.trim().to_ascii_lowercase(), signal.trim().to_string()))
            .collect();
        let missing: Vec<&str> = spec
            .required_bindings
            .iter()
            .filter(|role| !bindings.contains_key(*role))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            out.push(invalid(format!(
                "tag {} is missing required binding(s): {}",
                spec.id,
                missing.join(", ")
            )));
            continue;
        }

        if !row.arch.is_empty() {
            let enclosing = row.arch.to_ascii_lowercase();
            let mismatch = match kind.as_str() {
                "arch" => target != enclosing,
                _ => index
                    .entity_of(&row.file, &row.arch)
                    .is_some_and(|entity| entity != target),
            };
            if mismatch {
                out.push(invalid(format!(
                    "tag {} is scoped to {}:{} but sits in architecture {}",
                    spec.id, kind, target, row.arch
                )));
                continue;
            }
        }

        if spec.requires_bound && !bindings.contains_key("bound") {
            out.push(Violation::new(
                Rule::MissingLivenessBound,
                &row.file,
                row.line,
                format!("liveness check {} needs a bound=<cycles> binding", spec.id),
            ));
            continue;
        }

        valid.push(ValidTag {
            row,
            spec,
            kind,
            target,
            bindings,
        });
    }

    for tag in valid.iter().filter(|t| t.spec.needs_cover) {
        let covered = valid.iter().any(|other| {
            other.scope_key() == tag.scope_key()
                && other.spec.is_cover()
                && other.spec.family() == tag.spec.family()
        });
        if !covered {
            out.push(Violation::new(
                Rule::MissingCoverCompanion,
                &tag.row.file,
                tag.row.line,
                format!(
                    "{} in {}:{} needs a cover.{}.* companion in the same scope",
                    tag.spec.id,
                    tag.kind,
                    tag.target,
                    tag.spec.family()
                ),
            ));
        }
    }

    valid
}

/// Rule pass for every verification rule.
pub fn evaluate(tables: &Tables, ctx: &RuleContext<'_>) -> RawOutput {
    let index = DesignIndex::new(tables);
    let mut out = RawOutput::default();

    let (constructs, ambiguous) = detect_constructs(tables);
    let tags = validate_tags(tables, ctx.registry, &index, &mut out.violations);

    let anchors: HashMap<(&str, String), (&ArchitectureRow, Option<&VerificationBlockRow>)> = {
        let mut anchors = HashMap::new();
        for arch in &tables.architectures {
            let block = tables
                .verification_blocks
                .iter()
                .filter(|b| b.file == arch.file && b.arch.eq_ignore_ascii_case(&arch.name))
                .min_by_key(|b| b.line);
            anchors
                .entry((arch.file.as_str(), arch.name.to_ascii_lowercase()))
                .or_insert((arch, block));
        }
        anchors
    };

    let mut reported: BTreeSet<(String, String, String, String)> = BTreeSet::new();
    let mut blockless: BTreeMap<(String, String), (usize, usize)> = BTreeMap::new();

    for construct in &constructs {
        let applicable: Vec<&ValidTag<'_>> = tags
            .iter()
            .filter(|t| t.applies_to(&construct.file, &construct.arch, &index))
            .collect();

        let mut missing_ids = Vec::new();
        let mut notes = Vec::new();
        for &id in construct.kind.required_checks() {
            let Some(spec) = ctx.registry.get(id) else {
                continue;
            };
            if applicable.iter().any(|t| t.satisfies(id, construct)) {
                continue;
            }
            missing_ids.push(id.to_string());
            if spec.needs_cover {
                notes.push(format!("{} needs a cover.{}.* companion", id, spec.family()));
            }
            if spec.requires_bound {
                notes.push(format!("{} requires bound=<cycles>", id));
            }

            let role_bindings: BTreeMap<&String, &String> = construct
                .bindings
                .iter()
                .filter(|(role, _)| spec.required_bindings.contains(role))
                .collect();
            let dedup = (
                construct.file.clone(),
                construct.arch_scope().to_ascii_lowercase(),
                id.to_string(),
                format!("{:?}", role_bindings).to_ascii_lowercase(),
            );
            if reported.insert(dedup) {
                let detail = if role_bindings.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", format_bindings(&construct.bindings))
                };
                out.violations.push(
                    Violation::new(
                        Rule::MissingVerificationCheck,
                        &construct.file,
                        construct.line,
                        format!(
                            "{} is missing {} for {}{}",
                            construct.arch_scope(),
                            id,
                            construct.kind.as_str(),
                            detail
                        ),
                    )
                    .with_severity(spec.severity),
                );
            }
        }
        if missing_ids.is_empty() {
            continue;
        }

        if scope::is_within(&construct.scope, &construct.arch)
            && !construct.scope.eq_ignore_ascii_case(&construct.arch)
        {
            notes.push(format!("construct lives in generate scope {}", construct.scope));
        }

        let Some((arch, block)) = anchors.get(&(construct.file.as_str(), construct.arch.to_ascii_lowercase())) else {
            continue;
        };
        let anchor = match block {
            Some(block) => VerificationAnchor {
                label: block.label.clone(),
                line_start: block.line,
                line_end: block.line_end.max(block.line),
                exists: true,
            },
            None => {
                let entry = blockless
                    .entry((arch.file.clone(), arch.name.clone()))
                    .or_insert((arch.line, 0));
                entry.1 += 1;
                VerificationAnchor {
                    label: arch.name.clone(),
                    line_start: arch.line,
                    line_end: arch.line,
                    exists: false,
                }
            }
        };

        out.missing_checks.push(MissingCheckTask {
            file: construct.file.clone(),
            scope: construct.arch_scope(),
            anchor,
            missing_ids,
            bindings: construct.bindings.clone(),
            notes,
        });
    }

    for ((file, arch), (line, count)) in blockless {
        out.violations.push(Violation::new(
            Rule::MissingVerificationBlock,
            &file,
            line,
            format!(
                "architecture '{}' has {} construct(s) needing checks but no verification block",
                arch, count
            ),
        ));
    }

    for construct in &ambiguous {
        let signals: BTreeSet<&String> = construct.candidates.values().flatten().collect();
        out.violations.push(Violation::new(
            Rule::AmbiguousConstruct,
            &construct.file,
            construct.line,
            format!(
                "{} in {}: roles {} cannot be told apart among {}",
                construct.kind,
                construct.scope,
                construct.candidates.keys().cloned().collect::<Vec<_>>().join("/"),
                signals.into_iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        ));
    }
    out.ambiguous_constructs = ambiguous;

    out
}
