//! Flattens per-file facts into unified tables.

use std::collections::HashMap;

use super::input::FileFacts;
use super::tables::*;
use crate::scope::{self, ConstantEnv, FileScopes};

/// Accumulates files, then produces normalized [`Tables`].
///
/// Symbols and dependencies are not produced here; they need every file of
/// the batch and are filled in by the resolver afterwards.
#[derive(Debug, Default)]
pub struct TableBuilder {
    tables: Tables,
    package_constants: ConstantEnv,
    file_constants: HashMap<String, ConstantEnv>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, facts: &FileFacts, library: &str, is_third_party: bool) {
        let file = facts.path.clone();
        let scopes = FileScopes::build(facts);
        let t = &mut self.tables;

        t.files.push(FileRow {
            path: file.clone(),
            library: library.to_string(),
            is_third_party,
        });

        for entity in &facts.entities {
            t.entities.push(EntityRow {
                name: entity.name.clone(),
                library: library.to_string(),
                file: file.clone(),
                line: entity.line,
            });
            for port in &entity.ports {
                t.ports.push(PortRow {
                    entity: entity.name.clone(),
                    name: port.name.clone(),
                    direction: port.direction.to_ascii_lowercase(),
                    ty: port.ty.clone(),
                    file: file.clone(),
                    line: port.line,
                });
            }
        }

        for arch in &facts.architectures {
            t.architectures.push(ArchitectureRow {
                name: arch.name.clone(),
                entity: arch.entity.clone(),
                file: file.clone(),
                line: arch.line,
            });
        }

        for package in &facts.packages {
            t.packages.push(PackageRow {
                name: package.name.clone(),
                library: library.to_string(),
                file: file.clone(),
                line: package.line,
            });
        }

        for config in &facts.configurations {
            t.configurations.push(ConfigurationRow {
                name: config.name.clone(),
                entity: config.entity.clone(),
                file: file.clone(),
                line: config.line,
            });
        }

        for signal in &facts.signals {
            if signal.ty.trim().is_empty() {
                continue;
            }
            t.signals.push(SignalRow {
                name: signal.name.clone(),
                ty: signal.ty.clone(),
                arch: signal.arch.clone(),
                scope: scopes.path_for(&signal.arch, signal.generate.as_deref()),
                file: file.clone(),
                line: signal.line,
            });
        }

        for process in &facts.processes {
            t.processes.push(ProcessRow {
                label: process.label.clone(),
                arch: process.arch.clone(),
                scope: scopes.path_for(&process.arch, process.generate.as_deref()),
                sensitivity_list: process.sensitivity_list.clone(),
                is_sequential: process.is_sequential,
                is_combinational: process.is_combinational,
                clock_signal: process.clock_signal.clone(),
                reset_signal: process.reset_signal.clone(),
                has_reset: process.has_reset,
                read_signals: process.read_signals.clone(),
                assigned_signals: process.assigned_signals.clone(),
                file: file.clone(),
                line: process.line,
            });
        }

        for assignment in &facts.concurrent_assignments {
            if assignment.target.trim().is_empty() {
                continue;
            }
            t.assignments.push(AssignmentRow {
                target: assignment.target.clone(),
                read_signals: assignment.read_signals.clone(),
                arch: assignment.arch.clone(),
                scope: scopes.path_for(&assignment.arch, assignment.generate.as_deref()),
                file: file.clone(),
                line: assignment.line,
            });
        }

        for instance in &facts.instances {
            t.instances.push(InstanceRow {
                name: instance.name.clone(),
                target: instance.target.clone(),
                arch: instance.arch.clone(),
                scope: scopes.path_for(&instance.arch, instance.generate.as_deref()),
                port_map: instance.port_map.clone(),
                generic_map: instance.generic_map.clone(),
                file: file.clone(),
                line: instance.line,
            });
        }

        for generate in &facts.generates {
            t.generates.push(GenerateRow {
                label: generate.label.clone(),
                kind: generate.kind.to_ascii_lowercase(),
                arch: generate.arch.clone(),
                scope: scopes.path_for(&generate.arch, Some(&generate.label)),
                loop_var: generate.loop_var.clone(),
                range_low: generate.range_low.clone(),
                range_high: generate.range_high.clone(),
                range_dir: generate.range_dir.to_ascii_lowercase(),
                condition: generate.condition.clone(),
                // Filled in by `finish` once every file's constants are known.
                can_elaborate: false,
                iteration_count: -1,
                file: file.clone(),
                line: generate.line,
            });
        }

        for case in &facts.case_statements {
            t.case_statements.push(CaseRow {
                expression: case.expression.clone(),
                choices: case.choices.clone(),
                has_others: case.has_others,
                arch: case.arch.clone(),
                process: case.process.clone(),
                file: file.clone(),
                line: case.line,
            });
        }

        for ty in &facts.types {
            t.types.push(TypeRow {
                name: ty.name.clone(),
                kind: ty.kind.to_ascii_lowercase(),
                base_type: ty.base_type.clone(),
                enum_literals: ty.enum_literals.clone(),
                package: ty.package.clone().unwrap_or_default(),
                arch: ty.arch.clone().unwrap_or_default(),
                file: file.clone(),
                line: ty.line,
            });
        }

        let local = self.file_constants.entry(file.clone()).or_default();
        for constant in &facts.constants {
            if constant.package.is_some() {
                self.package_constants.insert(&constant.name, &constant.value);
            } else {
                local.insert(&constant.name, &constant.value);
            }
            t.constants.push(ConstantRow {
                name: constant.name.clone(),
                ty: constant.ty.clone(),
                value: constant.value.clone(),
                package: constant.package.clone().unwrap_or_default(),
                arch: constant.arch.clone().unwrap_or_default(),
                file: file.clone(),
                line: constant.line,
            });
        }

        for sub in &facts.subprograms {
            t.subprograms.push(SubprogramRow {
                name: sub.name.clone(),
                kind: sub.kind.to_ascii_lowercase(),
                package: sub.package.clone().unwrap_or_default(),
                file: file.clone(),
                line: sub.line,
            });
        }

        for clause in &facts.use_clauses {
            for item in &clause.items {
                t.use_clauses.push(UseClauseRow {
                    item: item.clone(),
                    file: file.clone(),
                    line: clause.line,
                });
            }
        }

        for clause in &facts.library_clauses {
            for library in &clause.libraries {
                t.library_clauses.push(LibraryClauseRow {
                    library: library.clone(),
                    file: file.clone(),
                    line: clause.line,
                });
            }
        }

        for clause in &facts.context_clauses {
            t.context_clauses.push(ContextClauseRow {
                name: clause.name.clone(),
                file: file.clone(),
                line: clause.line,
            });
        }

        for block in &facts.verification_blocks {
            t.verification_blocks.push(VerificationBlockRow {
                label: block.label.clone(),
                arch: block.arch.clone(),
                line_end: block.line_end,
                file: file.clone(),
                line: block.line_start,
            });
        }

        for tag in &facts.verification_tags {
            t.verification_tags.push(VerificationTagRow {
                id: tag.id.clone(),
                scope: tag.scope.clone(),
                bindings: tag.bindings.clone(),
                arch: tag.arch.clone(),
                raw: tag.raw.clone(),
                file: file.clone(),
                line: tag.line,
            });
        }

        for err in &facts.verification_tag_errors {
            t.tag_errors.push(TagErrorRow {
                message: err.message.clone(),
                raw: err.raw.clone(),
                arch: err.arch.clone(),
                file: file.clone(),
                line: err.line,
            });
        }

        t.scopes.extend(scopes.into_rows());
    }

    /// Elaborate generate ranges against the batch's constants and return
    /// normalized tables.
    pub fn finish(mut self) -> Tables {
        let empty = ConstantEnv::new();
        for generate in &mut self.tables.generates {
            let local = self.file_constants.get(&generate.file).unwrap_or(&empty);
            let env = self.package_constants.overlay(local);
            let result = scope::elaborate(
                &generate.kind,
                &generate.range_low,
                &generate.range_high,
                &generate.range_dir,
                &env,
            );
            generate.can_elaborate = result.can_elaborate;
            generate.iteration_count = result.iteration_count;
        }
        self.tables.normalize();
        self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(json: &str) -> FileFacts {
        FileFacts::from_json(json).unwrap()
    }

    #[test]
    fn test_build_populates_core_relations() {
        let mut builder = TableBuilder::new();
        builder.add_file(
            &facts(
                r#"{
                    "path": "test/a.vhd",
                    "entities": [{"name": "e", "line": 1, "ports": [{"name": "clk", "direction": "IN", "type": "std_logic", "line": 2}]}],
                    "use_clauses": [{"items": ["ieee.std_logic_1164.all", "ieee.numeric_std.all"], "line": 2}],
                    "signals": [{"name": "s", "type": "std_logic", "arch": "rtl", "line": 5}, {"name": "t", "type": "", "line": 6}],
                    "concurrent_assignments": [{"target": "", "line": 7}, {"target": "s", "read_signals": ["clk"], "arch": "rtl", "line": 8}]
                }"#,
            ),
            "mylib",
            false,
        );
        let tables = builder.finish();

        assert_eq!(tables.files.len(), 1);
        assert_eq!(tables.files[0].library, "mylib");
        assert_eq!(tables.entities.len(), 1);
        assert_eq!(tables.ports[0].direction, "in");
        assert_eq!(tables.use_clauses.len(), 2);
        assert_eq!(tables.signals.len(), 1);
        assert_eq!(tables.assignments.len(), 1);
        assert!(tables.symbols.is_empty());
    }

    #[test]
    fn test_generates_use_constants_from_packages() {
        let mut builder = TableBuilder::new();
        builder.add_file(
            &facts(
                r#"{
                    "path": "pkg.vhd",
                    "packages": [{"name": "cfg_pkg", "line": 1}],
                    "constants": [{"name": "LANES", "type": "integer", "value": "4", "package": "cfg_pkg", "line": 2}]
                }"#,
            ),
            "lib",
            false,
        );
        builder.add_file(
            &facts(
                r#"{
                    "path": "top.vhd",
                    "architectures": [{"name": "rtl", "entity": "top", "line": 3}],
                    "constants": [{"name": "DEPTH", "type": "integer", "value": "LANES * 2", "arch": "rtl", "line": 4}],
                    "generates": [
                        {"label": "lanes", "kind": "for", "arch": "rtl", "range_low": "0", "range_high": "DEPTH - 1", "range_dir": "to", "line": 6},
                        {"label": "dyn", "kind": "for", "arch": "rtl", "range_low": "0", "range_high": "data'length - 1", "range_dir": "to", "line": 9},
                        {"label": "opt", "kind": "if", "arch": "rtl", "condition": "USE_FIFO", "line": 12}
                    ],
                    "signals": [{"name": "lane_data", "type": "std_logic", "arch": "rtl", "generate": "lanes", "line": 7}]
                }"#,
            ),
            "lib",
            false,
        );
        let tables = builder.finish();

        let by_label = |label: &str| tables.generates.iter().find(|g| g.label == label).unwrap();
        assert!(by_label("lanes").can_elaborate);
        assert_eq!(by_label("lanes").iteration_count, 8);
        assert!(!by_label("dyn").can_elaborate);
        assert_eq!(by_label("dyn").iteration_count, -1);
        assert_eq!(by_label("opt").iteration_count, -1);
        assert_eq!(tables.signals[0].scope, "rtl.lanes");
        assert_eq!(tables.scopes.len(), 4);
    }
}
