//! Rules over design-unit structure.

use std::collections::HashSet;

use super::RuleContext;
use crate::facts::Tables;
use crate::policy::types::{Rule, Violation};

pub fn architecture_has_entity(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    let entities: HashSet<String> = tables
        .entities
        .iter()
        .map(|e| e.name.to_ascii_lowercase())
        .collect();
    tables
        .architectures
        .iter()
        .filter(|a| !entities.contains(&a.entity.to_ascii_lowercase()))
        .map(|a| {
            Violation::new(
                Rule::ArchitectureHasEntity,
                &a.file,
                a.line,
                format!("architecture '{}' implements undeclared entity '{}'", a.name, a.entity),
            )
        })
        .collect()
}

pub fn entity_without_arch(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    let implemented: HashSet<String> = tables
        .architectures
        .iter()
        .map(|a| a.entity.to_ascii_lowercase())
        .collect();
    tables
        .entities
        .iter()
        .filter(|e| !implemented.contains(&e.name.to_ascii_lowercase()))
        .map(|e| {
            Violation::new(
                Rule::EntityWithoutArch,
                &e.file,
                e.line,
                format!("entity '{}' has no architecture", e.name),
            )
        })
        .collect()
}

pub fn entity_has_ports(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    let with_ports: HashSet<(&str, String)> = tables
        .ports
        .iter()
        .map(|p| (p.file.as_str(), p.entity.to_ascii_lowercase()))
        .collect();
    tables
        .entities
        .iter()
        .filter(|e| !with_ports.contains(&(e.file.as_str(), e.name.to_ascii_lowercase())))
        .map(|e| {
            Violation::new(
                Rule::EntityHasPorts,
                &e.file,
                e.line,
                format!("entity '{}' declares no ports", e.name),
            )
        })
        .collect()
}

pub fn generate_not_elaborated(tables: &Tables, _ctx: &RuleContext<'_>) -> Vec<Violation> {
    tables
        .generates
        .iter()
        .filter(|g| g.kind == "for" && !g.can_elaborate)
        .map(|g| {
            Violation::new(
                Rule::GenerateNotElaborated,
                &g.file,
                g.line,
                format!(
                    "for-generate '{}' range {} {} {} is not static",
                    g.scope, g.range_low, g.range_dir, g.range_high
                ),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{ArchitectureRow, EntityRow, GenerateRow, PortRow};
    use crate::policy::registry::CheckRegistry;

    fn tables() -> Tables {
        Tables {
            entities: vec![
                EntityRow {
                    name: "Cpu".into(),
                    library: "lib".into(),
                    file: "cpu.vhd".into(),
                    line: 1,
                },
                EntityRow {
                    name: "tb".into(),
                    library: "lib".into(),
                    file: "tb.vhd".into(),
                    line: 1,
                },
            ],
            architectures: vec![
                ArchitectureRow {
                    name: "rtl".into(),
                    entity: "cpu".into(),
                    file: "cpu.vhd".into(),
                    line: 9,
                },
                ArchitectureRow {
                    name: "rtl".into(),
                    entity: "ghost".into(),
                    file: "ghost.vhd".into(),
                    line: 4,
                },
            ],
            ports: vec![PortRow {
                entity: "cpu".into(),
                name: "clk".into(),
                direction: "in".into(),
                ty: "std_logic".into(),
                file: "cpu.vhd".into(),
                line: 2,
            }],
            ..Default::default()
        }
    }

    fn ctx_run(f: fn(&Tables, &RuleContext<'_>) -> Vec<Violation>, tables: &Tables) -> Vec<Violation> {
        let registry = CheckRegistry::builtin().unwrap();
        f(tables, &RuleContext { registry: &registry })
    }

    #[test]
    fn test_architecture_has_entity() {
        let violations = ctx_run(architecture_has_entity, &tables());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].file, "ghost.vhd");
    }

    #[test]
    fn test_entity_rules() {
        let without_arch = ctx_run(entity_without_arch, &tables());
        assert_eq!(without_arch.len(), 1);
        assert!(without_arch[0].message.contains("'tb'"));

        let no_ports = ctx_run(entity_has_ports, &tables());
        assert_eq!(no_ports.len(), 1);
        assert_eq!(no_ports[0].file, "tb.vhd");
    }

    #[test]
    fn test_generate_not_elaborated_only_for_loops() {
        let generate = |kind: &str, can: bool| GenerateRow {
            label: "g".into(),
            kind: kind.into(),
            arch: "rtl".into(),
            scope: "rtl.g".into(),
            loop_var: "i".into(),
            range_low: "0".into(),
            range_high: "N-1".into(),
            range_dir: "to".into(),
            condition: String::new(),
            can_elaborate: can,
            iteration_count: if can { 4 } else { -1 },
            file: "g.vhd".into(),
            line: 7,
        };
        let tables = Tables {
            generates: vec![generate("for", false), generate("for", true), generate("if", false)],
            ..Default::default()
        };
        let violations = ctx_run(generate_not_elaborated, &tables);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("rtl.g"));
    }
}
