//! Stateful evaluation across init/delta/snapshot calls.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::facts::{Delta, DeltaError, TableKind, Tables};
use crate::policy::{finalize, Engine, EvalResult, RawOutput, RuleConfig};
use crate::schema::{self, SchemaError, Side};

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("no snapshot yet: send an init request first")]
    NotInitialized,
    #[error("delta does not apply to the current snapshot: {0}")]
    Delta(#[from] DeltaError),
    #[error("delta leaves rows without a file: {0}")]
    Orphaned(#[from] SchemaError),
}

#[derive(Debug)]
struct State {
    tables: Tables,
    outputs: Vec<RawOutput>,
    result: EvalResult,
}

/// Holds the last snapshot and the per-pass outputs it produced, so a delta
/// only reruns the passes whose inputs changed.
#[derive(Debug)]
pub struct Evaluator {
    engine: Engine,
    config: RuleConfig,
    state: Option<State>,
}

impl Evaluator {
    pub fn new(engine: Engine, config: RuleConfig) -> Self {
        Self {
            engine,
            config,
            state: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Current snapshot, if initialized.
    pub fn tables(&self) -> Option<&Tables> {
        self.state.as_ref().map(|s| &s.tables)
    }

    /// Replace all state with a full evaluation of `tables`.
    pub fn init(&mut self, mut tables: Tables) -> EvalResult {
        tables.normalize();
        let outputs = self.engine.run_passes(&tables);
        let result = finalize(&outputs, &tables, &self.config);
        tracing::info!(rows = tables.row_count(), violations = result.summary.total, "initialized");
        self.state = Some(State {
            tables,
            outputs,
            result: result.clone(),
        });
        result
    }

    /// Apply `delta` and re-evaluate. The new snapshot must hold up as an
    /// init on its own; on error the previous state is kept.
    pub fn delta(&mut self, delta: &Delta) -> Result<EvalResult, EvaluatorError> {
        let state = self.state.as_ref().ok_or(EvaluatorError::NotInitialized)?;
        let tables = delta.apply(&state.tables)?;
        schema::validate_references(&tables, Side::Tables)?;

        let mut touched: BTreeSet<TableKind> = delta.added.kinds_touched();
        touched.extend(delta.removed.kinds_touched());
        let outputs = if touched.is_empty() {
            state.outputs.clone()
        } else {
            self.engine.rerun_passes(&tables, &state.outputs, &touched)
        };
        let result = finalize(&outputs, &tables, &self.config);
        tracing::info!(
            touched = ?touched.iter().map(TableKind::as_str).collect::<Vec<_>>(),
            violations = result.summary.total,
            "delta applied"
        );

        self.state = Some(State {
            tables,
            outputs,
            result: result.clone(),
        });
        Ok(result)
    }

    pub fn snapshot(&self) -> Result<&EvalResult, EvaluatorError> {
        self.state
            .as_ref()
            .map(|s| &s.result)
            .ok_or(EvaluatorError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FileRow, ProcessRow, SignalRow};
    use crate::policy::{CheckRegistry, Rule};

    fn evaluator() -> Evaluator {
        Evaluator::new(
            Engine::new(CheckRegistry::builtin().unwrap()),
            RuleConfig::default(),
        )
    }

    fn base() -> Tables {
        Tables {
            files: vec![FileRow {
                path: "m.vhd".into(),
                library: "lib".into(),
                is_third_party: false,
            }],
            processes: vec![ProcessRow {
                label: "p".into(),
                arch: "rtl".into(),
                scope: "rtl".into(),
                sensitivity_list: vec![],
                is_sequential: false,
                is_combinational: true,
                clock_signal: String::new(),
                reset_signal: String::new(),
                has_reset: false,
                read_signals: vec!["s".into()],
                assigned_signals: vec!["y".into()],
                file: "m.vhd".into(),
                line: 9,
            }],
            ..Default::default()
        }
    }

    fn signal(name: &str, line: usize) -> SignalRow {
        SignalRow {
            name: name.into(),
            ty: "std_logic".into(),
            arch: "rtl".into(),
            scope: "rtl".into(),
            file: "m.vhd".into(),
            line,
        }
    }

    #[test]
    fn test_snapshot_before_init_fails() {
        let ev = evaluator();
        assert!(matches!(ev.snapshot(), Err(EvaluatorError::NotInitialized)));
        let mut ev = evaluator();
        assert!(matches!(ev.delta(&Delta::default()), Err(EvaluatorError::NotInitialized)));
    }

    #[test]
    fn test_delta_matches_fresh_init() {
        let mut ev = evaluator();
        ev.init(base());

        // New signal `s` is read by nobody once `p` is removed.
        let delta = Delta {
            added: Tables {
                signals: vec![signal("s", 4)],
                ..Default::default()
            },
            removed: Tables {
                processes: base().processes,
                ..Default::default()
            },
        };
        let incremental = ev.delta(&delta).unwrap();

        let mut expected = base();
        expected.processes.clear();
        expected.signals.push(signal("s", 4));
        let fresh = evaluator().init(expected.clone());

        assert_eq!(incremental, fresh);
        expected.normalize();
        assert_eq!(ev.tables(), Some(&expected));
        assert_eq!(ev.snapshot().unwrap(), &fresh);
    }

    #[test]
    fn test_delta_reports_new_findings() {
        let mut ev = evaluator();
        ev.init(base());
        let delta = Delta {
            added: Tables {
                signals: vec![signal("s", 4)],
                ..Default::default()
            },
            removed: Tables::default(),
        };
        let result = ev.delta(&delta).unwrap();
        let rules: Vec<Rule> = result.violations.iter().map(|v| v.rule).collect();
        assert_eq!(rules, vec![Rule::UndrivenSignal]);
    }

    #[test]
    fn test_delta_rows_need_a_files_row() {
        let mut ev = evaluator();
        let before = ev.init(base());
        let stray = SignalRow {
            file: "other.vhd".into(),
            ..signal("s", 4)
        };
        let delta = Delta {
            added: Tables {
                signals: vec![stray],
                ..Default::default()
            },
            removed: Tables::default(),
        };
        let err = ev.delta(&delta).unwrap_err();
        assert!(matches!(err, EvaluatorError::Orphaned(_)));
        assert!(err.to_string().contains("other.vhd"));
        assert_eq!(ev.snapshot().unwrap(), &before);

        // Dropping the files row alone orphans the rows left behind.
        let delta = Delta {
            added: Tables::default(),
            removed: Tables {
                files: base().files,
                ..Default::default()
            },
        };
        assert!(matches!(ev.delta(&delta), Err(EvaluatorError::Orphaned(_))));
        assert_eq!(ev.snapshot().unwrap(), &before);
    }

    #[test]
    fn test_failed_delta_keeps_state() {
        let mut ev = evaluator();
        let before = ev.init(base());
        let bad = Delta {
            added: Tables::default(),
            removed: Tables {
                signals: vec![signal("ghost", 7)],
                ..Default::default()
            },
        };
        assert!(matches!(ev.delta(&bad), Err(EvaluatorError::Delta(_))));
        assert_eq!(ev.snapshot().unwrap(), &before);
        let mut expected = base();
        expected.normalize();
        assert_eq!(ev.tables(), Some(&expected));
    }
}
