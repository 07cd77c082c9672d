//! Policy evaluation: run every rule pass, then filter, override and sort.

use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::cache::{CacheKey, EvalCache};
use super::registry::CheckRegistry;
use super::rules::{passes, RawOutput, RuleContext};
use super::types::{EvalResult, Rule, RuleConfig, Summary, Violation};
use crate::facts::{TableKind, Tables};

/// Evaluates tables against the rule set.
#[derive(Debug)]
pub struct Engine {
    registry: CheckRegistry,
    cache: Option<EvalCache>,
    evaluations: AtomicUsize,
}

impl Engine {
    pub fn new(registry: CheckRegistry) -> Self {
        Self {
            registry,
            cache: None,
            evaluations: AtomicUsize::new(0),
        }
    }

    pub fn with_cache(mut self, cache: EvalCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Number of times rule predicates actually ran. Cache hits leave it
    /// unchanged.
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Evaluate `tables`, consulting the cache first when one is attached.
    pub fn evaluate(&self, tables: &Tables, config: &RuleConfig) -> EvalResult {
        let key = match &self.cache {
            Some(_) => match CacheKey::compute(tables, config, &self.registry) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "cannot fingerprint tables, evaluating uncached");
                    None
                }
            },
            None => None,
        };

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(result) = cache.get(key) {
                tracing::debug!(fingerprint = %key.fingerprint, "evaluation cache hit");
                return result;
            }
        }

        let outputs = self.run_passes(tables);
        let result = finalize(&outputs, tables, config);

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            if let Err(e) = cache.put(key, &result) {
                tracing::warn!(error = %e, "failed to store evaluation result");
            }
        }
        result
    }

    /// Run every pass. The output is indexed like [`passes`].
    pub fn run_passes(&self, tables: &Tables) -> Vec<RawOutput> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let ctx = RuleContext {
            registry: &self.registry,
        };
        let outputs: Vec<RawOutput> = passes().par_iter().map(|pass| (pass.run)(tables, &ctx)).collect();
        tracing::info!(
            passes = outputs.len(),
            violations = outputs.iter().map(|o| o.violations.len()).sum::<usize>(),
            "rule passes finished"
        );
        outputs
    }

    /// Rerun only the passes that read one of `touched`, reusing `previous`
    /// for the rest.
    pub fn rerun_passes(
        &self,
        tables: &Tables,
        previous: &[RawOutput],
        touched: &BTreeSet<TableKind>,
    ) -> Vec<RawOutput> {
        if previous.len() != passes().len() {
            return self.run_passes(tables);
        }
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let ctx = RuleContext {
            registry: &self.registry,
        };
        passes()
            .par_iter()
            .zip(previous.par_iter())
            .map(|(pass, old)| {
                if pass.is_affected_by(touched) {
                    tracing::debug!(pass = pass.name, "rerunning pass");
                    (pass.run)(tables, &ctx)
                } else {
                    old.clone()
                }
            })
            .collect()
    }
}

/// Turn raw pass outputs into the reported result.
///
/// Disabled rules and third-party files are dropped here and nowhere else:
/// third-party rows still take part in resolution and detection.
pub fn finalize(outputs: &[RawOutput], tables: &Tables, config: &RuleConfig) -> EvalResult {
    let flagged: HashSet<&str> = tables
        .files
        .iter()
        .filter(|f| f.is_third_party)
        .map(|f| f.path.as_str())
        .collect();
    let is_third_party = |file: &str| flagged.contains(file) || config.is_third_party_path(file);

    let mut merged = RawOutput::default();
    for output in outputs {
        merged.merge(output);
    }

    let mut violations: Vec<_> = merged
        .violations
        .into_iter()
        .filter(|v| !config.is_disabled(v.rule) && !is_third_party(&v.file))
        .map(|v| match config.severity_override(v.rule) {
            Some(severity) => v.with_severity(severity),
            None => v,
        })
        .collect();
    violations.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    violations.dedup();

    let missing_checks = if config.is_disabled(Rule::MissingVerificationCheck) {
        Vec::new()
    } else {
        merged
            .missing_checks
            .into_iter()
            .filter(|t| !is_third_party(&t.file))
            .collect()
    };
    let ambiguous_constructs = if config.is_disabled(Rule::AmbiguousConstruct) {
        Vec::new()
    } else {
        merged
            .ambiguous_constructs
            .into_iter()
            .filter(|c| !is_third_party(&c.file))
            .collect()
    };

    EvalResult {
        summary: Summary::from_violations(&violations),
        violations,
        missing_checks,
        ambiguous_constructs,
    }
}

fn sort_key(v: &Violation) -> (&str, usize, &str, &str) {
    (&v.file, v.line, v.rule.as_str(), &v.message)
}

/// True when `violations` are in reporting order: file, line, rule name,
/// message.
pub fn is_sorted(violations: &[Violation]) -> bool {
    violations.windows(2).all(|w| sort_key(&w[0]) <= sort_key(&w[1]))
}
