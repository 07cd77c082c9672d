//! Policy evaluation over design tables.
//!
//! Rules are pure functions of [`Tables`](crate::facts::Tables). The
//! [`Engine`] runs them, applies the [`RuleConfig`] and caches results.

pub mod cache;
pub mod engine;
pub mod registry;
pub mod rules;
pub mod types;
pub mod verification;

pub use cache::{CacheError, CacheKey, EvalCache, POLICY_VERSION};
pub use engine::{finalize, is_sorted, Engine};
pub use registry::{CheckRegistry, CheckSpec, RegistryError, ScopeType, REGISTRY_ENV};
pub use rules::{passes, RawOutput, RuleContext, RulePass};
pub use types::{
    AmbiguousConstruct, EvalResult, MissingCheckTask, Rule, RuleConfig, RuleSetting, Severity,
    Summary, VerificationAnchor, Violation,
};
pub use verification::{detect_constructs, Construct, ConstructKind};
