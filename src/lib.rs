//! hdlcheck - incremental design model and policy engine for VHDL projects.
//!
//! hdlcheck consumes per-file facts from a VHDL extractor and turns them
//! into a project-wide relational model: which library every design unit
//! lives in, what each `use` clause and instance resolves to, and how the
//! design nests into scopes. Policy rules run over that model, and a daemon
//! keeps it current as files change.
//!
//! # Architecture
//!
//! - `facts`: extractor input, the unified tables and row-level deltas
//! - `resolve`: library assignment, symbol registration and dependency
//!   resolution, in two passes with a barrier between them
//! - `scope`: hierarchical scope paths and static generate elaboration
//! - `policy`: rules, the check registry, construct detection and the
//!   evaluation cache
//! - `schema`: validation of every payload crossing the daemon boundary
//! - `daemon`: the stateful evaluator, NDJSON serve loop and client
//! - `config`: `hdlcheck.yaml` parsing and validation
//! - `report`: output formatting (pretty, JSON, SARIF)

pub mod cli;
pub mod config;
pub mod daemon;
pub mod facts;
pub mod policy;
pub mod report;
pub mod resolve;
pub mod schema;
pub mod scope;

pub use config::Config;
pub use daemon::{DaemonClient, DaemonError, Evaluator, Request, Response};
pub use facts::{Delta, FileFacts, TableKind, Tables};
pub use policy::{CheckRegistry, Engine, EvalResult, Rule, RuleConfig, Severity, Violation};
pub use resolve::{resolve, DependentsGraph, Indexer, LibraryMap};
pub use schema::SchemaError;
