//! Payload contract for every daemon boundary.
//!
//! Nothing reaches the evaluator without passing through here. A payload is
//! accepted only when it parses strictly (no unknown fields, required fields
//! present) and every row passes the semantic checks below. The two sides of
//! a delta are validated independently and errors name the offending side.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::daemon::protocol::{Request, Response};
use crate::facts::{FactRow, TableKind, Tables};
use crate::policy::{is_sorted, Summary};

/// Which part of a payload an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Request,
    Tables,
    Added,
    Removed,
    Response,
}

impl Side {
    fn field(&self) -> &'static str {
        match self {
            Side::Request => "request",
            Side::Tables => "tables",
            Side::Added => "added",
            Side::Removed => "removed",
            Side::Response => "response",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{side}: invalid JSON: {source}")]
    Json {
        side: Side,
        #[source]
        source: serde_json::Error,
    },
    #[error("{side}: expected a JSON object")]
    NotAnObject { side: Side },
    #[error("request has no string field `kind`")]
    MissingKind,
    #[error("unknown request kind {0:?}, expected init, delta or snapshot")]
    UnknownKind(String),
    #[error("{kind} request is missing required field `{field}`")]
    MissingField { kind: String, field: &'static str },
    #[error("{kind} request has unexpected field `{field}`")]
    UnexpectedField { kind: String, field: String },
    #[error("{side}: {source}")]
    Shape {
        side: Side,
        #[source]
        source: serde_json::Error,
    },
    #[error("{side}: {row}: {message}")]
    Row {
        side: Side,
        row: String,
        message: String,
    },
    #[error("{side}: {row} belongs to file {file:?}, which has no files row")]
    UnknownFile { side: Side, row: String, file: String },
    #[error("response: {0}")]
    Response(String),
}

impl SchemaError {
    /// The payload side this error refers to.
    pub fn side(&self) -> Side {
        match self {
            SchemaError::Json { side, .. }
            | SchemaError::NotAnObject { side }
            | SchemaError::Shape { side, .. }
            | SchemaError::Row { side, .. }
            | SchemaError::UnknownFile { side, .. } => *side,
            SchemaError::Response(_) => Side::Response,
            _ => Side::Request,
        }
    }
}

/// Relations whose rows must carry a non-empty name.
const NAMED: &[TableKind] = &[
    TableKind::Files,
    TableKind::Entities,
    TableKind::Architectures,
    TableKind::Packages,
    TableKind::Configurations,
    TableKind::Ports,
    TableKind::Signals,
    TableKind::Instances,
    TableKind::Generates,
    TableKind::Types,
    TableKind::Constants,
    TableKind::Subprograms,
    TableKind::VerificationTags,
    TableKind::Symbols,
    TableKind::Scopes,
    TableKind::Dependencies,
];

/// Parse and validate one request line.
pub fn parse_request(line: &str) -> Result<Request, SchemaError> {
    let value: Value = serde_json::from_str(line).map_err(|source| SchemaError::Json {
        side: Side::Request,
        source,
    })?;
    let Value::Object(mut object) = value else {
        return Err(SchemaError::NotAnObject { side: Side::Request });
    };
    let kind = match object.remove("kind") {
        Some(Value::String(kind)) => kind,
        _ => return Err(SchemaError::MissingKind),
    };

    let allowed: &[&'static str] = match kind.as_str() {
        "init" => &["tables"],
        "delta" => &["added", "removed"],
        "snapshot" => &[],
        _ => return Err(SchemaError::UnknownKind(kind.clone())),
    };
    if let Some(field) = object.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(SchemaError::UnexpectedField {
            kind: kind.clone(),
            field: field.clone(),
        });
    }

    match kind.as_str() {
        "init" => {
            let tables = take_tables(&mut object, &kind, "tables", Side::Tables)?;
            validate_tables(&tables, Side::Tables)?;
            validate_references(&tables, Side::Tables)?;
            Ok(Request::Init { tables })
        }
        "delta" => {
            // Both sides are checked for presence before either is parsed.
            for field in ["added", "removed"] {
                if !object.contains_key(field) {
                    return Err(SchemaError::MissingField {
                        kind: kind.clone(),
                        field,
                    });
                }
            }
            let added = take_tables(&mut object, &kind, "added", Side::Added)?;
            validate_tables(&added, Side::Added)?;
            let removed = take_tables(&mut object, &kind, "removed", Side::Removed)?;
            validate_tables(&removed, Side::Removed)?;
            Ok(Request::Delta { added, removed })
        }
        _ => Ok(Request::Snapshot),
    }
}

fn take_tables(
    object: &mut Map<String, Value>,
    kind: &str,
    field: &'static str,
    side: Side,
) -> Result<Tables, SchemaError> {
    let value = object.remove(field).ok_or_else(|| SchemaError::MissingField {
        kind: kind.to_string(),
        field,
    })?;
    if !value.is_object() {
        return Err(SchemaError::NotAnObject { side });
    }
    serde_json::from_value(value).map_err(|source| SchemaError::Shape { side, source })
}

/// Validate an outgoing request before it is sent.
pub fn validate_request(request: &Request) -> Result<(), SchemaError> {
    match request {
        Request::Init { tables } => {
            validate_tables(tables, Side::Tables)?;
            validate_references(tables, Side::Tables)
        }
        Request::Delta { added, removed } => {
            validate_tables(added, Side::Added)?;
            validate_tables(removed, Side::Removed)
        }
        Request::Snapshot => Ok(()),
    }
}

fn row_error(side: Side, row: impl fmt::Display, message: impl Into<String>) -> SchemaError {
    SchemaError::Row {
        side,
        row: row.to_string(),
        message: message.into(),
    }
}

/// Semantic checks on every row of a full or sparse snapshot.
pub fn validate_tables(tables: &Tables, side: Side) -> Result<(), SchemaError> {
    let mut first = None;
    tables.for_each_key(|key| {
        if first.is_some() {
            return;
        }
        if key.file.trim().is_empty() {
            first = Some(row_error(side, &key, "empty file"));
        } else if NAMED.contains(&key.kind) && key.name.trim().is_empty() {
            first = Some(row_error(side, &key, "empty name"));
        }
    });
    if let Some(error) = first {
        return Err(error);
    }

    for file in &tables.files {
        if file.library.trim().is_empty() || file.library.eq_ignore_ascii_case("work") {
            return Err(row_error(
                side,
                file.key(),
                format!("library {:?} is not a resolved library name", file.library),
            ));
        }
    }

    for generate in &tables.generates {
        let paired = if generate.can_elaborate {
            generate.kind.eq_ignore_ascii_case("for") && generate.iteration_count >= 0
        } else {
            generate.iteration_count == -1
        };
        if !paired {
            return Err(row_error(
                side,
                generate.key(),
                format!(
                    "can_elaborate={} does not match iteration_count={}",
                    generate.can_elaborate, generate.iteration_count
                ),
            ));
        }
    }

    for symbol in &tables.symbols {
        let Some((library, rest)) = symbol.name.split_once('.') else {
            return Err(row_error(side, symbol.key(), "symbol is not library-qualified"));
        };
        if library.is_empty() || rest.is_empty() {
            return Err(row_error(side, symbol.key(), "symbol is not library-qualified"));
        }
        if library.eq_ignore_ascii_case("work") {
            return Err(row_error(side, symbol.key(), "symbols are never qualified with work"));
        }
    }

    for dep in &tables.dependencies {
        if dep.resolved != dep.resolved_to.is_some() {
            return Err(row_error(
                side,
                dep.key(),
                "resolved must be true exactly when resolved_to is set",
            ));
        }
    }

    Ok(())
}

/// Every row of a full snapshot must belong to a file listed in `files`.
pub fn validate_references(tables: &Tables, side: Side) -> Result<(), SchemaError> {
    let known: BTreeSet<&str> = tables.files.iter().map(|f| f.path.as_str()).collect();
    let mut first = None;
    tables.for_each_key(|key| {
        if first.is_none() && key.kind != TableKind::Files && !known.contains(key.file) {
            first = Some(SchemaError::UnknownFile {
                side,
                row: key.to_string(),
                file: key.file.to_string(),
            });
        }
    });
    first.map_or(Ok(()), Err)
}

/// Parse and validate one response line.
pub fn parse_response(line: &str) -> Result<Response, SchemaError> {
    let response: Response = serde_json::from_str(line).map_err(|source| SchemaError::Shape {
        side: Side::Response,
        source,
    })?;
    validate_response(&response)?;
    Ok(response)
}

pub fn validate_response(response: &Response) -> Result<(), SchemaError> {
    let Response::Result(result) = response else {
        return Ok(());
    };
    let expected = Summary::from_violations(&result.violations);
    if result.summary != expected {
        return Err(SchemaError::Response(format!(
            "summary {:?} does not match the {} violation(s) reported",
            result.summary,
            result.violations.len()
        )));
    }
    if !is_sorted(&result.violations) {
        return Err(SchemaError::Response("violations are not sorted".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EvalResult, Rule, Violation};

    const FILES: &str = r#""files": [{"path": "a.vhd", "library": "lib"}]"#;

    fn entity(file: &str, name: &str) -> String {
        format!(r#"{{"name": "{}", "library": "lib", "file": "{}", "line": 1}}"#, name, file)
    }

    #[test]
    fn test_init_accepts_valid_tables() {
        let line = format!(r#"{{"kind": "init", "tables": {{{}, "entities": [{}]}}}}"#, FILES, entity("a.vhd", "top"));
        match parse_request(&line).unwrap() {
            Request::Init { tables } => assert_eq!(tables.entities.len(), 1),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_delta_without_removed_is_rejected() {
        let err = parse_request(r#"{"kind": "delta", "added": {}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { field: "removed", .. }));
        assert!(err.to_string().contains("removed"));

        let err = parse_request(r#"{"kind": "delta", "removed": {}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { field: "added", .. }));
    }

    #[test]
    fn test_delta_sides_are_validated_independently() {
        let bad = r#"{"entities": [{"name": "x", "library": "lib", "file": "", "line": 2}]}"#;
        let err = parse_request(&format!(r#"{{"kind": "delta", "added": {{}}, "removed": {}}}"#, bad)).unwrap_err();
        assert_eq!(err.side(), Side::Removed);
        assert!(err.to_string().starts_with("removed:"));

        let err = parse_request(&format!(r#"{{"kind": "delta", "added": {}, "removed": {{}}}}"#, bad)).unwrap_err();
        assert_eq!(err.side(), Side::Added);

        let unknown = r#"{"entities": [{"name": "x", "library": "lib", "file": "a.vhd", "line": 2, "color": 1}]}"#;
        let err = parse_request(&format!(r#"{{"kind": "delta", "added": {{}}, "removed": {}}}"#, unknown)).unwrap_err();
        assert!(matches!(err, SchemaError::Shape { side: Side::Removed, .. }));
    }

    #[test]
    fn test_request_envelope() {
        assert!(matches!(parse_request("not json"), Err(SchemaError::Json { .. })));
        assert!(matches!(parse_request("[]"), Err(SchemaError::NotAnObject { .. })));
        assert!(matches!(parse_request(r#"{"tables": {}}"#), Err(SchemaError::MissingKind)));
        assert!(matches!(parse_request(r#"{"kind": "reset"}"#), Err(SchemaError::UnknownKind(_))));
        assert!(matches!(
            parse_request(r#"{"kind": "snapshot", "tables": {}}"#),
            Err(SchemaError::UnexpectedField { .. })
        ));
        assert!(matches!(parse_request(r#"{"kind": "init"}"#), Err(SchemaError::MissingField { field: "tables", .. })));
        assert_eq!(parse_request(r#"{"kind": "snapshot"}"#).unwrap(), Request::Snapshot);
    }

    #[test]
    fn test_row_checks() {
        let reject = |tables: &str| {
            let line = format!(r#"{{"kind": "delta", "added": {}, "removed": {{}}}}"#, tables);
            parse_request(&line).unwrap_err().to_string()
        };

        let err = reject(r#"{"symbols": [{"name": "work.cpu", "kind": "entity", "file": "a.vhd", "line": 1}]}"#);
        assert!(err.contains("work"));
        let err = reject(r#"{"symbols": [{"name": "cpu", "kind": "entity", "file": "a.vhd", "line": 1}]}"#);
        assert!(err.contains("library-qualified"));

        let generate = |can: bool, count: i64| {
            format!(
                r#"{{"generates": [{{"label": "g", "kind": "for", "arch": "rtl", "scope": "rtl.g",
                    "can_elaborate": {}, "iteration_count": {}, "file": "a.vhd", "line": 3}}]}}"#,
                can, count
            )
        };
        assert!(reject(&generate(true, -1)).contains("iteration_count"));
        assert!(reject(&generate(false, 4)).contains("iteration_count"));
        let ok = format!(r#"{{"kind": "delta", "added": {}, "removed": {{}}}}"#, generate(true, 4));
        assert!(parse_request(&ok).is_ok());

        let err = reject(r#"{"dependencies": [{"source": "a.vhd", "target": "lib.x", "kind": "use", "line": 1, "resolved": true}]}"#);
        assert!(err.contains("resolved_to"));
        let err = reject(r#"{"files": [{"path": "a.vhd", "library": "work"}]}"#);
        assert!(err.contains("library"));
    }

    #[test]
    fn test_init_requires_files_rows() {
        let line = format!(r#"{{"kind": "init", "tables": {{{}, "entities": [{}]}}}}"#, FILES, entity("b.vhd", "x"));
        let err = parse_request(&line).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownFile { ref file, .. } if file == "b.vhd"));
    }

    #[test]
    fn test_response_checks() {
        let violations = vec![
            Violation::new(Rule::UndrivenSignal, "b.vhd", 1, "x"),
            Violation::new(Rule::UndrivenSignal, "a.vhd", 1, "y"),
        ];
        let unsorted = Response::Result(EvalResult {
            summary: Summary::from_violations(&violations),
            violations: violations.clone(),
            ..Default::default()
        });
        assert!(validate_response(&unsorted).unwrap_err().to_string().contains("sorted"));

        let mut sorted = violations;
        sorted.reverse();
        let miscounted = Response::Result(EvalResult {
            summary: Summary::default(),
            violations: sorted.clone(),
            ..Default::default()
        });
        assert!(validate_response(&miscounted).unwrap_err().to_string().contains("summary"));

        let good = Response::Result(EvalResult {
            summary: Summary::from_violations(&sorted),
            violations: sorted,
            ..Default::default()
        });
        assert_eq!(parse_response(&good.to_line()).unwrap(), good);
        assert!(parse_response(r#"{"kind": "result", "violations": [], "summary": {"total": 0, "errors": 0, "warnings": 0, "info": 0}, "extra": 1}"#).is_err());
        assert!(parse_response(r#"{"kind": "error", "message": "boom"}"#).is_ok());
    }
}
