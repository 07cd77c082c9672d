//! Long-running evaluator speaking NDJSON on a byte stream.
//!
//! Each request line gets exactly one response line, flushed before the
//! next request is read. Every request and response goes through
//! [`crate::schema`]; a rejected request becomes an error response and the
//! loop carries on. End of input ends the loop.

pub mod client;
pub mod evaluator;
pub mod protocol;

use std::io::{self, BufRead, Write};

use crate::facts::Delta;
use crate::schema;

pub use client::{DaemonClient, DaemonError, DAEMON_BIN_ENV};
pub use evaluator::{Evaluator, EvaluatorError};
pub use protocol::{Request, Response};

/// Handle one request line.
pub fn handle_line(evaluator: &mut Evaluator, line: &str) -> Response {
    let request = match schema::parse_request(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "rejected request");
            return Response::error(e.to_string());
        }
    };

    let kind = request.kind();
    let response = match request {
        Request::Init { tables } => Response::Result(evaluator.init(tables)),
        Request::Delta { added, removed } => match evaluator.delta(&Delta { added, removed }) {
            Ok(result) => Response::Result(result),
            Err(e) => Response::error(e.to_string()),
        },
        Request::Snapshot => match evaluator.snapshot() {
            Ok(result) => Response::Result(result.clone()),
            Err(e) => Response::error(e.to_string()),
        },
    };

    match schema::validate_response(&response) {
        Ok(()) => response,
        Err(e) => {
            tracing::error!(request = kind, error = %e, "refusing to send invalid response");
            Response::error(e.to_string())
        }
    }
}

/// Serve requests from `reader` until end of input.
pub fn serve<R: BufRead, W: Write>(evaluator: &mut Evaluator, reader: R, mut writer: W) -> io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(evaluator, &line);
        writeln!(writer, "{}", response.to_line())?;
        writer.flush()?;
    }
    tracing::debug!("input closed, daemon exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CheckRegistry, Engine, RuleConfig};

    fn evaluator() -> Evaluator {
        Evaluator::new(Engine::new(CheckRegistry::builtin().unwrap()), RuleConfig::default())
    }

    fn run(input: &str) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        serve(&mut evaluator(), input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    const INIT: &str = r#"{"kind": "init", "tables": {"files": [{"path": "a.vhd", "library": "lib"}],
        "dependencies": [{"source": "a.vhd", "target": "ghost", "kind": "instantiation", "line": 4, "resolved": false}]}}"#;

    #[test]
    fn test_one_response_per_request() {
        let input = format!(
            "{}\n\n{}\n{}\n",
            r#"{"kind": "snapshot"}"#,
            INIT.replace('\n', " "),
            r#"{"kind": "snapshot"}"#
        );
        let responses = run(&input);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["kind"], "error");
        assert!(responses[0]["message"].as_str().unwrap().contains("init"));
        assert_eq!(responses[1]["kind"], "result");
        assert_eq!(responses[1]["summary"]["errors"], 1);
        assert_eq!(responses[1], responses[2]);
    }

    #[test]
    fn test_delta_without_removed_gets_error_response() {
        let input = format!(
            "{}\n{}\n{}\n",
            INIT.replace('\n', " "),
            r#"{"kind": "delta", "added": {"files": [{"path": "b.vhd", "library": "lib"}]}}"#,
            r#"{"kind": "snapshot"}"#
        );
        let responses = run(&input);
        assert_eq!(responses[1]["kind"], "error");
        assert!(responses[1]["message"].as_str().unwrap().contains("removed"));
        // The rejected delta left the snapshot untouched.
        assert_eq!(responses[2], responses[0]);
    }

    #[test]
    fn test_garbage_line_does_not_stop_the_loop() {
        let input = format!("{{not json\n{}\n", INIT.replace('\n', " "));
        let responses = run(&input);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["kind"], "error");
        assert_eq!(responses[1]["kind"], "result");
    }
}
