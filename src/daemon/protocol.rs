//! NDJSON wire types.
//!
//! One request per line in, one response per line out. Requests are only
//! ever read through [`crate::schema::parse_request`].

use serde::{Deserialize, Serialize};

use crate::facts::{Delta, Tables};
use crate::policy::EvalResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Request {
    Init { tables: Tables },
    Delta { added: Tables, removed: Tables },
    Snapshot,
}

impl Request {
    pub fn delta(delta: Delta) -> Self {
        Request::Delta {
            added: delta.added,
            removed: delta.removed,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Init { .. } => "init",
            Request::Delta { .. } => "delta",
            Request::Snapshot => "snapshot",
        }
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Response {
    Result(EvalResult),
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// Serialize as one line. Falls back to a plain error response if the
    /// result cannot be encoded.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"kind":"error","message":{}}}"#,
                serde_json::Value::String(format!("failed to encode response: {}", e))
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Summary;

    #[test]
    fn test_request_encoding() {
        assert_eq!(Request::Snapshot.to_line().unwrap(), r#"{"kind":"snapshot"}"#);
        let line = Request::delta(Delta::default()).to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["kind"], "delta");
        assert!(value.get("added").is_some());
        assert!(value.get("removed").is_some());
    }

    #[test]
    fn test_response_encoding() {
        let result = Response::Result(EvalResult {
            summary: Summary::default(),
            ..Default::default()
        });
        let line = result.to_line();
        assert!(line.starts_with(r#"{"kind":"result""#));
        assert_eq!(serde_json::from_str::<Response>(&line).unwrap(), result);

        let error = Response::error("boom").to_line();
        assert_eq!(error, r#"{"kind":"error","message":"boom"}"#);
    }
}
