//! Relaxed deserializers for extractor output.
//!
//! A single file with a malformed sub-structure must not abort a batch of
//! thousands, so these helpers accept whatever shape arrives and fall back to
//! an empty value instead of failing the whole document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// A list of records. Non-list values become empty; elements that fail to
/// deserialize are dropped individually.
pub fn seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => {
            tracing::warn!(found = type_name(&other), "expected a list of facts, using empty list");
            return Ok(Vec::new());
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed fact");
                None
            }
        })
        .collect())
}

/// A list of strings, keeping only the string elements.
pub fn strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// A string; numbers are rendered, anything else is empty.
pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// An optional string; empty strings collapse to `None`.
pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = string(deserializer)?;
    Ok(if s.trim().is_empty() { None } else { Some(s) })
}

/// A line number. Negative, fractional or non-numeric values become 0.
pub fn line<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0))
}

pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_bool().unwrap_or(false))
}

/// A string-to-string map such as a port map. Scalar values are rendered,
/// nested values are dropped.
pub fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(entries) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            Value::Number(n) => Some((key, n.to_string())),
            Value::Bool(b) => Some((key, b.to_string())),
            _ => None,
        })
        .collect())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "seq")]
        items: Vec<Item>,
        #[serde(default, deserialize_with = "strings")]
        names: Vec<String>,
        #[serde(default, deserialize_with = "line")]
        line: usize,
        #[serde(default, deserialize_with = "string_map")]
        map: BTreeMap<String, String>,
    }

    #[test]
    fn test_seq_drops_bad_elements() {
        let holder: Holder =
            serde_json::from_str(r#"{"items": [{"name": "a"}, {"nome": 1}, 7, {"name": "b"}]}"#)
                .unwrap();
        assert_eq!(
            holder.items,
            vec![Item { name: "a".into() }, Item { name: "b".into() }]
        );
    }

    #[test]
    fn test_wrong_shapes_become_empty() {
        let holder: Holder = serde_json::from_str(
            r#"{"items": "oops", "names": {"x": 1}, "line": -4, "map": [1, 2]}"#,
        )
        .unwrap();
        assert!(holder.items.is_empty());
        assert!(holder.names.is_empty());
        assert_eq!(holder.line, 0);
        assert!(holder.map.is_empty());
    }

    #[test]
    fn test_null_and_missing() {
        let holder: Holder = serde_json::from_str(r#"{"items": null}"#).unwrap();
        assert!(holder.items.is_empty());
        assert!(holder.names.is_empty());
    }

    #[test]
    fn test_strings_and_map_keep_scalars() {
        let holder: Holder = serde_json::from_str(
            r#"{"names": ["clk", null, "rst", 3], "map": {"a": "x", "b": 4, "c": {"n": 1}}}"#,
        )
        .unwrap();
        assert_eq!(holder.names, vec!["clk", "rst"]);
        assert_eq!(holder.map.get("b").map(String::as_str), Some("4"));
        assert!(!holder.map.contains_key("c"));
    }
}
