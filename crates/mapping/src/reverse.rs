//! Reverse mapping: discover which source path produced each target value.
//!
//! Given an input document and the standard document it should translate to,
//! every target key is paired with the path in the source holding the same
//! string. The result is a mapping table that can be reapplied to other inputs
//! of the same shape.

use crate::error::{MappingError, Result};
use crate::path::PathExpression;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Target key → source path. Keys with no matching source value map to "".
pub type ReverseMapping = BTreeMap<String, String>;

/// Derive a mapping by matching string values of `source` against `target`.
///
/// Both trees are visited in sorted key order, so the result is reproducible.
/// When several source values match the same target key, the last one visited
/// wins.
pub fn reverse_translate(source: &Value, target: &Value) -> Result<ReverseMapping> {
    let Value::Object(source) = source else {
        return Err(MappingError::NotAnObject(crate::error::kind_name(source)));
    };
    let Value::Object(target) = target else {
        return Err(MappingError::NotAnObject(crate::error::kind_name(target)));
    };

    let mut mapping: ReverseMapping = target.keys().map(|key| (key.clone(), String::new())).collect();
    let targets = sorted_string_targets(target);
    walk_object(source, &PathExpression::new(""), &targets, &mut mapping);
    Ok(mapping)
}

/// Parse two JSON texts and reverse-map them.
pub fn reverse_translate_str(source: &str, target: &str) -> Result<ReverseMapping> {
    let source: Value = serde_json::from_str(source)
        .map_err(|err| MappingError::parse(format!("invalid source JSON: {err}")))?;
    let target: Value = serde_json::from_str(target)
        .map_err(|err| MappingError::parse(format!("invalid target JSON: {err}")))?;
    reverse_translate(&source, &target)
}

fn sorted_string_targets(target: &Map<String, Value>) -> Vec<(&str, &str)> {
    let mut out: Vec<(&str, &str)> = target
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|text| (key.as_str(), text)))
        .collect();
    out.sort_by(|a, b| a.0.cmp(b.0));
    out
}

fn first_match<'a>(needle: &str, targets: &[(&'a str, &str)]) -> Option<&'a str> {
    if needle.is_empty() {
        return None;
    }
    targets
        .iter()
        .find(|(_, text)| *text == needle)
        .map(|(key, _)| *key)
}

fn walk_object(
    source: &Map<String, Value>,
    prefix: &PathExpression,
    targets: &[(&str, &str)],
    mapping: &mut ReverseMapping,
) {
    let mut entries: Vec<(&String, &Value)> = source.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (key, value) in entries {
        let path = prefix.child(key);
        let embedded = value.as_str().and_then(parse_embedded_json);
        let value = embedded.as_ref().unwrap_or(value);

        match value {
            Value::String(text) => {
                if let Some(target_key) = first_match(text, targets) {
                    mapping.insert(target_key.to_string(), path.to_string());
                }
            }
            Value::Object(child) => walk_object(child, &path, targets, mapping),
            Value::Array(items) => walk_array(items, &path, targets, mapping),
            Value::Number(_) | Value::Bool(_) | Value::Null => {}
        }
    }
}

fn walk_array(
    items: &[Value],
    path: &PathExpression,
    targets: &[(&str, &str)],
    mapping: &mut ReverseMapping,
) {
    for (index, item) in items.iter().enumerate() {
        let item_path = path.child(format!("#{index}"));
        match item {
            Value::String(text) => {
                if let Some(target_key) = first_match(text, targets) {
                    mapping.insert(target_key.to_string(), item_path.to_string());
                }
            }
            Value::Object(child) => walk_object(child, &item_path, targets, mapping),
            other => {
                log::debug!(
                    "reverse mapping skips {} element at {item_path}",
                    crate::error::kind_name(other)
                );
            }
        }
    }
}

/// Strings holding a JSON object (`{"..."}`) are compared structurally.
fn parse_embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}') && trimmed.contains('"')) {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => None,
        Err(err) => {
            log::debug!("embedded JSON did not parse, matching as plain text: {err}");
            None
        }
    }
}
