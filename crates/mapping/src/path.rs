//! Dotted path addressing (`a.b.#2.c`) for reading and writing JSON trees.

use crate::error::{kind_name, MappingError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One dot-separated piece of a [`PathExpression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Object key, matched exactly and case-sensitively
    Key(&'a str),
    /// `#N`: the Nth element of the current array
    Index(usize),
    /// `#`: every element of the current array
    Each,
}

impl<'a> Segment<'a> {
    pub fn parse(raw: &'a str) -> Self {
        if raw == "#" {
            return Self::Each;
        }
        if let Some(digits) = raw.strip_prefix('#') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(index) = digits.parse::<usize>() {
                    return Self::Index(index);
                }
            }
        }
        Self::Key(raw)
    }
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "#{index}"),
            Self::Each => f.write_str("#"),
        }
    }
}

/// Address of a value inside a JSON tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathExpression(String);

impl PathExpression {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the expression has more than one segment.
    pub fn is_nested(&self) -> bool {
        self.0.contains('.')
    }

    pub fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        self.0.split('.').map(Segment::parse)
    }

    /// Append a child segment, producing `self.child`.
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        if self.0.is_empty() {
            Self(segment.to_string())
        } else {
            Self(format!("{}.{segment}", self.0))
        }
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PathExpression {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for PathExpression {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Locate the value at `path` and return it as a string.
///
/// Objects and arrays become compact JSON text; scalars use their natural form.
pub fn read(doc: &Value, path: &PathExpression) -> Result<String> {
    resolve(doc, path).map(|value| stringify(&value))
}

/// Locate the value at `path`.
///
/// Any absent segment, or a segment that meets the wrong kind of value, is
/// reported as [`MappingError::PathNotFound`].
pub fn resolve(doc: &Value, path: &PathExpression) -> Result<Value> {
    if path.is_empty() {
        return Err(MappingError::EmptyPath);
    }
    let segments: Vec<Segment<'_>> = path.segments().collect();
    resolve_segments(doc, &segments, path)
}

fn resolve_segments(current: &Value, segments: &[Segment<'_>], path: &PathExpression) -> Result<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(current.clone());
    };

    match *head {
        Segment::Key(key) => {
            let next = current
                .as_object()
                .and_then(|map| map.get(key))
                .ok_or_else(|| MappingError::not_found(path.as_str(), key))?;
            resolve_segments(next, rest, path)
        }
        Segment::Index(index) => {
            let next = current
                .as_array()
                .and_then(|items| items.get(index))
                .ok_or_else(|| MappingError::not_found(path.as_str(), head.to_string()))?;
            resolve_segments(next, rest, path)
        }
        Segment::Each => {
            let Some(items) = current.as_array() else {
                return Err(MappingError::not_found(path.as_str(), "#"));
            };
            if rest.is_empty() {
                return Ok(current.clone());
            }
            let mut collected = Vec::with_capacity(items.len());
            for item in items {
                match resolve_segments(item, rest, path) {
                    Ok(value) => collected.push(value),
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                }
            }
            Ok(Value::Array(collected))
        }
    }
}

/// Natural string form of a value.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Assign `value` at `path`, creating intermediate objects as needed.
///
/// Index segments only address existing array elements; an out-of-range index
/// fails with [`MappingError::PathNotFound`] instead of growing the array.
/// A `null` met on the way is treated as absent and replaced by an object.
pub fn write(doc: &mut Value, path: &PathExpression, value: Value) -> Result<()> {
    if path.is_empty() {
        return Err(MappingError::EmptyPath);
    }
    let segments: Vec<Segment<'_>> = path.segments().collect();
    write_segments(doc, &segments, path, value)
}

fn write_segments(
    current: &mut Value,
    segments: &[Segment<'_>],
    path: &PathExpression,
    value: Value,
) -> Result<()> {
    let Some((head, rest)) = segments.split_first() else {
        *current = value;
        return Ok(());
    };

    let found = kind_name(current);
    match *head {
        Segment::Key(key) => {
            let Value::Object(map) = current else {
                return Err(mismatch(path, head, "object", found));
            };
            if rest.is_empty() {
                map.insert(key.to_string(), value);
                return Ok(());
            }
            let next = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if next.is_null() {
                *next = Value::Object(Map::new());
            }
            write_segments(next, rest, path, value)
        }
        Segment::Index(index) => {
            let Value::Array(items) = current else {
                return Err(mismatch(path, head, "array", found));
            };
            let next = items
                .get_mut(index)
                .ok_or_else(|| MappingError::not_found(path.as_str(), head.to_string()))?;
            write_segments(next, rest, path, value)
        }
        Segment::Each => {
            let Value::Array(items) = current else {
                return Err(mismatch(path, head, "array", found));
            };
            for item in items.iter_mut() {
                write_segments(item, rest, path, value.clone())?;
            }
            Ok(())
        }
    }
}

fn mismatch(
    path: &PathExpression,
    segment: &Segment<'_>,
    expected: &'static str,
    found: &'static str,
) -> MappingError {
    MappingError::TypeMismatch {
        path: path.to_string(),
        segment: segment.to_string(),
        expected,
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn p(raw: &str) -> PathExpression {
        PathExpression::from(raw)
    }

    #[test]
    fn segment_grammar() {
        assert_eq!(Segment::parse("#"), Segment::Each);
        assert_eq!(Segment::parse("#12"), Segment::Index(12));
        assert_eq!(Segment::parse("#x"), Segment::Key("#x"));
        assert_eq!(Segment::parse("name"), Segment::Key("name"));
    }

    #[test]
    fn reads_nested_scalars_and_containers() {
        let doc = json!({
            "fields": {"summary": "heyo", "count": 3, "open": true, "project": {"key": "SHUF"}},
            "tags": ["a", "b"]
        });
        assert_eq!(read(&doc, &p("fields.summary")).unwrap(), "heyo");
        assert_eq!(read(&doc, &p("fields.count")).unwrap(), "3");
        assert_eq!(read(&doc, &p("fields.open")).unwrap(), "true");
        assert_eq!(read(&doc, &p("fields.project")).unwrap(), r#"{"key":"SHUF"}"#);
        assert_eq!(read(&doc, &p("tags")).unwrap(), r#"["a","b"]"#);
    }

    #[test]
    fn reads_indexed_and_each_segments() {
        let doc = json!({"items": [{"id": "x"}, {"name": "no id"}, {"id": "z"}]});
        assert_eq!(read(&doc, &p("items.#2.id")).unwrap(), "z");
        assert_eq!(read(&doc, &p("items.#.id")).unwrap(), r#"["x","z"]"#);
        assert!(read(&doc, &p("items.#9.id")).unwrap_err().is_not_found());
    }

    #[test]
    fn read_fails_on_missing_or_non_object_segment() {
        let doc = json!({"a": {"b": "leaf"}});
        assert!(read(&doc, &p("a.c")).unwrap_err().is_not_found());
        assert!(read(&doc, &p("a.b.c")).unwrap_err().is_not_found());
        assert!(read(&doc, &p("A.b")).unwrap_err().is_not_found());
        assert!(matches!(read(&doc, &p("")), Err(MappingError::EmptyPath)));
    }

    #[test]
    fn write_creates_intermediate_objects() {
        let mut doc = json!({"fields": {"project": {"key": ""}, "issuetype": {"name": "Bug"}}});
        write(&mut doc, &p("fields.summary"), json!("heyo")).unwrap();
        write(&mut doc, &p("fields.project.key"), json!("SHUF")).unwrap();
        write(&mut doc, &p("meta.source.kind"), json!("jira")).unwrap();
        assert_eq!(
            doc,
            json!({
                "fields": {"project": {"key": "SHUF"}, "summary": "heyo", "issuetype": {"name": "Bug"}},
                "meta": {"source": {"kind": "jira"}}
            })
        );
    }

    #[test]
    fn write_addresses_existing_array_positions_only() {
        let mut doc = json!({"list": [{"a": 1}, {"a": 2}]});
        write(&mut doc, &p("list.#1.a"), json!("two")).unwrap();
        assert_eq!(doc, json!({"list": [{"a": 1}, {"a": "two"}]}));

        let err = write(&mut doc, &p("list.#5.a"), json!("x")).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(doc["list"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn write_each_applies_to_every_element() {
        let mut doc = json!({"list": [{"a": 1}, {"a": 2}]});
        write(&mut doc, &p("list.#.seen"), json!(true)).unwrap();
        assert_eq!(doc, json!({"list": [{"a": 1, "seen": true}, {"a": 2, "seen": true}]}));
    }

    #[test]
    fn write_refuses_to_descend_through_scalars() {
        let mut doc = json!({"a": "leaf"});
        let err = write(&mut doc, &p("a.b"), json!("x")).unwrap_err();
        assert!(matches!(err, MappingError::TypeMismatch { expected: "object", found: "string", .. }));
    }

    #[test]
    fn write_replaces_null_intermediates() {
        let mut doc = json!({"a": null});
        write(&mut doc, &p("a.b"), json!("x")).unwrap();
        assert_eq!(doc, json!({"a": {"b": "x"}}));
    }

    proptest! {
        #[test]
        fn proptest_write_then_read_round_trips(
            keys in prop::collection::vec("[a-z]{1,6}", 1..5),
            value in "[ -~]{0,24}",
        ) {
            let path = PathExpression::new(keys.join("."));
            let mut doc = json!({"unrelated": {"x": 1}});
            write(&mut doc, &path, Value::String(value.clone())).unwrap();
            prop_assert_eq!(read(&doc, &path).unwrap(), value);
        }
    }
}
