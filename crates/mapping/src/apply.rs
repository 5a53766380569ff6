use crate::error::{kind_name, MappingError, Result};
use crate::normalize::strip_code_fences;
use crate::path::{read, PathExpression};
use crate::reverse::ReverseMapping;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Where a standard key takes its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingRef {
    /// Top-level key or dotted path into the input
    Path(PathExpression),
    /// Placeholder left by the generator (object, number, ...); never resolved
    Literal(Value),
}

/// Standard key → source reference, learned once per input shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingTable(BTreeMap<String, MappingRef>);

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse mapping text as produced by the model or read back from storage.
    /// Surrounding Markdown code fences are tolerated.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let cleaned = strip_code_fences(text);
        let value: Value = serde_json::from_str(cleaned)
            .map_err(|err| MappingError::parse(format!("mapping is not valid JSON: {err}")))?;
        if !value.is_object() {
            return Err(MappingError::NotAnObject(kind_name(&value)));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn insert(&mut self, standard_key: impl Into<String>, reference: MappingRef) {
        self.0.insert(standard_key.into(), reference);
    }

    pub fn get(&self, standard_key: &str) -> Option<&MappingRef> {
        self.0.get(standard_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappingRef)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ReverseMapping> for MappingTable {
    fn from(mapping: ReverseMapping) -> Self {
        Self(
            mapping
                .into_iter()
                .filter(|(_, path)| !path.is_empty())
                .map(|(key, path)| (key, MappingRef::Path(PathExpression::from(path))))
                .collect(),
        )
    }
}

/// Output of [`apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Document in the standard's shape
    pub translated: Value,
    /// The input with the standard keys added alongside the original ones
    pub augmented: Value,
}

/// Transform `input` into the standard shape described by `mapping`.
///
/// A reference naming a top-level key copies that value as is. Dotted
/// references are resolved with [`read`] and stored as strings. References that
/// resolve to nothing leave the standard key out of the result.
pub fn apply(input: &Value, mapping: &MappingTable) -> Result<Applied> {
    let Value::Object(source) = input else {
        return Err(MappingError::NotAnObject(kind_name(input)));
    };

    let mut translated = Map::new();
    let mut augmented = source.clone();

    for (standard_key, reference) in mapping.iter() {
        let MappingRef::Path(path) = reference else {
            log::debug!("'{standard_key}' has a placeholder mapping; skipped");
            continue;
        };

        let resolved = if let Some(value) = source.get(path.as_str()) {
            Some(value.clone())
        } else if path.is_nested() {
            match read(input, path) {
                Ok(text) => Some(Value::String(text)),
                Err(err) => {
                    log::debug!("'{standard_key}' unresolved: {err}");
                    None
                }
            }
        } else {
            None
        };

        if let Some(value) = resolved {
            augmented.insert(standard_key.clone(), value.clone());
            translated.insert(standard_key.clone(), value);
        }
    }

    Ok(Applied {
        translated: Value::Object(translated),
        augmented: Value::Object(augmented),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn table(text: &str) -> MappingTable {
        MappingTable::from_json_str(text).unwrap()
    }

    #[test]
    fn copies_top_level_keys() {
        let input = json!({"title": "Hi", "id": "1234"});
        let applied = apply(&input, &table(r#"{"message":"title","identifier":"id"}"#)).unwrap();
        assert_eq!(applied.translated, json!({"message": "Hi", "identifier": "1234"}));
        assert_eq!(
            applied.augmented,
            json!({"title": "Hi", "id": "1234", "message": "Hi", "identifier": "1234"})
        );
    }

    #[test]
    fn resolves_dotted_paths_as_strings() {
        let input = json!({"key": "12345", "fields": {"summary": "Broken", "votes": 4, "labels": ["a"]}});
        let mapping = table(
            r#"```json
            {"id": "key", "title": "fields.summary", "votes": "fields.votes", "labels": "fields.labels"}
            ```"#,
        );
        let applied = apply(&input, &mapping).unwrap();
        assert_eq!(
            applied.translated,
            json!({"id": "12345", "title": "Broken", "votes": "4", "labels": "[\"a\"]"})
        );
    }

    #[test]
    fn unresolved_and_placeholder_refs_are_left_out() {
        let input = json!({"title": "Hi"});
        let mapping = table(r#"{"message": "title", "missing": "nope", "deep": "a.b", "meta": {}, "n": 0}"#);
        let applied = apply(&input, &mapping).unwrap();
        assert_eq!(applied.translated, json!({"message": "Hi"}));
    }

    #[test]
    fn dotted_top_level_key_takes_precedence() {
        let input = json!({"a.b": "flat", "a": {"b": "nested"}});
        let applied = apply(&input, &table(r#"{"x": "a.b"}"#)).unwrap();
        assert_eq!(applied.translated, json!({"x": "flat"}));
    }

    #[test]
    fn apply_is_idempotent() {
        let input = json!({"title": "Hi", "nested": {"v": true}});
        let mapping = table(r#"{"message": "title", "flag": "nested.v"}"#);
        let first = apply(&input, &mapping).unwrap();
        let second = apply(&input, &mapping).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mapping_text_must_be_an_object() {
        assert!(matches!(
            MappingTable::from_json_str("[1]"),
            Err(MappingError::NotAnObject("array"))
        ));
        assert!(matches!(MappingTable::from_json_str("nope"), Err(MappingError::Parse(_))));
    }

    #[test]
    fn reverse_mapping_converts_without_empty_paths() {
        let reverse: ReverseMapping = [("a".to_string(), "x.y".to_string()), ("b".to_string(), String::new())]
            .into_iter()
            .collect();
        let mapping = MappingTable::from(reverse);
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("a"), Some(&MappingRef::Path(PathExpression::from("x.y"))));
    }
}
