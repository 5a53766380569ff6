//! Value-independent structural fingerprints.
//!
//! A fingerprint has two parts: a *skeleton* (the document with every scalar
//! replaced by its type default) and a *token* (sorted key names, nested levels
//! joined with `.`). Documents with the same keys and nesting always produce
//! the same token, whatever their values.

use crate::error::{kind_name, MappingError, Result};
use crate::normalize::normalize_document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How scalar elements inside arrays appear in the skeleton.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayPolicy {
    /// Scalars are dropped; only object elements keep a skeleton.
    #[default]
    Collapse,
    /// Every scalar becomes its type default, preserving the array length.
    TypeDefaults,
}

/// Fingerprinting behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintOptions {
    /// Nested object tokens are appended while the parent depth (root = 1)
    /// is below this value
    pub max_token_depth: usize,

    /// Treatment of scalar array elements
    pub array_policy: ArrayPolicy,

    /// Ignore keys ending in an ASCII digit (numbered custom fields).
    /// Lossy: distinct shapes can share a token when enabled.
    pub skip_numbered_keys: bool,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            max_token_depth: 3,
            array_policy: ArrayPolicy::Collapse,
            skip_numbered_keys: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralFingerprint {
    pub skeleton: Value,
    pub token: String,
}

/// Fingerprint raw JSON or YAML bytes.
pub fn fingerprint_bytes(raw: &[u8], options: &FingerprintOptions) -> Result<StructuralFingerprint> {
    let doc = normalize_document(raw)?;
    fingerprint(&doc, options)
}

/// Fingerprint an already parsed document. The root must be an object.
pub fn fingerprint(doc: &Value, options: &FingerprintOptions) -> Result<StructuralFingerprint> {
    let Value::Object(map) = doc else {
        return Err(MappingError::NotAnObject(kind_name(doc)));
    };
    let (skeleton, token) = strip_object(map, 1, options);
    Ok(StructuralFingerprint {
        skeleton: Value::Object(skeleton),
        token,
    })
}

fn strip_object(
    map: &Map<String, Value>,
    depth: usize,
    options: &FingerprintOptions,
) -> (Map<String, Value>, String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut skeleton = Map::new();
    let mut token = String::new();
    for (key, value) in entries {
        if options.skip_numbered_keys && ends_with_digit(key) {
            continue;
        }
        token.push_str(key);

        let stripped = match value {
            Value::Object(child) => {
                let (child_skeleton, child_token) = strip_object(child, depth + 1, options);
                if depth < options.max_token_depth && !child_token.is_empty() {
                    token.push('.');
                    token.push_str(&child_token);
                }
                Value::Object(child_skeleton)
            }
            Value::Array(items) => Value::Array(strip_array(items, depth, options)),
            scalar => type_default(scalar),
        };
        skeleton.insert(key.clone(), stripped);
    }
    (skeleton, token)
}

fn strip_array(items: &[Value], depth: usize, options: &FingerprintOptions) -> Vec<Value> {
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::Object(child) => {
                let (child_skeleton, _) = strip_object(child, depth + 1, options);
                out.push(Value::Object(child_skeleton));
            }
            // Nested arrays carry no key names and are not part of the shape.
            Value::Array(_) => {}
            scalar => match options.array_policy {
                ArrayPolicy::Collapse => {}
                ArrayPolicy::TypeDefaults => out.push(type_default(scalar)),
            },
        }
    }
    out
}

fn type_default(value: &Value) -> Value {
    match value {
        Value::String(_) => Value::String(String::new()),
        Value::Number(_) => Value::from(0),
        Value::Bool(_) => Value::Bool(false),
        Value::Null => Value::Null,
        Value::Array(_) | Value::Object(_) => value.clone(),
    }
}

fn ends_with_digit(key: &str) -> bool {
    key.as_bytes().last().is_some_and(u8::is_ascii_digit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn token_of(doc: Value) -> String {
        fingerprint(&doc, &FingerprintOptions::default()).unwrap().token
    }

    #[test]
    fn key_order_and_values_do_not_matter() {
        let a = fingerprint_bytes(br#"{"b":1,"a":"x"}"#, &FingerprintOptions::default()).unwrap();
        let b = fingerprint_bytes(br#"{"a":"y","b":2}"#, &FingerprintOptions::default()).unwrap();
        assert_eq!(a.token, "ab");
        assert_eq!(a, b);
        assert_eq!(a.skeleton, json!({"a": "", "b": 0}));
    }

    #[test]
    fn nested_tokens_stop_after_three_levels() {
        let doc = json!({"a": {"b": {"c": {"d": 1}}}, "z": true});
        let fp = fingerprint(&doc, &FingerprintOptions::default()).unwrap();
        assert_eq!(fp.token, "a.b.cz");
        assert_eq!(fp.skeleton, json!({"a": {"b": {"c": {"d": 0}}}, "z": false}));
    }

    #[test]
    fn arrays_of_objects_recurse_and_scalars_collapse() {
        let doc = json!({
            "tags": ["x", "y"],
            "items": [{"id": 7, "name": "n"}, "stray", [1, 2]],
            "none": null
        });
        let fp = fingerprint(&doc, &FingerprintOptions::default()).unwrap();
        assert_eq!(fp.token, "itemsnonetags");
        assert_eq!(
            fp.skeleton,
            json!({"items": [{"id": 0, "name": ""}], "none": null, "tags": []})
        );
    }

    #[test]
    fn type_default_policy_keeps_array_length() {
        let options = FingerprintOptions {
            array_policy: ArrayPolicy::TypeDefaults,
            ..Default::default()
        };
        let fp = fingerprint(&json!({"tags": ["x", 3, true]}), &options).unwrap();
        assert_eq!(fp.skeleton, json!({"tags": ["", 0, false]}));
    }

    #[test]
    fn numbered_keys_can_be_suppressed() {
        let doc = json!({"customfield_10010": "x", "summary": "y", "nested": {"field2": 1, "name": ""}});
        let options = FingerprintOptions {
            skip_numbered_keys: true,
            ..Default::default()
        };
        let fp = fingerprint(&doc, &options).unwrap();
        assert_eq!(fp.token, "nested.namesummary");
        assert_eq!(fp.skeleton, json!({"nested": {"name": ""}, "summary": ""}));

        let plain = fingerprint(&doc, &FingerprintOptions::default()).unwrap();
        assert_eq!(plain.token, "customfield_10010nested.field2namesummary");
    }

    #[test]
    fn different_shapes_get_different_tokens() {
        assert_ne!(token_of(json!({"a": 1})), token_of(json!({"b": 1})));
        assert_ne!(token_of(json!({"a": {"b": 1}})), token_of(json!({"a": 1, "b": 1})));
        assert_ne!(token_of(json!({"a": {"b": 1}})), token_of(json!({"a": {"c": 1}})));
        assert_ne!(
            token_of(json!({"title": "", "id": ""})),
            token_of(json!({"title": "", "id": "", "status": ""}))
        );
    }

    #[test]
    fn non_object_root_is_rejected() {
        let err = fingerprint(&json!([1, 2]), &FingerprintOptions::default()).unwrap_err();
        assert!(matches!(err, MappingError::NotAnObject("array")));
    }

    #[test]
    fn yaml_input_fingerprints_like_json() {
        let yaml = fingerprint_bytes(b"title: hi\nid: 3\n", &FingerprintOptions::default()).unwrap();
        let json = fingerprint_bytes(br#"{"id": 9, "title": "other"}"#, &FingerprintOptions::default()).unwrap();
        assert_eq!(yaml, json);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::from),
            "[a-z ]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,5}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    fn arb_object() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z]{1,5}", arb_json(), 1..5)
            .prop_map(|map| Value::Object(map.into_iter().collect()))
    }

    fn reassign_values(value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(format!("{text}-changed")),
            Value::Number(number) => Value::from(number.as_i64().unwrap_or(0).wrapping_add(17)),
            Value::Bool(flag) => Value::Bool(!flag),
            Value::Null => Value::Null,
            Value::Array(items) => Value::Array(items.iter().map(reassign_values).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), reassign_values(value)))
                    .collect(),
            ),
        }
    }

    proptest! {
        #[test]
        fn proptest_fingerprint_ignores_values(doc in arb_object()) {
            let options = FingerprintOptions::default();
            let original = fingerprint(&doc, &options).unwrap();
            let changed = fingerprint(&reassign_values(&doc), &options).unwrap();
            prop_assert_eq!(original, changed);
        }
    }
}
