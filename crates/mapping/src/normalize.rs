//! Input normalization: YAML → JSON and model-response cleanup.

use crate::error::{MappingError, Result};
use serde_json::{Map, Number, Value};

/// True when the text is shaped like a JSON object (`{ ... }`).
pub fn looks_like_json_object(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('{') && trimmed.ends_with('}')
}

/// Parse a JSON or YAML document into a JSON value.
///
/// Object-shaped input is parsed as JSON first. Everything else goes through
/// the YAML data model; when that fails the raw text is retried as JSON so the
/// caller still gets a best-effort result.
pub fn normalize_document(raw: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(raw)
        .map_err(|err| MappingError::parse(format!("input is not valid UTF-8: {err}")))?;
    let trimmed = text.trim();

    if looks_like_json_object(trimmed) {
        return match serde_json::from_str(trimmed) {
            Ok(value) => Ok(value),
            Err(json_err) => yaml_to_json(trimmed).map_err(|_| {
                MappingError::parse(format!("invalid JSON object: {json_err}"))
            }),
        };
    }

    match yaml_to_json(trimmed) {
        Ok(value) => Ok(value),
        Err(yaml_err) => {
            log::warn!("YAML normalization failed ({yaml_err}); retrying input as JSON");
            serde_json::from_str(trimmed)
                .map_err(|err| MappingError::parse(format!("invalid JSON or YAML input: {err}")))
        }
    }
}

/// Parse YAML text and map its data model onto JSON.
pub fn yaml_to_json(text: &str) -> Result<Value> {
    let parsed: serde_yaml::Value = serde_yaml::from_str(text)
        .map_err(|err| MappingError::parse(format!("invalid YAML: {err}")))?;
    Ok(convert_yaml(parsed))
}

fn convert_yaml(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(flag) => Value::Bool(flag),
        serde_yaml::Value::Number(number) => convert_number(&number),
        serde_yaml::Value::String(text) => Value::String(text),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(convert_yaml).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                out.insert(yaml_key(key), convert_yaml(value));
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => convert_yaml(tagged.value),
    }
}

fn convert_number(number: &serde_yaml::Number) -> Value {
    if let Some(int) = number.as_i64() {
        Value::Number(int.into())
    } else if let Some(uint) = number.as_u64() {
        Value::Number(uint.into())
    } else {
        number
            .as_f64()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number)
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(text) => text,
        serde_yaml::Value::Null => "null".to_string(),
        serde_yaml::Value::Bool(flag) => flag.to_string(),
        serde_yaml::Value::Number(number) => number.to_string(),
        other => convert_yaml(other).to_string(),
    }
}

/// Remove a surrounding Markdown code fence (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
