use crate::error::{EngineError, Result};
use crate::keys::standard_name;
use schemaless_mapping::normalize_document;
use serde_json::Value;

/// A named target format.
///
/// The body is either an example document (`{"id": "The id", ...}`) or a
/// reference to another standard in list form (`[alert.json]`), meaning "a
/// list of `alert` documents".
#[derive(Debug, Clone, PartialEq)]
pub struct StandardSchema {
    pub name: String,
    /// Body as stored; this is what the model sees
    pub raw: String,
    pub example: Value,
    pub sub_standard: Option<String>,
}

impl StandardSchema {
    pub fn parse(name: &str, body: &str) -> Result<Self> {
        let name = standard_name(name).to_string();
        let trimmed = body.trim();

        if let Some(sub) = list_reference(trimmed) {
            return Ok(Self {
                name,
                raw: trimmed.to_string(),
                example: Value::Array(Vec::new()),
                sub_standard: Some(sub),
            });
        }

        let example = normalize_document(trimmed.as_bytes()).map_err(|err| {
            EngineError::parse(format!("standard '{name}' is not a valid document: {err}"))
        })?;
        Ok(Self {
            name,
            raw: trimmed.to_string(),
            example,
            sub_standard: None,
        })
    }

    pub fn is_list(&self) -> bool {
        self.sub_standard.is_some()
    }
}

fn list_reference(body: &str) -> Option<String> {
    if body.len() <= 2 || !body.contains(".json") {
        return None;
    }
    let inner = body.strip_prefix('[')?.strip_suffix(']')?.trim();

    let name = match serde_json::from_str::<Vec<String>>(body) {
        Ok(names) if names.len() == 1 => names.into_iter().next()?,
        Ok(_) => return None,
        Err(_) => inner.trim_matches('"').to_string(),
    };

    let name = standard_name(&name);
    if name.is_empty() || name.contains(['[', ']', '{', '}', ',']) {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_and_quoted_list_references() {
        let bare = StandardSchema::parse("list_tickets.json", "[ticket.json]").unwrap();
        assert_eq!(bare.name, "list_tickets");
        assert_eq!(bare.sub_standard.as_deref(), Some("ticket"));
        assert!(bare.is_list());

        let quoted = StandardSchema::parse("list_tickets", r#" ["ticket.json"] "#).unwrap();
        assert_eq!(quoted.sub_standard.as_deref(), Some("ticket"));
    }

    #[test]
    fn example_documents_are_parsed() {
        let schema =
            StandardSchema::parse("ticket", r#"{"id": "The id", "title": "The title"}"#).unwrap();
        assert_eq!(schema.sub_standard, None);
        assert_eq!(schema.example, json!({"id": "The id", "title": "The title"}));
    }

    #[test]
    fn plain_arrays_are_not_references() {
        let schema = StandardSchema::parse("tags", r#"["a", "b"]"#).unwrap();
        assert_eq!(schema.sub_standard, None);
        assert_eq!(schema.example, json!(["a", "b"]));

        let two = StandardSchema::parse("pair", r#"["a.json", "b.json"]"#).unwrap();
        assert_eq!(two.sub_standard, None);
    }

    #[test]
    fn yaml_standards_are_accepted() {
        let schema = StandardSchema::parse("ticket", "id: The id\ntitle: The title\n").unwrap();
        assert_eq!(schema.example["title"], "The title");
    }
}
