use thiserror::Error;

/// Result type for mapping operations
pub type Result<T> = std::result::Result<T, MappingError>;

/// Errors produced while fingerprinting, addressing or mapping documents
#[derive(Error, Debug)]
pub enum MappingError {
    /// Input is neither valid JSON nor valid YAML
    #[error("Parse error: {0}")]
    Parse(String),

    /// The document root (or an addressed value) must be an object
    #[error("Expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// A path segment does not exist in the document
    #[error("Path not found: '{path}' (missing segment '{segment}')")]
    PathNotFound { path: String, segment: String },

    /// A path segment addressed a value of the wrong kind
    #[error("Path type mismatch at '{segment}' in '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        segment: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Path expression has no segments
    #[error("Empty path expression")]
    EmptyPath,

    /// JSON serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MappingError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a path-not-found error
    pub fn not_found(path: impl Into<String>, segment: impl Into<String>) -> Self {
        Self::PathNotFound {
            path: path.into(),
            segment: segment.into(),
        }
    }

    /// Whether the error means "nothing at this location"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound { .. })
    }
}

/// Short name of a JSON value's kind, used in error messages and logs.
pub fn kind_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
