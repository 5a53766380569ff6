use schemaless_cache::CacheError;
use schemaless_mapping::MappingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Input or stored document could not be read as JSON/YAML
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Standard '{0}' not found")]
    SchemaNotFound(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model or storage produced something that is not a mapping object
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Input too large for the model: {size} > {limit} characters")]
    InputTooLarge { size: usize, limit: usize },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Translation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn invalid_mapping(msg: impl Into<String>) -> Self {
        Self::InvalidMapping(msg.into())
    }
}

impl From<MappingError> for EngineError {
    fn from(err: MappingError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
